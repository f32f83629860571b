//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

//! Coalescing of change notifications between delivery and consumption.
//!
//! Events land here from a listener thread at arbitrary times. The owning
//! session only looks at them at points where it is allowed to tell the
//! client about changes, by which time several events may have piled up for
//! the same message. Only the net effect is kept.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::account::model::*;

/// Identifies a message across all folders of one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub folder: FolderId,
    pub uid: Uid,
}

bitflags! {
    /// What about a message changed.
    pub struct ChangeMask: u32 {
        const FLAGS = 1 << 0;
        const METADATA = 1 << 1;
    }
}

/// A raw change event as delivered by a backend node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub account: String,
    pub folder: FolderId,
    /// The folder modseq immediately after the change.
    pub modseq: u64,
    pub kind: ChangeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created(MessageInfo),
    Modified(MessageInfo, ChangeMask),
    Deleted(Uid),
}

impl ChangeEvent {
    pub fn key(&self) -> ItemKey {
        let uid = match self.kind {
            ChangeKind::Created(ref info) | ChangeKind::Modified(ref info, _) => {
                info.uid
            }
            ChangeKind::Deleted(uid) => uid,
        };

        ItemKey {
            folder: self.folder,
            uid,
        }
    }
}

/// A modification record: the latest state plus the latest reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub info: MessageInfo,
    pub reason: ChangeMask,
    pub modseq: u64,
}

/// The net set of changes for one account not yet seen by a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingChangeSet {
    created: BTreeMap<ItemKey, (MessageInfo, u64)>,
    modified: BTreeMap<ItemKey, Modification>,
    deleted: BTreeMap<ItemKey, u64>,
    /// Events at or below this modseq are already reflected by the
    /// consumer and are dropped.
    floor: u64,
}

/// A `PendingChangeSet` shared between a listener and a session.
pub type SharedPending = Arc<Mutex<PendingChangeSet>>;

impl PendingChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
    }

    /// Discard everything at or below `modseq`, now and in the future.
    ///
    /// A session calls this once its snapshot is known to reflect the
    /// folder as of `modseq`, so that events which raced with loading the
    /// snapshot do not get applied twice.
    pub fn set_floor(&mut self, modseq: u64) {
        self.floor = self.floor.max(modseq);
        let floor = self.floor;
        self.created.retain(|_, &mut (_, m)| m > floor);
        self.modified.retain(|_, m| m.modseq > floor);
        self.deleted.retain(|_, &mut m| m > floor);
    }

    pub fn record(&mut self, event: &ChangeEvent) {
        if event.modseq <= self.floor {
            return;
        }

        let key = event.key();
        match event.kind {
            ChangeKind::Created(ref info) => {
                self.created.insert(key, (info.clone(), event.modseq));
            }
            ChangeKind::Modified(ref info, reason) => {
                self.record_modified(key, info, reason, event.modseq)
            }
            ChangeKind::Deleted(_) => self.record_deleted(key, event.modseq),
        }
    }

    fn record_modified(
        &mut self,
        key: ItemKey,
        info: &MessageInfo,
        reason: ChangeMask,
        modseq: u64,
    ) {
        // A message the session has not heard about yet is simply reported
        // as created with its latest state.
        if let Some(created) = self.created.get_mut(&key) {
            *created = (info.clone(), modseq);
            return;
        }

        self.modified.insert(
            key,
            Modification {
                info: info.clone(),
                reason,
                modseq,
            },
        );
    }

    fn record_deleted(&mut self, key: ItemKey, modseq: u64) {
        // The session never saw it exist, so there is nothing to report.
        if self.created.remove(&key).is_some() {
            return;
        }

        self.modified.remove(&key);
        self.deleted.insert(key, modseq);
    }

    pub fn created(&self) -> impl Iterator<Item = &MessageInfo> + '_ {
        self.created.values().map(|&(ref info, _)| info)
    }

    pub fn modified(&self) -> impl Iterator<Item = &Modification> + '_ {
        self.modified.values()
    }

    pub fn deleted(&self) -> impl Iterator<Item = ItemKey> + '_ {
        self.deleted.keys().copied()
    }

    /// Consume this set into the changes it describes, in an order which is
    /// safe to apply: creations by ascending UID, then modifications, then
    /// deletions.
    pub fn into_changes(self) -> Vec<(ItemKey, u64, Change)> {
        let mut changes = Vec::with_capacity(
            self.created.len() + self.modified.len() + self.deleted.len(),
        );
        for (key, (info, modseq)) in self.created {
            changes.push((key, modseq, Change::Created(info)));
        }
        for (key, m) in self.modified {
            changes.push((key, m.modseq, Change::Modified(m.info, m.reason)));
        }
        for (key, modseq) in self.deleted {
            changes.push((key, modseq, Change::Deleted));
        }
        changes
    }
}

/// One coalesced change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Created(MessageInfo),
    Modified(MessageInfo, ChangeMask),
    Deleted,
}

/// Atomically take everything pending in `shared`, leaving it empty.
///
/// Events recorded concurrently land either in the returned set or in the
/// emptied shared set, never both and never neither. The floor stays with
/// the shared set.
pub fn drain(shared: &Mutex<PendingChangeSet>) -> PendingChangeSet {
    let mut shared = shared.lock().unwrap();
    let emptied = PendingChangeSet {
        floor: shared.floor,
        ..PendingChangeSet::default()
    };
    mem::replace(&mut *shared, emptied)
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;

    fn info(uid: u32, flags: Vec<Flag>) -> MessageInfo {
        MessageInfo {
            uid: Uid::u(uid),
            flags,
            size: 100,
            internal_date: FixedOffset::east(0).timestamp(0, 0),
        }
    }

    fn event(modseq: u64, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            account: "azure".to_owned(),
            folder: FolderId(1),
            modseq,
            kind,
        }
    }

    fn key(uid: u32) -> ItemKey {
        ItemKey {
            folder: FolderId(1),
            uid: Uid::u(uid),
        }
    }

    #[test]
    fn create_then_delete_vanishes() {
        let mut pending = PendingChangeSet::new();
        pending.record(&event(2, ChangeKind::Created(info(1, vec![]))));
        pending.record(&event(3, ChangeKind::Deleted(Uid::u(1))));

        assert_eq!(0, pending.created().count());
        assert_eq!(0, pending.deleted().count());
        assert!(pending.is_empty());
    }

    #[test]
    fn modify_then_delete_leaves_one_delete() {
        let mut pending = PendingChangeSet::new();
        pending.record(&event(
            2,
            ChangeKind::Modified(info(1, vec![Flag::Seen]), ChangeMask::FLAGS),
        ));
        pending.record(&event(3, ChangeKind::Deleted(Uid::u(1))));

        assert_eq!(0, pending.modified().count());
        assert_eq!(vec![key(1)], pending.deleted().collect::<Vec<_>>());
    }

    #[test]
    fn later_modify_replaces() {
        let mut pending = PendingChangeSet::new();
        pending.record(&event(
            2,
            ChangeKind::Modified(info(4, vec![Flag::Seen]), ChangeMask::FLAGS),
        ));
        pending.record(&event(
            3,
            ChangeKind::Modified(
                info(4, vec![Flag::Flagged]),
                ChangeMask::METADATA,
            ),
        ));

        let modified = pending.modified().collect::<Vec<_>>();
        assert_eq!(1, modified.len());
        assert_eq!(vec![Flag::Flagged], modified[0].info.flags);
        assert_eq!(ChangeMask::METADATA, modified[0].reason);
        assert_eq!(3, modified[0].modseq);
    }

    #[test]
    fn modify_of_unreported_create_updates_create() {
        let mut pending = PendingChangeSet::new();
        pending.record(&event(2, ChangeKind::Created(info(5, vec![]))));
        pending.record(&event(
            3,
            ChangeKind::Modified(info(5, vec![Flag::Seen]), ChangeMask::FLAGS),
        ));

        assert_eq!(0, pending.modified().count());
        let created = pending.created().collect::<Vec<_>>();
        assert_eq!(vec![Flag::Seen], created[0].flags);
    }

    #[test]
    fn floor_drops_stale_events() {
        let shared: SharedPending = Arc::new(Mutex::new(PendingChangeSet::new()));
        {
            let mut pending = shared.lock().unwrap();
            pending.record(&event(3, ChangeKind::Created(info(1, vec![]))));
            pending.set_floor(3);
            assert!(pending.is_empty());

            // The create above is already in the snapshot, so this delete
            // must survive rather than cancelling against it.
            pending.record(&event(2, ChangeKind::Created(info(1, vec![]))));
            pending.record(&event(4, ChangeKind::Deleted(Uid::u(1))));
        }

        let taken = drain(&shared);
        assert_eq!(vec![key(1)], taken.deleted().collect::<Vec<_>>());

        shared
            .lock()
            .unwrap()
            .record(&event(1, ChangeKind::Deleted(Uid::u(2))));
        assert!(shared.lock().unwrap().is_empty());
    }

    #[test]
    fn drain_is_snapshot_and_clear() {
        let shared: SharedPending = Arc::new(Mutex::new(PendingChangeSet::new()));
        shared
            .lock()
            .unwrap()
            .record(&event(2, ChangeKind::Created(info(1, vec![]))));

        let taken = drain(&shared);
        assert_eq!(1, taken.created().count());
        assert!(shared.lock().unwrap().is_empty());

        let changes = taken.into_changes();
        assert_matches!([(_, 2, Change::Created(_))], &changes[..]);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let shared: SharedPending = Arc::new(Mutex::new(PendingChangeSet::new()));
        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for uid in 1..=500 {
                    shared.lock().unwrap().record(&event(
                        uid as u64,
                        ChangeKind::Created(info(uid, vec![])),
                    ));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut seen = BTreeSet::new();
        loop {
            let finished = done.load(Ordering::SeqCst);
            for info in drain(&shared).created() {
                assert!(seen.insert(info.uid));
            }
            if finished {
                break;
            }
        }
        writer.join().unwrap();

        assert_eq!(500, seen.len());
    }
}
