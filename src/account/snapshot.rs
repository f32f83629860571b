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

//! The session's view of a selected folder.
//!
//! Nothing here does I/O; it's simply the pure state management.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::model::*;
use crate::cluster::pending::{Change, PendingChangeSet};

/// An ordered mirror of a folder's messages and their flags.
///
/// Its serialised form is what goes into the snapshot cache and excludes
/// transient information.
///
/// Changes arriving from the store are applied to the data immediately, but
/// sequence numbers only move on `flush()`. Until then new messages have no
/// sequence number and removed messages keep theirs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FolderSnapshot {
    account: String,
    folder: FolderId,
    uid_validity: u32,
    /// The folder modseq this snapshot reflects.
    modseq: u64,

    /// The table of known flags.
    ///
    /// Each entry's flags are indices into this table so that the full
    /// `Flag` is not repeated for every message.
    flags: Vec<Flag>,

    /// All known messages, in strictly ascending UID order.
    ///
    /// Sequence numbers correspond (with bias 1) to the elements in
    /// `0..len-unapplied_create`.
    entries: Vec<Entry>,

    /// The number of entries at the end of `entries` which do not have
    /// sequence numbers yet.
    #[serde(skip)]
    unapplied_create: usize,

    /// UIDs which have been removed but are still present in `entries`.
    #[serde(skip)]
    unapplied_expunge: BTreeSet<Uid>,

    /// UIDs whose flags changed since the client was last told.
    #[serde(skip)]
    changed_flags: BTreeSet<Uid>,

    /// For messages whose flags this session set itself, the modseq of the
    /// latest such change. Older flag events for them are stale.
    #[serde(skip)]
    local_flag_modseq: BTreeMap<Uid, u64>,

    /// Messages with a UID above this are `\Recent` to this session.
    #[serde(skip)]
    recent_cutoff: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Entry {
    #[serde(rename = "u")]
    uid: Uid,
    #[serde(rename = "f")]
    flags: Vec<u32>,
    #[serde(rename = "s")]
    size: u32,
    #[serde(rename = "d")]
    internal_date: DateTime<FixedOffset>,
}

/// What `flush()` changed about the client-visible numbering.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushResponse {
    /// Sequence numbers to report as expunged, in the order they must be
    /// sent (descending).
    pub expunged: Vec<Seqnum>,
    /// Newly numbered messages.
    pub new: Vec<(Seqnum, Uid)>,
    /// Whether messages arrived, requiring an `EXISTS`. Each `EXPUNGE`
    /// already implies the count went down by one.
    pub exists_changed: bool,
}

impl FolderSnapshot {
    pub fn new(
        account: String,
        folder: FolderId,
        uid_validity: u32,
        modseq: u64,
    ) -> Self {
        FolderSnapshot {
            account,
            folder,
            uid_validity,
            modseq,
            flags: Vec::new(),
            entries: Vec::new(),
            unapplied_create: 0,
            unapplied_expunge: BTreeSet::new(),
            changed_flags: BTreeSet::new(),
            local_flag_modseq: BTreeMap::new(),
            recent_cutoff: 0,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn folder(&self) -> FolderId {
        self.folder
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    pub fn modseq(&self) -> u64 {
        self.modseq
    }

    pub fn note_modseq(&mut self, modseq: u64) {
        self.modseq = self.modseq.max(modseq);
    }

    pub fn set_recent_cutoff(&mut self, cutoff: u32) {
        self.recent_cutoff = cutoff;
    }

    pub fn max_uid(&self) -> Option<Uid> {
        self.entries.last().map(|e| e.uid)
    }

    /// Add a message while building the snapshot from the store.
    ///
    /// Unlike `append()`, the message is numbered immediately. Returns
    /// whether the message was added; UIDs at or below the current maximum
    /// are ignored.
    pub fn push_loaded(&mut self, info: &MessageInfo) -> bool {
        debug_assert_eq!(0, self.unapplied_create);
        self.push(info)
    }

    /// Record the arrival of a new message.
    ///
    /// It is not given a sequence number until the next flush. Returns
    /// whether the message was new.
    pub fn append(&mut self, info: &MessageInfo) -> bool {
        let added = self.push(info);
        if added {
            self.unapplied_create += 1;
        }
        added
    }

    fn push(&mut self, info: &MessageInfo) -> bool {
        if self.max_uid().map_or(false, |max| info.uid <= max) {
            return false;
        }

        let flags = self.flag_indices(&info.flags);
        self.entries.push(Entry {
            uid: info.uid,
            flags,
            size: info.size,
            internal_date: info.internal_date,
        });
        true
    }

    /// Record that `uid` has been expunged.
    ///
    /// The entry keeps its sequence number until the next flush.
    pub fn remove(&mut self, uid: Uid) -> bool {
        if self.index_of(uid).is_some() {
            self.changed_flags.remove(&uid);
            self.unapplied_expunge.insert(uid)
        } else {
            false
        }
    }

    /// Replace the flags of `uid`.
    ///
    /// Returns whether anything changed. Changes are remembered for
    /// `take_changed_flags()`.
    pub fn update_flags(&mut self, uid: Uid, flags: &[Flag]) -> bool {
        let index = match self.index_of(uid) {
            Some(ix) => ix,
            None => return false,
        };
        if self.unapplied_expunge.contains(&uid) {
            return false;
        }

        let mut new_flags = self.flag_indices(flags);
        new_flags.sort_unstable();
        let mut old_flags = self.entries[index].flags.clone();
        old_flags.sort_unstable();
        if new_flags == old_flags {
            return false;
        }

        self.entries[index].flags = new_flags;
        self.changed_flags.insert(uid);
        true
    }

    /// Record flags this session set through the store at `modseq`.
    ///
    /// Like `update_flags()`, but flag events for `uid` from before
    /// `modseq` that are still in flight will not undo the change.
    pub fn update_flags_at(
        &mut self,
        uid: Uid,
        flags: &[Flag],
        modseq: Option<u64>,
    ) -> bool {
        if let Some(modseq) = modseq {
            let floor = self.local_flag_modseq.entry(uid).or_insert(0);
            *floor = (*floor).max(modseq);
        }
        self.update_flags(uid, flags)
    }

    /// Apply the changes collected by a listener.
    ///
    /// Changes the snapshot already reflects (by modseq) are skipped.
    pub fn apply_changes(&mut self, pending: PendingChangeSet) {
        let baseline = self.modseq;
        let mut max_modseq = baseline;
        for (key, modseq, change) in pending.into_changes() {
            if key.folder != self.folder || modseq <= baseline {
                continue;
            }

            max_modseq = max_modseq.max(modseq);
            match change {
                Change::Created(info) | Change::Modified(info, _) => {
                    // A creation may have been coalesced with later
                    // modifications in either direction.
                    let stale = self
                        .local_flag_modseq
                        .get(&info.uid)
                        .map_or(false, |&floor| modseq <= floor);
                    if self.index_of(info.uid).is_none() {
                        self.append(&info);
                    } else if !stale {
                        self.update_flags(info.uid, &info.flags);
                    }
                }
                Change::Deleted => {
                    self.remove(key.uid);
                }
            }
        }

        self.modseq = max_modseq;
    }

    /// Assign sequence numbers to new messages and drop expunged ones.
    pub fn flush(&mut self) -> FlushResponse {
        let mut expunged = Vec::new();

        if !self.unapplied_expunge.is_empty() {
            let addressable = self.num_messages();
            let unapplied_expunge = mem::take(&mut self.unapplied_expunge);
            let mut index = 0;
            let mut stillborn = 0;
            self.entries.retain(|e| {
                let keep = !unapplied_expunge.contains(&e.uid);
                if !keep {
                    if index < addressable {
                        expunged.push(Seqnum::from_index(index));
                    } else {
                        // Never had a sequence number, so the client never
                        // needs to hear about it.
                        stillborn += 1;
                    }
                }
                index += 1;
                keep
            });
            self.unapplied_create -= stillborn;
        }

        // Sent in descending order so every number is still valid at the
        // point the client processes it.
        expunged.reverse();

        let first_new = self.entries.len() - self.unapplied_create;
        let new = self.entries[first_new..]
            .iter()
            .enumerate()
            .map(|(ix, e)| (Seqnum::from_index(first_new + ix), e.uid))
            .collect::<Vec<_>>();
        self.unapplied_create = 0;

        FlushResponse {
            exists_changed: !new.is_empty(),
            expunged,
            new,
        }
    }

    pub fn has_pending_expunge(&self) -> bool {
        !self.unapplied_expunge.is_empty()
    }

    pub fn is_pending_expunge(&self, uid: Uid) -> bool {
        self.unapplied_expunge.contains(&uid)
    }

    /// Return the UIDs whose flags have changed since the last call, in
    /// ascending order.
    pub fn take_changed_flags(&mut self) -> Vec<Uid> {
        mem::take(&mut self.changed_flags).into_iter().collect()
    }

    /// Record that the client has been sent the current flags of `uid`.
    pub fn acknowledge_flags(&mut self, uid: Uid) {
        self.changed_flags.remove(&uid);
    }

    /// The number of messages addressable by sequence number.
    pub fn num_messages(&self) -> usize {
        self.entries.len() - self.unapplied_create
    }

    pub fn recent_count(&self) -> usize {
        self.addressable()
            .iter()
            .filter(|e| u32::from(e.uid) > self.recent_cutoff)
            .count()
    }

    /// The sequence number of the first unseen message, if any.
    pub fn first_unseen(&self) -> Option<Seqnum> {
        let seen = self.flags.iter().position(|f| *f == Flag::Seen);
        self.addressable()
            .iter()
            .position(|e| {
                seen.map_or(true, |s| !e.flags.contains(&(s as u32)))
            })
            .map(Seqnum::from_index)
    }

    pub fn seqnum_to_uid(&self, seqnum: Seqnum) -> Option<Uid> {
        self.addressable().get(seqnum.to_index()).map(|e| e.uid)
    }

    pub fn uid_to_seqnum(&self, uid: Uid) -> Option<Seqnum> {
        self.addressable()
            .binary_search_by_key(&uid, |e| e.uid)
            .ok()
            .map(Seqnum::from_index)
    }

    /// The entry with the given sequence number.
    pub fn by_seqnum(&self, seqnum: Seqnum) -> Option<EntryRef<'_>> {
        if seqnum.to_index() < self.num_messages() {
            Some(EntryRef {
                snapshot: self,
                index: seqnum.to_index(),
            })
        } else {
            None
        }
    }

    /// The entry with the given UID, if it has a sequence number.
    pub fn by_uid(&self, uid: Uid) -> Option<EntryRef<'_>> {
        self.uid_to_seqnum(uid).and_then(|s| self.by_seqnum(s))
    }

    /// Every entry with a sequence number, in order.
    pub fn iter(&self) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        (0..self.num_messages()).map(move |index| EntryRef {
            snapshot: self,
            index,
        })
    }

    /// The flags in use by any message.
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Check the structural invariants a freshly decoded snapshot must
    /// satisfy.
    pub fn validate(&self) -> bool {
        0 != self.uid_validity
            && self.entries.windows(2).all(|w| w[0].uid < w[1].uid)
            && self.entries.iter().all(|e| {
                e.flags.iter().all(|&f| (f as usize) < self.flags.len())
            })
    }

    fn addressable(&self) -> &[Entry] {
        &self.entries[..self.num_messages()]
    }

    fn index_of(&self, uid: Uid) -> Option<usize> {
        self.entries.binary_search_by_key(&uid, |e| e.uid).ok()
    }

    fn flag_indices(&mut self, flags: &[Flag]) -> Vec<u32> {
        let mut indices = Vec::with_capacity(flags.len());
        for flag in flags {
            let ix = match self.flags.iter().position(|f| f == flag) {
                Some(ix) => ix,
                None => {
                    self.flags.push(flag.clone());
                    self.flags.len() - 1
                }
            } as u32;
            if !indices.contains(&ix) {
                indices.push(ix);
            }
        }
        indices
    }
}

/// A borrowed view of one numbered entry.
#[derive(Clone, Copy)]
pub struct EntryRef<'a> {
    snapshot: &'a FolderSnapshot,
    index: usize,
}

impl<'a> EntryRef<'a> {
    fn entry(&self) -> &'a Entry {
        &self.snapshot.entries[self.index]
    }

    pub fn seqnum(&self) -> Seqnum {
        Seqnum::from_index(self.index)
    }

    pub fn uid(&self) -> Uid {
        self.entry().uid
    }

    pub fn flags(&self) -> impl Iterator<Item = &'a Flag> + 'a {
        let table = &self.snapshot.flags;
        self.entry().flags.iter().map(move |&f| &table[f as usize])
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags().any(|f| f == flag)
    }

    pub fn size(&self) -> u32 {
        self.entry().size
    }

    pub fn internal_date(&self) -> DateTime<FixedOffset> {
        self.entry().internal_date
    }

    pub fn is_recent(&self) -> bool {
        u32::from(self.uid()) > self.snapshot.recent_cutoff
    }

    /// Whether the message is gone but still holds its sequence number.
    pub fn is_expunged(&self) -> bool {
        self.snapshot.is_pending_expunge(self.uid())
    }
}

impl std::fmt::Debug for EntryRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "EntryRef({}:{})", self.seqnum(), self.uid())
    }
}
