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

//! Persistence of folder snapshots between sessions.
//!
//! The backends here only move opaque bytes. Whatever comes back from one is
//! treated as hostile: the directory backend in particular may be shared
//! with other machines.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::model::FolderId;
use super::snapshot::FolderSnapshot;
use super::store::FolderInfo;
use crate::support::error::Error;
use crate::support::file_ops;

/// Snapshots larger than this are never read back.
const MAX_PAYLOAD: u64 = 256 * 1024 * 1024;

/// A key/value store of serialised snapshots.
pub trait CacheBackend: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// An in-process map bounded to `capacity` entries, evicting the least
/// recently used.
pub struct LocalCache {
    capacity: usize,
    inner: Mutex<LocalInner>,
}

#[derive(Default)]
struct LocalInner {
    tick: u64,
    entries: HashMap<String, (u64, Arc<Vec<u8>>)>,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        LocalCache {
            capacity: capacity.max(1),
            inner: Mutex::new(LocalInner::default()),
        }
    }
}

impl CacheBackend for LocalCache {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(key.to_owned(), (tick, Arc::new(value)));

        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|&(_, &(t, _))| t)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.entries.remove(&k);
                }
                None => break,
            }
        }

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        Ok(inner.entries.get_mut(key).map(|entry| {
            entry.0 = tick;
            entry.1.to_vec()
        }))
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.lock().unwrap().entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory which may be shared between nodes.
pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    pub fn new(root: PathBuf) -> Result<Self, Error> {
        std::fs::create_dir_all(&root)?;
        Ok(DirectoryCache { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.snap", safe_file_name(key)))
    }
}

/// Map `key` onto something safe to use as a single path component.
fn safe_file_name(key: &str) -> String {
    key.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '@' => ch,
            _ => '%',
        })
        .collect()
}

impl CacheBackend for DirectoryCache {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        file_ops::spit(&self.root, self.path(key), 0o600, &value)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(file_ops::slurp_bounded(self.path(key), MAX_PAYLOAD)?)
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        file_ops::remove_if_exists(self.path(key))?;
        Ok(())
    }
}

/// Identifies one exact state of one folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub account: String,
    pub folder: FolderId,
    pub modseq: u64,
    pub uid_validity: u32,
}

impl CacheKey {
    pub fn for_folder(info: &FolderInfo) -> Self {
        CacheKey {
            account: info.owner.to_lowercase(),
            folder: info.id,
            modseq: info.modseq,
            uid_validity: info.uid_validity,
        }
    }

    pub fn for_snapshot(snapshot: &FolderSnapshot) -> Self {
        CacheKey {
            account: snapshot.account().to_lowercase(),
            folder: snapshot.folder(),
            modseq: snapshot.modseq(),
            uid_validity: snapshot.uid_validity(),
        }
    }

    fn matches(&self, snapshot: &FolderSnapshot) -> bool {
        *self == CacheKey::for_snapshot(snapshot)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.account, self.folder, self.modseq, self.uid_validity
        )
    }
}

pub struct SnapshotCache {
    backend: Box<dyn CacheBackend>,
}

impl SnapshotCache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        SnapshotCache { backend }
    }

    pub fn put(&self, snapshot: &FolderSnapshot) -> Result<(), Error> {
        let key = CacheKey::for_snapshot(snapshot);
        let data = serde_cbor::to_vec(snapshot)?;
        debug!("Caching snapshot {} ({} bytes)", key, data.len());
        self.backend.put(&key.to_string(), data)
    }

    /// Look up the snapshot for exactly `key`.
    ///
    /// Anything which cannot be turned back into a snapshot of precisely
    /// that folder state is a miss. Errors from the backend are also misses;
    /// the caller can always rebuild from the store.
    pub fn get(&self, key: &CacheKey) -> Option<FolderSnapshot> {
        let name = key.to_string();
        let data = match self.backend.get(&name) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read snapshot {} from cache: {}", name, e);
                return None;
            }
        };

        let snapshot = match serde_cbor::from_slice::<FolderSnapshot>(&data) {
            Ok(s) => s,
            Err(e) => {
                warn!("Discarding undecodable snapshot {}: {}", name, e);
                let _ = self.backend.remove(&name);
                return None;
            }
        };

        if !key.matches(&snapshot) || !snapshot.validate() {
            warn!("Discarding inconsistent snapshot {}", name);
            let _ = self.backend.remove(&name);
            return None;
        }

        Some(snapshot)
    }
}

/// A pending write-back of a selected folder's snapshot.
///
/// The snapshot only goes back into the cache if the session leaves the
/// folder cleanly and calls `commit()`. Dropping the guard without that
/// (e.g. because the connection died) writes nothing.
pub struct WriteBack {
    cache: Arc<SnapshotCache>,
}

impl WriteBack {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        WriteBack { cache }
    }

    pub fn commit(self, snapshot: &FolderSnapshot) {
        if let Err(e) = self.cache.put(snapshot) {
            warn!(
                "Failed to write back snapshot {}: {}",
                CacheKey::for_snapshot(snapshot),
                e
            );
        }
    }
}
