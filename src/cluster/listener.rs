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

//! Shared subscriptions to backend change notifications.
//!
//! Each backend node gets exactly one `BackendListener`, no matter how many
//! sessions have folders selected on it. The listener owns the node's
//! subscription and a background thread which sorts incoming events into
//! the `PendingChangeSet`s of the sessions that registered interest.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use super::balancer::Placement;
use super::pending::{ChangeEvent, PendingChangeSet, SharedPending};
use super::topology::Node;
use crate::account::model::FolderId;
use crate::support::error::Error;

/// The source of change notifications.
pub trait ChangeFeed: Send + Sync {
    /// Open a new subscription to changes on `node`.
    ///
    /// Events are delivered in the order they happened. The subscription
    /// ends when the receiver is dropped.
    fn subscribe(&self, node: &Node) -> Result<Receiver<ChangeEvent>, Error>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Registration {
    id: u64,
    account: String,
    folder: FolderId,
    pending: Weak<Mutex<PendingChangeSet>>,
}

type Registrations = Arc<Mutex<Vec<Registration>>>;

pub struct BackendListener {
    node: Node,
    registrations: Registrations,
    next_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BackendListener {
    /// Subscribe to `node` through `feed` and start delivering.
    pub fn start(node: Node, feed: &dyn ChangeFeed) -> Result<Self, Error> {
        let rx = feed.subscribe(&node)?;
        let registrations: Registrations = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let registrations = Arc::clone(&registrations);
            let shutdown = Arc::clone(&shutdown);
            let node_id = node.id.clone();
            thread::Builder::new()
                .name(format!("listener-{}", node.id))
                .spawn(move || run(node_id, rx, registrations, shutdown))?
        };

        info!("Started change listener for node {}", node);
        Ok(BackendListener {
            node,
            registrations,
            next_id: AtomicU64::new(1),
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Deliver changes to `folder` of `account` into `pending` until the
    /// returned registration is dropped.
    pub fn register(
        self: &Arc<Self>,
        account: &str,
        folder: FolderId,
        pending: &SharedPending,
    ) -> ListenerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().unwrap().push(Registration {
            id,
            account: account.to_lowercase(),
            folder,
            pending: Arc::downgrade(pending),
        });

        ListenerRegistration {
            listener: Arc::clone(self),
            id,
        }
    }

    fn deregister(&self, id: u64) {
        self.registrations.lock().unwrap().retain(|r| r.id != id);
    }

    #[cfg(test)]
    fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }
}

impl Drop for BackendListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            if thread.join().is_err() {
                error!("Change listener for node {} panicked", self.node);
            }
        }
        info!("Stopped change listener for node {}", self.node);
    }
}

fn run(
    node_id: String,
    rx: Receiver<ChangeEvent>,
    registrations: Registrations,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Change feed for node {} closed", node_id);
                return;
            }
        };

        let mut registrations = registrations.lock().unwrap();
        registrations.retain(|r| r.pending.strong_count() > 0);
        for r in registrations.iter() {
            if r.folder != event.folder
                || !r.account.eq_ignore_ascii_case(&event.account)
            {
                continue;
            }

            if let Some(pending) = r.pending.upgrade() {
                pending.lock().unwrap().record(&event);
            }
        }
    }
}

/// Keeps a session's pending set registered with a listener.
pub struct ListenerRegistration {
    listener: Arc<BackendListener>,
    id: u64,
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.listener.deregister(self.id);
    }
}

struct PoolEntry {
    listener: Arc<BackendListener>,
    leases: AtomicUsize,
}

/// The set of live listeners, one per node.
pub struct ListenerPool {
    feed: Arc<dyn ChangeFeed>,
    placement: Arc<Placement>,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl ListenerPool {
    pub fn new(feed: Arc<dyn ChangeFeed>, placement: Arc<Placement>) -> Self {
        ListenerPool {
            feed,
            placement,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Lease the listener for the node owning `account`, starting it if
    /// this is the first lease for that node.
    pub fn get(self: &Arc<Self>, account: &str) -> Result<ListenerLease, Error> {
        let node = self.placement.node_for(account)?;
        self.get_for_node(node)
    }

    pub fn get_for_node(
        self: &Arc<Self>,
        node: Node,
    ) -> Result<ListenerLease, Error> {
        {
            let entries = self.entries.read().unwrap();
            if let Some(entry) = entries.get(&node.id) {
                entry.leases.fetch_add(1, Ordering::SeqCst);
                return Ok(self.lease(&entry.listener));
            }
        }

        let mut entries = self.entries.write().unwrap();
        // Someone else may have created it between the two locks.
        if let Some(entry) = entries.get(&node.id) {
            entry.leases.fetch_add(1, Ordering::SeqCst);
            return Ok(self.lease(&entry.listener));
        }

        let node_id = node.id.clone();
        let listener = Arc::new(BackendListener::start(node, &*self.feed)?);
        let lease = self.lease(&listener);
        entries.insert(
            node_id,
            PoolEntry {
                listener,
                leases: AtomicUsize::new(1),
            },
        );
        Ok(lease)
    }

    fn lease(self: &Arc<Self>, listener: &Arc<BackendListener>) -> ListenerLease {
        ListenerLease {
            pool: Arc::clone(self),
            listener: Arc::clone(listener),
        }
    }

    fn release(&self, node_id: &str) {
        let mut entries = self.entries.write().unwrap();
        let retire = match entries.get(node_id) {
            Some(entry) => 1 == entry.leases.fetch_sub(1, Ordering::SeqCst),
            None => false,
        };

        if retire {
            debug!("Retiring change listener for node {}", node_id);
            entries.remove(node_id);
        }
    }

    /// The number of nodes with a live listener.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

/// A counted reference to a pooled listener.
///
/// The pool entry is retired when the last lease for its node is dropped.
pub struct ListenerLease {
    pool: Arc<ListenerPool>,
    listener: Arc<BackendListener>,
}

impl ListenerLease {
    pub fn listener(&self) -> &Arc<BackendListener> {
        &self.listener
    }
}

impl Deref for ListenerLease {
    type Target = BackendListener;

    fn deref(&self) -> &BackendListener {
        &self.listener
    }
}

impl Drop for ListenerLease {
    fn drop(&mut self) {
        self.pool.release(&self.listener.node.id);
    }
}
