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

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use super::defs::*;
use crate::account::auth::Credentials;
use crate::account::mailbox_path::ResolvedPath;
use crate::account::model::*;
use crate::account::snapshot::FolderSnapshot;
use crate::account::snapshot_cache::{CacheKey, WriteBack};
use crate::account::store::{FolderInfo, MailboxStore, PageRequest};
use crate::cluster::pending::{PendingChangeSet, SharedPending};
use crate::cluster::topology::Node;
use crate::imap::proxy::{BackendProxy, ProxyIdentity};
use crate::support::error::Error;

/// How many times to reload a folder which keeps changing under us before
/// settling for a snapshot the pending changes will patch up.
const MAX_LOAD_ATTEMPTS: u32 = 3;

impl CommandProcessor {
    pub(super) fn cmd_select(
        &mut self,
        tag: &str,
        command: &s::CommandText,
        args: &[s::Token],
        sender: SendResponse<'_>,
        examine: bool,
    ) -> CmdResult {
        arity(args, 1)?;
        let name = astring_arg(args, 0)?;
        let creds = account!(self)?.clone();

        // The previous folder is closed even if this SELECT fails.
        self.deselect();

        let path = self.resolver().folder(&name, &creds).map_err(map_error! {
            self,
            NxMailbox => (No, Some(s::RespTextCode::Nonexistent)),
            InvalidMailboxName | UnsafeName =>
                (No, Some(s::RespTextCode::Cannot)),
        })?;
        path.require_selectable().map_err(map_error! {
            self,
            MailboxUnselectable => (No, Some(s::RespTextCode::Cannot)),
            PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
        })?;

        if let Some(node) = path.remote.clone() {
            return self.select_remote(tag, command, node, &path, creds, sender);
        }

        let read_only = examine || !path.is_read_write();
        let sel = load_selection(&self.services, path, read_only)
            .map_err(map_error!(self))?;

        let snapshot = &sel.snapshot;
        let mut flags = Flag::SYSTEM.to_vec();
        flags.extend(
            snapshot
                .flags()
                .iter()
                .filter(|f| !Flag::SYSTEM.contains(*f))
                .cloned(),
        );
        sender(s::Response::Flags(flags.clone()));
        sender(s::Response::Exists(snapshot.num_messages() as u32));
        sender(s::Response::Recent(snapshot.recent_count() as u32));
        if let Some(unseen) = snapshot.first_unseen() {
            sender(untagged_ok(s::RespTextCode::Unseen(unseen.0.get())));
        }
        sender(untagged_ok(if read_only {
            s::RespTextCode::PermanentFlags(vec![], false)
        } else {
            s::RespTextCode::PermanentFlags(flags, true)
        }));
        sender(untagged_ok(s::RespTextCode::UidNext(sel.path.info.uid_next)));
        sender(untagged_ok(s::RespTextCode::UidValidity(
            snapshot.uid_validity(),
        )));

        info!(
            "{} Selected {} ({} messages{})",
            self.log_prefix,
            sel.path,
            snapshot.num_messages(),
            if read_only { ", read-only" } else { "" }
        );

        self.state = SessionState::Selected(creds, Selected::Local(sel));
        Ok(s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Ok,
            code: Some(if read_only {
                s::RespTextCode::ReadOnly
            } else {
                s::RespTextCode::ReadWrite
            }),
            quip: None,
        }))
    }

    fn select_remote(
        &mut self,
        tag: &str,
        command: &s::CommandText,
        node: Node,
        path: &ResolvedPath,
        creds: Credentials,
        sender: SendResponse<'_>,
    ) -> CmdResult {
        let response = self
            .proxy_for(&node, &creds)
            .and_then(|proxy| proxy.proxy(tag, command, &mut |r| sender(r)))
            .map_err(map_error!(self))?;

        if completed_ok(tag, &response) {
            info!("{} Selected {} on node {}", self.log_prefix, path, node);
            self.log_prefix.set_via(Some(node.id.clone()));
            self.state = SessionState::Selected(
                creds,
                Selected::Remote(RemoteSelection {
                    node,
                    name: path.display_name(),
                }),
            );
        }

        Ok(response)
    }

    /// The proxy to `node`, connecting it if there is none or the existing
    /// one is unusable.
    fn proxy_for(
        &mut self,
        node: &Node,
        creds: &Credentials,
    ) -> Result<&mut BackendProxy, Error> {
        let stale = self
            .proxy
            .as_ref()
            .map_or(false, |p| p.node() != node || p.is_dropped());
        if stale {
            self.proxy = None;
        }

        if self.proxy.is_none() {
            let identity = ProxyIdentity {
                node: self.services.placement.local_node(),
                secret: self.services.config.cluster.proxy_secret.as_deref(),
            };
            self.proxy = Some(BackendProxy::connect(
                &*self.services.connector,
                node,
                identity,
                creds,
            )?);
        }

        self.proxy.as_mut().ok_or(Error::BackendDropped)
    }

    /// If a remote folder is selected and `command` operates on it, send
    /// it through the proxy and return the response.
    pub(super) fn try_forward(
        &mut self,
        tag: &str,
        command: &s::CommandText,
        sender: SendResponse<'_>,
    ) -> Option<s::Response> {
        let node = match self.state {
            SessionState::Selected(_, Selected::Remote(ref remote)) => {
                remote.node.clone()
            }
            _ => return None,
        };

        let verb = command.verb()?;
        match verb.as_str() {
            "CHECK" | "CLOSE" | "UNSELECT" | "EXPUNGE" | "SEARCH" | "FETCH"
            | "STORE" | "COPY" | "UID" | "NOOP" => (),
            _ => return None,
        }

        let result = match self.proxy {
            Some(ref mut proxy) if *proxy.node() == node => {
                proxy.proxy(tag, command, &mut |r| sender(r))
            }
            _ => Err(Error::BackendDropped),
        };

        Some(match result {
            Ok(response) => {
                if ("CLOSE" == verb || "UNSELECT" == verb)
                    && completed_ok(tag, &response)
                {
                    self.deselect();
                }
                response
            }
            Err(e) => {
                if let Error::BackendDropped = e {
                    // The backend session, and the selection with it, is
                    // gone.
                    self.deselect();
                }
                name_failure(
                    &verb,
                    catch_all_error_handling(&self.log_prefix, e),
                )
            }
        })
    }

    pub(super) fn cmd_check(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 0)?;
        selected!(self)?;
        success()
    }

    pub(super) fn cmd_close(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 0)?;
        {
            let store = Arc::clone(&self.services.store);
            let (_, sel) = selected!(self)?;
            if !sel.read_only {
                if let Err(e) = expunge_deleted(&*store, sel, None) {
                    warn!("{} Implicit EXPUNGE failed: {}", self.log_prefix, e);
                }
            }
        }

        self.deselect();
        success()
    }

    pub(super) fn cmd_unselect(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 0)?;
        selected!(self)?;
        self.deselect();
        success()
    }
}

/// Remove every message flagged `\Deleted` (and, if `only` is given, also
/// in `only`) from the store and mark it expunged in the snapshot.
///
/// Returns the UIDs removed.
pub(super) fn expunge_deleted(
    store: &dyn MailboxStore,
    sel: &mut LocalSelection,
    only: Option<&[Uid]>,
) -> Result<Vec<Uid>, Error> {
    sel.path.require(Rights::EXPUNGE)?;

    let doomed = sel
        .snapshot
        .iter()
        .filter(|e| !e.is_expunged() && e.has_flag(&Flag::Deleted))
        .map(|e| e.uid())
        .filter(|uid| only.map_or(true, |only| only.contains(uid)))
        .collect::<Vec<_>>();
    if doomed.is_empty() {
        return Ok(doomed);
    }

    let removed =
        store.expunge(&sel.path.owner, sel.path.info.id, &doomed)?;
    for &uid in &removed {
        sel.snapshot.remove(uid);
    }
    Ok(removed)
}

/// Whether `response`, a proxied completion carrying `tag`, is `OK`.
fn completed_ok(tag: &str, response: &s::Response) -> bool {
    match *response {
        s::Response::Raw(ref line) => line
            .get(tag.len()..tag.len() + 3)
            .map_or(false, |cond| cond.eq_ignore_ascii_case(b" OK")),
        s::Response::Cond(ref cr) => s::RespCondType::Ok == cr.cond,
        _ => false,
    }
}

fn untagged_ok(code: s::RespTextCode) -> s::Response {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Ok,
        code: Some(code),
        quip: None,
    })
}

/// Build the selection state for a local folder.
///
/// The pending set is registered with the node's listener before the
/// folder is read, so that no change can fall between the snapshot and the
/// notifications.
fn load_selection(
    services: &Services,
    mut path: ResolvedPath,
    read_only: bool,
) -> Result<LocalSelection, Error> {
    let store = &*services.store;
    let lease = services.listeners.get(&path.owner)?;
    let pending: SharedPending = Arc::new(Mutex::new(PendingChangeSet::new()));
    let registration =
        lease.listener().register(&path.owner, path.info.id, &pending);

    let mut attempts = 0;
    let mut snapshot = loop {
        attempts += 1;
        let info = current_info(store, &path)?;
        let snapshot = match services.cache.get(&CacheKey::for_folder(&info)) {
            Some(snapshot) => {
                debug!("Snapshot cache hit for {}", CacheKey::for_folder(&info));
                snapshot
            }
            None => build_snapshot(
                store,
                &info,
                services.config.server.page_size,
            )?,
        };

        let after = current_info(store, &path)?;
        let stable = after.modseq == info.modseq;
        path.info = info;
        if stable || attempts >= MAX_LOAD_ATTEMPTS {
            break snapshot;
        }

        debug!("{} changed while loading; retrying", path);
    };

    pending.lock().unwrap().set_floor(snapshot.modseq());
    snapshot.set_recent_cutoff(store.recent_cutoff(
        &path.owner,
        path.info.id,
        !read_only,
    )?);

    Ok(LocalSelection {
        path,
        snapshot,
        read_only,
        pending,
        _registration: registration,
        _lease: lease,
        write_back: Some(WriteBack::new(Arc::clone(&services.cache))),
    })
}

fn current_info(
    store: &dyn MailboxStore,
    path: &ResolvedPath,
) -> Result<FolderInfo, Error> {
    match store.folder_by_path(&path.owner, &path.name)? {
        // A folder recreated under the same name is a different folder
        Some(info) if info.id == path.info.id => Ok(info),
        _ => Err(Error::NxMailbox),
    }
}

/// Read the folder's message list from the store, `page_size` messages at
/// a time (0 for all at once).
fn build_snapshot(
    store: &dyn MailboxStore,
    info: &FolderInfo,
    page_size: usize,
) -> Result<FolderSnapshot, Error> {
    let mut snapshot = FolderSnapshot::new(
        info.owner.clone(),
        info.id,
        info.uid_validity,
        info.modseq,
    );

    let mut cursor = None;
    loop {
        let request = if 0 == page_size {
            PageRequest::default()
        } else {
            PageRequest {
                limit: Some(page_size),
                cursor,
            }
        };

        let page = store.list_messages(&info.owner, info.id, request)?;
        for message in &page.messages {
            snapshot.push_loaded(message);
        }

        cursor = page.messages.last().map(|m| m.uid).or(cursor);
        if !page.has_more || page.messages.is_empty() || 0 == page_size {
            break;
        }
    }

    Ok(snapshot)
}
