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

//! An in-process `MailboxStore`.
//!
//! Every node in the process shares the same instance, which makes it the
//! authoritative store for all of them. It is also the change feed: every
//! mutation is published to all subscribers, in order, while the store lock
//! is still held.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::prelude::*;
use crossbeam::channel::{self, Receiver, Sender};
use log::info;

use super::model::*;
use super::store::*;
use crate::cluster::listener::ChangeFeed;
use crate::cluster::pending::{ChangeEvent, ChangeKind, ChangeMask};
use crate::cluster::topology::Node;
use crate::support::error::Error;
use crate::support::system_config::UserConfig;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by lower-case account name.
    accounts: BTreeMap<String, AccountData>,
    next_folder_id: u32,
    next_uid_validity: u32,
}

struct AccountData {
    name: String,
    folders: BTreeMap<FolderId, FolderData>,
    config: BTreeMap<String, String>,
}

struct FolderData {
    info: FolderInfo,
    messages: BTreeMap<Uid, StoredMessage>,
    recent_cutoff: u32,
}

struct StoredMessage {
    info: MessageInfo,
    data: Arc<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the given users, their folders and grants.
    pub fn from_config(users: &[UserConfig]) -> Result<Self, Error> {
        let this = Self::new();
        for user in users {
            this.add_account(&user.name)?;
            for folder in &user.folders {
                if this.folder_by_path(&user.name, folder)?.is_none() {
                    this.create_folder(&user.name, folder)?;
                }
            }
        }

        for user in users {
            for grant in &user.grants {
                this.grant(
                    &user.name,
                    &grant.folder,
                    &grant.grantee,
                    Rights::parse_acl(&grant.rights)?,
                )?;
            }
        }

        Ok(this)
    }

    /// Create an account with an empty INBOX.
    pub fn add_account(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let key = name.to_lowercase();
        if inner.accounts.contains_key(&key) {
            return Ok(());
        }

        inner.accounts.insert(
            key,
            AccountData {
                name: name.to_owned(),
                folders: BTreeMap::new(),
                config: BTreeMap::new(),
            },
        );
        inner.create_folder_locked(name, "INBOX")?;
        info!("Created account {}", name);
        Ok(())
    }

    /// Give `grantee` exactly `rights` on `owner`'s folder `path`.
    pub fn grant(
        &self,
        owner: &str,
        path: &str,
        grantee: &str,
        rights: Rights,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner.account_mut(owner)?;
        let folder = account
            .folders
            .values_mut()
            .find(|f| path_eq(&f.info.path, path))
            .ok_or(Error::NxMailbox)?;

        if rights.is_empty() {
            folder.info.acl.remove(&grantee.to_lowercase());
        } else {
            folder.info.acl.insert(grantee.to_lowercase(), rights);
        }
        Ok(())
    }

    /// Append a message to `owner`'s folder `path`.
    #[cfg(test)]
    pub fn deliver(
        &self,
        owner: &str,
        path: &str,
        flags: &[Flag],
        data: &[u8],
    ) -> MessageInfo {
        let folder = self.folder_by_path(owner, path).unwrap().unwrap();
        self.append(
            owner,
            folder.id,
            flags,
            FixedOffset::east(0).timestamp(1_600_000_000, 0),
            data,
        )
        .unwrap()
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers
            .retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }
}

fn path_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|ix| &path[..ix])
}

impl Inner {
    fn account(&self, name: &str) -> Result<&AccountData, Error> {
        self.accounts
            .get(&name.to_lowercase())
            .ok_or(Error::NxAccount)
    }

    fn account_mut(&mut self, name: &str) -> Result<&mut AccountData, Error> {
        self.accounts
            .get_mut(&name.to_lowercase())
            .ok_or(Error::NxAccount)
    }

    fn folder(&self, owner: &str, id: FolderId) -> Result<&FolderData, Error> {
        self.account(owner)?
            .folders
            .get(&id)
            .ok_or(Error::NxMailbox)
    }

    fn folder_mut(
        &mut self,
        owner: &str,
        id: FolderId,
    ) -> Result<&mut FolderData, Error> {
        self.account_mut(owner)?
            .folders
            .get_mut(&id)
            .ok_or(Error::NxMailbox)
    }

    fn create_folder_locked(
        &mut self,
        owner: &str,
        path: &str,
    ) -> Result<FolderInfo, Error> {
        if self
            .account(owner)?
            .folders
            .values()
            .any(|f| path_eq(&f.info.path, path))
        {
            return Err(Error::MailboxExists);
        }

        if let Some(parent) = parent_of(path) {
            let parent_exists = self
                .account(owner)?
                .folders
                .values()
                .any(|f| path_eq(&f.info.path, parent));
            if !parent_exists {
                self.create_folder_locked(owner, parent)?;
            }
        }

        self.next_folder_id += 1;
        self.next_uid_validity += 1;
        let id = FolderId(self.next_folder_id);
        let uid_validity = self.next_uid_validity;
        let account = self.account_mut(owner)?;
        let info = FolderInfo {
            id,
            owner: account.name.clone(),
            path: path.to_owned(),
            uid_validity,
            uid_next: 1,
            modseq: 1,
            selectable: true,
            acl: BTreeMap::new(),
        };

        account.folders.insert(
            id,
            FolderData {
                info: info.clone(),
                messages: BTreeMap::new(),
                recent_cutoff: 0,
            },
        );
        Ok(info)
    }

    fn append_locked(
        &mut self,
        owner: &str,
        folder: FolderId,
        flags: &[Flag],
        internal_date: DateTime<FixedOffset>,
        data: Arc<Vec<u8>>,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<MessageInfo, Error> {
        let account_name = self.account(owner)?.name.clone();
        let folder = self.folder_mut(owner, folder)?;
        if !folder.info.selectable {
            return Err(Error::MailboxUnselectable);
        }

        let uid = Uid::of(folder.info.uid_next).ok_or(Error::MailboxFull)?;
        let mut unique_flags: Vec<Flag> = Vec::new();
        for flag in flags {
            if !unique_flags.contains(flag) {
                unique_flags.push(flag.clone());
            }
        }

        let info = MessageInfo {
            uid,
            flags: unique_flags,
            size: data.len() as u32,
            internal_date,
        };

        folder.info.uid_next = folder.info.uid_next.saturating_add(1);
        folder.info.modseq += 1;
        folder.messages.insert(
            uid,
            StoredMessage {
                info: info.clone(),
                data,
            },
        );

        events.push(ChangeEvent {
            account: account_name,
            folder: folder.info.id,
            modseq: folder.info.modseq,
            kind: ChangeKind::Created(info.clone()),
        });
        Ok(info)
    }
}

impl MailboxStore for MemoryStore {
    fn lookup_account(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .get(&name.to_lowercase())
            .map(|a| a.name.clone()))
    }

    fn folder_by_path(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<Option<FolderInfo>, Error> {
        let inner = self.inner.lock().unwrap();
        let account = match inner.accounts.get(&owner.to_lowercase()) {
            Some(a) => a,
            None => return Ok(None),
        };

        Ok(account
            .folders
            .values()
            .find(|f| path_eq(&f.info.path, path))
            .map(|f| f.info.clone()))
    }

    fn folders(&self, owner: &str) -> Result<Vec<FolderInfo>, Error> {
        let inner = self.inner.lock().unwrap();
        let mut folders = inner
            .account(owner)?
            .folders
            .values()
            .map(|f| f.info.clone())
            .collect::<Vec<_>>();
        folders.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(folders)
    }

    fn shared_with(&self, viewer: &str) -> Result<Vec<FolderInfo>, Error> {
        let viewer = viewer.to_lowercase();
        let inner = self.inner.lock().unwrap();
        let mut folders = Vec::new();
        for (name, account) in &inner.accounts {
            if *name == viewer {
                continue;
            }

            folders.extend(
                account
                    .folders
                    .values()
                    .filter(|f| f.info.acl.contains_key(&viewer))
                    .map(|f| f.info.clone()),
            );
        }

        folders.sort_by(|a, b| {
            a.owner.cmp(&b.owner).then_with(|| a.path.cmp(&b.path))
        });
        Ok(folders)
    }

    fn create_folder(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<FolderInfo, Error> {
        self.inner
            .lock()
            .unwrap()
            .create_folder_locked(owner, path)
    }

    fn delete_folder(
        &self,
        owner: &str,
        folder: FolderId,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner.account_mut(owner)?;
        let data = account.folders.get(&folder).ok_or(Error::NxMailbox)?;
        if data.info.path.eq_ignore_ascii_case("INBOX") {
            return Err(Error::BadOperationOnInbox);
        }

        let prefix = format!("{}/", data.info.path.to_lowercase());
        let has_children = account
            .folders
            .values()
            .any(|f| f.info.path.to_lowercase().starts_with(&prefix));

        let mut events = Vec::new();
        if has_children {
            // The name stays as a placeholder for its children; only the
            // messages go.
            let data =
                account.folders.get_mut(&folder).ok_or(Error::NxMailbox)?;
            if !data.info.selectable {
                return Err(Error::MailboxHasInferiors);
            }

            data.info.selectable = false;
            for uid in data.messages.keys().copied().collect::<Vec<_>>() {
                data.messages.remove(&uid);
                data.info.modseq += 1;
                events.push(ChangeEvent {
                    account: account.name.clone(),
                    folder,
                    modseq: data.info.modseq,
                    kind: ChangeKind::Deleted(uid),
                });
            }
        } else {
            account.folders.remove(&folder);
        }

        self.publish(events);
        Ok(())
    }

    fn list_messages(
        &self,
        owner: &str,
        folder: FolderId,
        page: PageRequest,
    ) -> Result<MessagePage, Error> {
        let inner = self.inner.lock().unwrap();
        let folder = inner.folder(owner, folder)?;

        let after = page.cursor.map(u32::from).unwrap_or(0);
        let limit = page.limit.unwrap_or(usize::MAX);
        let mut candidates = folder
            .messages
            .values()
            .filter(|m| u32::from(m.info.uid) > after)
            .map(|m| m.info.clone());

        let messages = candidates.by_ref().take(limit).collect::<Vec<_>>();
        let has_more = candidates.next().is_some();
        Ok(MessagePage { messages, has_more })
    }

    fn append(
        &self,
        owner: &str,
        folder: FolderId,
        flags: &[Flag],
        internal_date: DateTime<FixedOffset>,
        data: &[u8],
    ) -> Result<MessageInfo, Error> {
        let mut inner = self.inner.lock().unwrap();
        let mut events = Vec::new();
        let info = inner.append_locked(
            owner,
            folder,
            flags,
            internal_date,
            Arc::new(data.to_vec()),
            &mut events,
        )?;
        self.publish(events);
        Ok(info)
    }

    fn set_flags(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
        op: FlagOp,
        flags: &[Flag],
    ) -> Result<Vec<FlagUpdate>, Error> {
        let mut inner = self.inner.lock().unwrap();
        let account_name = inner.account(owner)?.name.clone();
        let folder = inner.folder_mut(owner, folder)?;

        let mut events = Vec::new();
        let mut result = Vec::new();
        for uid in uids {
            let message = match folder.messages.get_mut(uid) {
                Some(m) => m,
                None => continue,
            };

            let mut new_flags = match op {
                FlagOp::Replace => Vec::new(),
                FlagOp::Add | FlagOp::Remove => message.info.flags.clone(),
            };
            match op {
                FlagOp::Add | FlagOp::Replace => {
                    for flag in flags {
                        if !new_flags.contains(flag) {
                            new_flags.push(flag.clone());
                        }
                    }
                }
                FlagOp::Remove => new_flags.retain(|f| !flags.contains(f)),
            }

            let changed = new_flags.len() != message.info.flags.len()
                || new_flags.iter().any(|f| !message.info.flags.contains(f));
            let mut modseq = None;
            if changed {
                message.info.flags = new_flags;
                folder.info.modseq += 1;
                modseq = Some(folder.info.modseq);
                events.push(ChangeEvent {
                    account: account_name.clone(),
                    folder: folder.info.id,
                    modseq: folder.info.modseq,
                    kind: ChangeKind::Modified(
                        message.info.clone(),
                        ChangeMask::FLAGS,
                    ),
                });
            }

            result.push(FlagUpdate {
                info: message.info.clone(),
                modseq,
            });
        }

        self.publish(events);
        Ok(result)
    }

    fn expunge(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
    ) -> Result<Vec<Uid>, Error> {
        let mut inner = self.inner.lock().unwrap();
        let account_name = inner.account(owner)?.name.clone();
        let folder = inner.folder_mut(owner, folder)?;

        let mut events = Vec::new();
        let mut removed = Vec::new();
        for &uid in uids {
            if folder.messages.remove(&uid).is_none() {
                continue;
            }

            folder.info.modseq += 1;
            removed.push(uid);
            events.push(ChangeEvent {
                account: account_name.clone(),
                folder: folder.info.id,
                modseq: folder.info.modseq,
                kind: ChangeKind::Deleted(uid),
            });
        }

        self.publish(events);
        Ok(removed)
    }

    fn copy(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
        dst_owner: &str,
        dst_folder: FolderId,
    ) -> Result<Vec<(Uid, MessageInfo)>, Error> {
        let mut inner = self.inner.lock().unwrap();
        // Fail on a bad destination before copying anything.
        inner.folder(dst_owner, dst_folder)?;

        let sources = {
            let src = inner.folder(owner, folder)?;
            uids.iter()
                .filter_map(|uid| src.messages.get(uid))
                .map(|m| (m.info.clone(), Arc::clone(&m.data)))
                .collect::<Vec<_>>()
        };

        let mut events = Vec::new();
        let mut copied = Vec::with_capacity(sources.len());
        for (info, data) in sources {
            let new = inner.append_locked(
                dst_owner,
                dst_folder,
                &info.flags,
                info.internal_date,
                data,
                &mut events,
            )?;
            copied.push((info.uid, new));
        }

        self.publish(events);
        Ok(copied)
    }

    fn fetch_body(
        &self,
        owner: &str,
        folder: FolderId,
        uid: Uid,
    ) -> Result<Vec<u8>, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .folder(owner, folder)?
            .messages
            .get(&uid)
            .map(|m| m.data.to_vec())
            .ok_or(Error::ExpungedMessage)
    }

    fn search_content(
        &self,
        owner: &str,
        folder: FolderId,
        field: ContentField,
        needle: &str,
    ) -> Result<Vec<Uid>, Error> {
        let needle = needle.to_lowercase();
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .folder(owner, folder)?
            .messages
            .values()
            .filter(|m| content_matches(&m.data, field, &needle))
            .map(|m| m.info.uid)
            .collect())
    }

    fn recent_cutoff(
        &self,
        owner: &str,
        folder: FolderId,
        advance: bool,
    ) -> Result<u32, Error> {
        let mut inner = self.inner.lock().unwrap();
        let folder = inner.folder_mut(owner, folder)?;
        let cutoff = folder.recent_cutoff;
        if advance {
            folder.recent_cutoff = folder.info.uid_next.saturating_sub(1);
        }
        Ok(cutoff)
    }

    fn get_config(
        &self,
        account: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .account(account)?
            .config
            .get(key)
            .cloned())
    }

    fn set_config(
        &self,
        account: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let config = &mut inner.account_mut(account)?.config;
        match value {
            Some(value) => {
                config.insert(key.to_owned(), value.to_owned());
            }
            None => {
                config.remove(key);
            }
        }
        Ok(())
    }
}

impl ChangeFeed for MemoryStore {
    /// Every node sees every change, since this store backs all of them.
    fn subscribe(&self, _node: &Node) -> Result<Receiver<ChangeEvent>, Error> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }
}

/// Split a message into its header block and body.
fn split_message(data: &[u8]) -> (&[u8], &[u8]) {
    let mut ix = 0;
    while let Some(lf) = memchr::memchr(b'\n', &data[ix..]) {
        let line_start = ix;
        ix += lf + 1;
        let line = &data[line_start..ix];
        if b"\r\n" == line || b"\n" == line {
            return (&data[..line_start], &data[ix..]);
        }
    }

    (data, &[])
}

/// Find the unfolded value of the first header called `name`.
fn header_value(headers: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(headers);
    let mut value: Option<String> = None;
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if let Some(ref mut v) = value {
            if line.starts_with(' ') || line.starts_with('\t') {
                v.push_str(line);
                continue;
            }
            break;
        }

        if let Some(colon) = line.find(':') {
            if line[..colon].trim().eq_ignore_ascii_case(name) {
                value = Some(line[colon + 1..].to_owned());
            }
        }
    }

    value
}

fn content_matches(data: &[u8], field: ContentField, needle: &str) -> bool {
    let (headers, body) = split_message(data);
    let haystack = match field {
        ContentField::Text => String::from_utf8_lossy(data).into_owned(),
        ContentField::Body => String::from_utf8_lossy(body).into_owned(),
        ContentField::Subject => {
            header_value(headers, "Subject").unwrap_or_default()
        }
        ContentField::From => header_value(headers, "From").unwrap_or_default(),
        ContentField::To => header_value(headers, "To").unwrap_or_default(),
    };

    haystack.to_lowercase().contains(needle)
}
