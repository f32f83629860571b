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

//! The interface through which the front end reaches mailbox data.
//!
//! The store is authoritative for folder contents; everything the front end
//! keeps in memory is a mirror which is rebuilt or patched from here.

use std::collections::BTreeMap;

use chrono::prelude::*;

use super::model::*;
use crate::support::error::Error;

/// A folder as reported by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderInfo {
    pub id: FolderId,
    /// The canonical name of the owning account.
    pub owner: String,
    /// The folder's path below the owner's root, `/`-delimited, with
    /// `INBOX` in canonical case.
    pub path: String,
    pub uid_validity: u32,
    pub uid_next: u32,
    /// Increases on every change to the folder or its messages.
    pub modseq: u64,
    /// `false` for placeholder folders which only exist to hold children.
    pub selectable: bool,
    /// Rights granted to accounts other than the owner.
    pub acl: BTreeMap<String, Rights>,
}

impl FolderInfo {
    /// The rights `viewer` holds on this folder.
    ///
    /// The owner always holds every right.
    pub fn rights_for(&self, viewer: &str) -> Rights {
        if self.owner.eq_ignore_ascii_case(viewer) {
            Rights::all()
        } else {
            self.acl
                .iter()
                .find(|&(grantee, _)| grantee.eq_ignore_ascii_case(viewer))
                .map(|(_, &rights)| rights)
                .unwrap_or_else(Rights::empty)
        }
    }
}

/// A request for one page of a folder's message list.
///
/// With both fields `None`, the whole folder is returned in one page.
/// Otherwise at most `limit` messages whose UID is strictly greater than
/// `cursor` are returned, in ascending UID order. Continuing from the last
/// UID returned keeps pagination stable while new mail arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub cursor: Option<Uid>,
}

#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    pub messages: Vec<MessageInfo>,
    pub has_more: bool,
}

/// How `set_flags` combines the given flags with the existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
    Replace,
}

/// The outcome of `set_flags` for one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagUpdate {
    /// The message's state after the operation.
    pub info: MessageInfo,
    /// The folder modseq of the change, or `None` if the flags were already
    /// as requested.
    pub modseq: Option<u64>,
}

/// The part of a message a content search looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentField {
    /// The body, after the header block.
    Body,
    /// The entire message, headers included.
    Text,
    Subject,
    From,
    To,
}

/// The mailbox store collaborator.
///
/// Accounts are addressed by canonical name. All operations on a folder are
/// performed on behalf of its owner; callers are responsible for access
/// checks.
pub trait MailboxStore: Send + Sync {
    /// Look up an account by name, returning its canonical name.
    fn lookup_account(&self, name: &str) -> Result<Option<String>, Error>;

    fn folder_by_path(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<Option<FolderInfo>, Error>;

    /// List every folder of `owner`.
    fn folders(&self, owner: &str) -> Result<Vec<FolderInfo>, Error>;

    /// List every folder of any account which grants `viewer` some right.
    fn shared_with(&self, viewer: &str) -> Result<Vec<FolderInfo>, Error>;

    fn create_folder(
        &self,
        owner: &str,
        path: &str,
    ) -> Result<FolderInfo, Error>;

    fn delete_folder(&self, owner: &str, folder: FolderId)
        -> Result<(), Error>;

    fn list_messages(
        &self,
        owner: &str,
        folder: FolderId,
        page: PageRequest,
    ) -> Result<MessagePage, Error>;

    fn append(
        &self,
        owner: &str,
        folder: FolderId,
        flags: &[Flag],
        internal_date: DateTime<FixedOffset>,
        data: &[u8],
    ) -> Result<MessageInfo, Error>;

    /// Apply `op` to the flags of every listed message which still exists,
    /// returning the new state of those messages.
    fn set_flags(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
        op: FlagOp,
        flags: &[Flag],
    ) -> Result<Vec<FlagUpdate>, Error>;

    /// Remove the listed messages, returning the UIDs actually removed.
    fn expunge(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
    ) -> Result<Vec<Uid>, Error>;

    /// Copy messages into another folder, possibly of another account.
    ///
    /// Returns `(source UID, new message)` pairs. Copies get new UIDs in
    /// the destination.
    fn copy(
        &self,
        owner: &str,
        folder: FolderId,
        uids: &[Uid],
        dst_owner: &str,
        dst_folder: FolderId,
    ) -> Result<Vec<(Uid, MessageInfo)>, Error>;

    fn fetch_body(
        &self,
        owner: &str,
        folder: FolderId,
        uid: Uid,
    ) -> Result<Vec<u8>, Error>;

    /// Return the UIDs of messages whose `field` contains `needle`,
    /// case-insensitively.
    fn search_content(
        &self,
        owner: &str,
        folder: FolderId,
        field: ContentField,
        needle: &str,
    ) -> Result<Vec<Uid>, Error>;

    /// Return the folder's recent cutoff: the greatest UID that some earlier
    /// session already reported as `\Recent`.
    ///
    /// If `advance` is set, the cutoff is moved to the current greatest UID
    /// after reading it.
    fn recent_cutoff(
        &self,
        owner: &str,
        folder: FolderId,
        advance: bool,
    ) -> Result<u32, Error>;

    fn get_config(
        &self,
        account: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;

    fn set_config(
        &self,
        account: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), Error>;
}
