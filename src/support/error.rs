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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe key or mailbox name")]
    UnsafeName,
    #[error("Invalid mailbox name")]
    InvalidMailboxName,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Mailbox cannot be selected")]
    MailboxUnselectable,
    #[error("Mailbox has inferiors")]
    MailboxHasInferiors,
    #[error("Mailbox is read-only")]
    MailboxReadOnly,
    #[error("Operation not permitted")]
    PermissionDenied,
    #[error("Operation not allowed on INBOX")]
    BadOperationOnInbox,
    #[error("Unsupported or invalid flag")]
    NxFlag,
    #[error("Message sequence number out of range")]
    SeqnumOutOfRange,
    #[error("Malformed sequence set")]
    BadSequenceSet,
    #[error("Mailbox full")]
    MailboxFull,
    #[error("Message has been expunged")]
    ExpungedMessage,
    #[error("No such account")]
    NxAccount,
    #[error("Bad user name or password")]
    AuthenticationFailed,
    #[error("No backend nodes available")]
    NoNodesAvailable,
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Backend dropped the connection")]
    BackendDropped,
    #[error("Backend protocol violation: {0}")]
    BackendProtocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from talking to another node rather than from
    /// the request itself.
    pub fn is_backend(&self) -> bool {
        matches!(
            *self,
            Error::BackendUnavailable(..)
                | Error::BackendDropped
                | Error::BackendProtocol(..)
        )
    }
}
