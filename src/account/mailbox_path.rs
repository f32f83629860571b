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

//! Resolution of client-supplied mailbox names.
//!
//! Names without an owner prefix refer to the authenticated user's own
//! folders. Another account's folders are addressed as
//! `/home/<owner>/<path>`, which is also how they are reported in `LIST`.

use std::fmt;

use super::auth::Credentials;
use super::model::Rights;
use super::store::{FolderInfo, MailboxStore};
use crate::cluster::balancer::Placement;
use crate::cluster::topology::Node;
use crate::imap::utf7;
use crate::support::error::Error;

/// The namespace prefix under which other users' folders appear.
pub const OTHER_USERS_PREFIX: &str = "/home/";

/// How far `PathResolver::resolve` should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Parse the name and establish the owner, but do not look the folder
    /// up. Wildcards are permitted.
    Unparsed,
    /// Look up a concrete folder.
    Resolved,
}

#[derive(Clone, Debug)]
pub enum MailboxPath {
    Unresolved(PathPattern),
    Resolved(ResolvedPath),
}

/// A parsed but not looked-up mailbox name.
///
/// This may contain wildcards and must never be used for I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    /// The canonical owner, if the name carried an explicit one. `None`
    /// means the authenticated user, or, for a wildcarded owner segment,
    /// that `name` is the full `/home/...` pattern.
    pub owner: Option<String>,
    pub name: String,
}

impl PathPattern {
    pub fn has_wildcards(&self) -> bool {
        has_wildcards(&self.name)
    }

    /// The pattern as it would match against `LIST` names.
    pub fn display_name(&self) -> String {
        match self.owner {
            None => self.name.clone(),
            Some(ref owner) => other_user_name(owner, &self.name),
        }
    }
}

/// A concrete folder together with the caller's rights on it.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub owner: String,
    pub explicit_owner: bool,
    pub name: String,
    pub info: FolderInfo,
    pub rights: Rights,
    /// The node which owns the folder, if it is not this one.
    pub remote: Option<Node>,
}

impl ResolvedPath {
    pub fn is_selectable(&self) -> bool {
        self.info.selectable && self.rights.contains(Rights::READ)
    }

    /// Whether the caller holds every right in `required`.
    pub fn is_writable(&self, required: Rights) -> bool {
        self.rights.contains(required)
    }

    /// Whether a `SELECT` of this folder is read-write.
    pub fn is_read_write(&self) -> bool {
        self.rights.intersects(
            Rights::SEEN
                | Rights::WRITE
                | Rights::INSERT
                | Rights::DELETE
                | Rights::EXPUNGE,
        )
    }

    pub fn require(&self, required: Rights) -> Result<(), Error> {
        if self.is_writable(required) {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }

    pub fn require_selectable(&self) -> Result<(), Error> {
        if !self.info.selectable {
            Err(Error::MailboxUnselectable)
        } else {
            self.require(Rights::READ)
        }
    }

    /// The name by which the client refers to this folder.
    pub fn display_name(&self) -> String {
        if self.explicit_owner {
            other_user_name(&self.owner, &self.name)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

pub fn other_user_name(owner: &str, path: &str) -> String {
    format!("{}{}/{}", OTHER_USERS_PREFIX, owner, path)
}

/// Turns client mailbox names into folders.
///
/// Resolution only reads from the store.
pub struct PathResolver<'a> {
    store: &'a dyn MailboxStore,
    placement: Option<&'a Placement>,
}

impl<'a> PathResolver<'a> {
    pub fn new(
        store: &'a dyn MailboxStore,
        placement: Option<&'a Placement>,
    ) -> Self {
        PathResolver { store, placement }
    }

    /// Resolve the wire-format name `raw` on behalf of `creds`.
    ///
    /// Malformed names and unknown owners fail with `InvalidMailboxName`.
    /// In `Resolved` scope, a folder which does not exist or which the
    /// caller may not even see fails with `NxMailbox`.
    pub fn resolve(
        &self,
        raw: &str,
        scope: Scope,
        creds: &Credentials,
    ) -> Result<MailboxPath, Error> {
        let decoded = utf7::decode(raw);
        let (owner, rest) = match split_owner(&decoded) {
            Some((owner, _)) if has_wildcards(owner) => {
                if Scope::Resolved == scope {
                    return Err(Error::InvalidMailboxName);
                }

                return Ok(MailboxPath::Unresolved(PathPattern {
                    owner: None,
                    name: (*decoded).to_owned(),
                }));
            }
            Some((owner, rest)) => {
                let owner = self
                    .store
                    .lookup_account(owner)?
                    .ok_or(Error::InvalidMailboxName)?;
                (Some(owner), rest)
            }
            None => (None, &*decoded),
        };

        let name = normalise(rest)?;

        if Scope::Unparsed == scope {
            return Ok(MailboxPath::Unresolved(PathPattern { owner, name }));
        }

        if has_wildcards(&name) {
            return Err(Error::InvalidMailboxName);
        }

        let explicit_owner = owner.is_some();
        let owner = owner.unwrap_or_else(|| creds.account.clone());
        let info = self
            .store
            .folder_by_path(&owner, &name)?
            .ok_or(Error::NxMailbox)?;
        let rights = info.rights_for(&creds.account);
        if !rights.intersects(Rights::LOOKUP | Rights::READ) {
            return Err(Error::NxMailbox);
        }

        let remote = match self.placement {
            Some(placement) => placement.remote_node(&owner)?,
            None => None,
        };

        Ok(MailboxPath::Resolved(ResolvedPath {
            owner,
            explicit_owner,
            name: info.path.clone(),
            info,
            rights,
            remote,
        }))
    }

    /// Shorthand for `resolve` in `Resolved` scope.
    pub fn folder(
        &self,
        raw: &str,
        creds: &Credentials,
    ) -> Result<ResolvedPath, Error> {
        match self.resolve(raw, Scope::Resolved, creds)? {
            MailboxPath::Resolved(path) => Ok(path),
            MailboxPath::Unresolved(_) => Err(Error::InvalidMailboxName),
        }
    }

    /// Every folder visible to `creds`, with the name `LIST` reports.
    ///
    /// Shared folders are only included if the caller holds `LOOKUP` on
    /// them.
    pub fn visible(
        &self,
        creds: &Credentials,
    ) -> Result<Vec<(String, FolderInfo)>, Error> {
        let mut ret: Vec<(String, FolderInfo)> = self
            .store
            .folders(&creds.account)?
            .into_iter()
            .map(|info| (info.path.clone(), info))
            .collect();

        for info in self.store.shared_with(&creds.account)? {
            if info.rights_for(&creds.account).contains(Rights::LOOKUP) {
                ret.push((other_user_name(&info.owner, &info.path), info));
            }
        }

        Ok(ret)
    }
}

/// If `name` starts with the other-users prefix, split it into the owner
/// segment and the remainder.
fn split_owner(name: &str) -> Option<(&str, &str)> {
    if !name.starts_with(OTHER_USERS_PREFIX) {
        return None;
    }

    let rest = &name[OTHER_USERS_PREFIX.len()..];
    Some(match rest.find('/') {
        Some(ix) => (&rest[..ix], &rest[ix + 1..]),
        None => (rest, ""),
    })
}

fn has_wildcards(s: &str) -> bool {
    s.contains(|c| '*' == c || '%' == c)
}

/// Strip surrounding delimiters, reject empty components and give `INBOX`
/// its canonical case.
fn normalise(path: &str) -> Result<String, Error> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidMailboxName);
    }

    let mut out = String::with_capacity(trimmed.len());
    for (ix, part) in trimmed.split('/').enumerate() {
        if part.is_empty() || part.chars().any(char::is_control) {
            return Err(Error::InvalidMailboxName);
        }

        if ix > 0 {
            out.push('/');
        }

        if 0 == ix && part.eq_ignore_ascii_case("inbox") {
            out.push_str("INBOX");
        } else {
            out.push_str(part);
        }
    }

    Ok(out)
}

/// Build a predicate matching `LIST` names against a wildcard pattern.
///
/// `*` matches anything, `%` anything but the hierarchy delimiter. The
/// leading `INBOX` component matches case-insensitively.
pub fn list_matcher(pattern: &str) -> impl Fn(&str) -> bool {
    let mut rx = "^".to_owned();
    let mut rest = pattern;
    if rest.get(..5).map_or(false, |s| s.eq_ignore_ascii_case("inbox")) {
        let after = &rest[5..];
        if after.is_empty() || after.starts_with('/') {
            rx.push_str("INBOX");
            rest = after;
        }
    }

    let mut start = 0;
    for (ix, ch) in rest.match_indices(|c| '*' == c || '%' == c) {
        rx.push_str(&regex::escape(&rest[start..ix]));
        rx.push_str(if "*" == ch { ".*" } else { "[^/]*" });
        start = ix + 1;
    }
    rx.push_str(&regex::escape(&rest[start..]));
    rx.push('$');

    // Everything but the wildcards was escaped, so this cannot fail
    let rx = regex::Regex::new(&rx).ok();
    move |s| rx.as_ref().map_or(false, |rx| rx.is_match(s))
}
