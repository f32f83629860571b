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
use std::collections::{BTreeMap, BTreeSet};

use chrono::prelude::*;
use log::info;

use super::defs::*;
use crate::account::auth::Credentials;
use crate::account::mailbox_path::{
    list_matcher, other_user_name, MailboxPath, PathPattern, Scope,
};
use crate::account::model::*;
use crate::account::store::{MailboxStore, PageRequest};
use crate::imap::utf7;
use crate::support::error::Error;

/// Account configuration key under which subscriptions are kept, one name
/// per line.
const SUBSCRIPTIONS_KEY: &str = "subscriptions";

/// How a `LIST` name is presented.
#[derive(Clone, Copy, Debug, Default)]
struct ListEntry {
    selectable: bool,
    exists: bool,
    has_children: bool,
}

impl CommandProcessor {
    pub(super) fn cmd_create(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 1)?;
        let name = astring_arg(args, 0)?;
        let creds = account!(self)?;

        let pattern = self.parse_name(&name, creds)?;
        if pattern.has_wildcards() {
            return Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::Cannot),
                quip: Some(Cow::Borrowed("Wildcards not allowed here")),
            }));
        }

        let owner = match pattern.owner {
            None => creds.account.clone(),
            Some(ref owner) if owner.eq_ignore_ascii_case(&creds.account) => {
                owner.clone()
            }
            Some(ref owner) => {
                // Creating in another account needs the CREATE right on
                // the parent.
                pattern
                    .name
                    .rfind('/')
                    .map(|ix| other_user_name(owner, &pattern.name[..ix]))
                    .ok_or(Error::PermissionDenied)
                    .and_then(|parent| self.resolver().folder(&parent, creds))
                    .and_then(|parent| parent.require(Rights::CREATE))
                    .map_err(map_error! {
                        self,
                        NxMailbox | PermissionDenied =>
                            (No, Some(s::RespTextCode::NoPerm)),
                    })?;
                owner.clone()
            }
        };

        self.services
            .store
            .create_folder(&owner, &pattern.name)
            .map_err(map_error! {
                self,
                MailboxExists => (No, Some(s::RespTextCode::AlreadyExists)),
                InvalidMailboxName | UnsafeName =>
                    (No, Some(s::RespTextCode::Cannot)),
            })?;

        info!("{} Created {}", self.log_prefix, pattern.display_name());
        success()
    }

    pub(super) fn cmd_delete(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 1)?;
        let name = astring_arg(args, 0)?;
        let creds = account!(self)?;

        let path = self
            .resolver()
            .folder(&name, creds)
            .and_then(|path| path.require(Rights::DELETE_FOLDER).map(|_| path))
            .map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::Nonexistent)),
                PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
            })?;

        self.services
            .store
            .delete_folder(&path.owner, path.info.id)
            .map_err(map_error! {
                self,
                BadOperationOnInbox => (No, Some(s::RespTextCode::Cannot)),
                MailboxHasInferiors => (No, Some(s::RespTextCode::InUse)),
                NxMailbox => (No, Some(s::RespTextCode::Nonexistent)),
            })?;

        info!("{} Deleted {}", self.log_prefix, path);
        success()
    }

    pub(super) fn cmd_subscribe(
        &mut self,
        args: &[s::Token],
        subscribe: bool,
    ) -> CmdResult {
        arity(args, 1)?;
        let name = astring_arg(args, 0)?;
        let creds = account!(self)?;

        let pattern = self.parse_name(&name, creds)?;
        let display = pattern.display_name();

        let store = &self.services.store;
        let mut subscriptions =
            subscriptions(&**store, &creds.account).map_err(map_error!(self))?;
        let changed = if subscribe {
            subscriptions.insert(display)
        } else {
            subscriptions.remove(&display)
        };

        if changed {
            let joined = subscriptions.into_iter().collect::<Vec<_>>().join("\n");
            store
                .set_config(
                    &creds.account,
                    SUBSCRIPTIONS_KEY,
                    if joined.is_empty() { None } else { Some(&joined) },
                )
                .map_err(map_error!(self))?;
        }

        success()
    }

    pub(super) fn cmd_list(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
        lsub: bool,
    ) -> CmdResult {
        arity(args, 2)?;
        let reference = astring_arg(args, 0)?;
        let pattern = astring_arg(args, 1)?;
        let creds = account!(self)?;

        let wrap = |ml: s::MailboxList| {
            if lsub {
                s::Response::Lsub(ml)
            } else {
                s::Response::List(ml)
            }
        };

        if pattern.is_empty() {
            // Just reports the hierarchy delimiter
            sender(wrap(s::MailboxList {
                flags: vec!["\\Noselect"],
                name: String::new(),
            }));
            return success();
        }

        let full_pattern = if reference.is_empty() || reference.ends_with('/')
        {
            format!("{}{}", reference, pattern)
        } else {
            format!("{}/{}", reference, pattern)
        };
        let matches = list_matcher(&utf7::decode(&full_pattern));

        let visible = self.resolver().visible(creds).map_err(map_error!(self))?;
        let mut entries = BTreeMap::<String, ListEntry>::new();
        for (name, info) in &visible {
            let entry = entries.entry(name.clone()).or_default();
            entry.exists = true;
            entry.selectable = info.selectable
                && info.rights_for(&creds.account).contains(Rights::READ);

            // Intermediate levels are implied even if they don't exist
            // themselves; `/home` itself is never listed.
            for (ix, _) in name.match_indices('/').filter(|&(ix, _)| ix > 0) {
                let parent = &name[..ix];
                if "/home" != parent {
                    entries.entry(parent.to_owned()).or_default().has_children =
                        true;
                }
            }
        }

        if lsub {
            let subscribed = subscriptions(&*self.services.store, &creds.account)
                .map_err(map_error!(self))?;
            for name in subscribed.iter().filter(|n| matches(n.as_str())) {
                let flags = match entries.get(name) {
                    Some(entry) if entry.selectable => vec![],
                    _ => vec!["\\Noselect"],
                };
                sender(s::Response::Lsub(s::MailboxList {
                    flags,
                    name: name.clone(),
                }));
            }
            return success();
        }

        for (name, entry) in
            entries.iter().filter(|&(n, _)| matches(n.as_str()))
        {
            let mut flags = Vec::new();
            if !entry.selectable || !entry.exists {
                flags.push("\\Noselect");
            }
            flags.push(if entry.has_children {
                "\\HasChildren"
            } else {
                "\\HasNoChildren"
            });
            sender(s::Response::List(s::MailboxList {
                flags,
                name: name.clone(),
            }));
        }

        success()
    }

    pub(super) fn cmd_status(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
    ) -> CmdResult {
        arity(args, 2)?;
        let name = astring_arg(args, 0)?;
        let requested = args[1]
            .as_list()
            .ok_or_else(|| parse_error("Expected a list of status items"))?;
        let creds = account!(self)?;

        let mut items = Vec::new();
        for item in requested {
            let item = item
                .as_atom()
                .ok_or_else(|| parse_error("Bad status item"))?;
            items.push(match item.to_ascii_uppercase().as_str() {
                "MESSAGES" => "MESSAGES",
                "RECENT" => "RECENT",
                "UIDNEXT" => "UIDNEXT",
                "UIDVALIDITY" => "UIDVALIDITY",
                "UNSEEN" => "UNSEEN",
                _ => return Err(parse_error("Unknown status item")),
            });
        }

        let path = self
            .resolver()
            .folder(&name, creds)
            .and_then(|path| path.require_selectable().map(|_| path))
            .map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::Nonexistent)),
                MailboxUnselectable => (No, Some(s::RespTextCode::Cannot)),
                PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
            })?;

        let store = &*self.services.store;
        let messages = store
            .list_messages(&path.owner, path.info.id, PageRequest::default())
            .map_err(map_error!(self))?
            .messages;
        let cutoff = if items.contains(&"RECENT") {
            store
                .recent_cutoff(&path.owner, path.info.id, false)
                .map_err(map_error!(self))?
        } else {
            0
        };

        let values = items
            .into_iter()
            .map(|item| {
                let value = match item {
                    "MESSAGES" => messages.len() as u64,
                    "RECENT" => messages
                        .iter()
                        .filter(|m| m.uid.0.get() > cutoff)
                        .count() as u64,
                    "UIDNEXT" => u64::from(path.info.uid_next),
                    "UIDVALIDITY" => u64::from(path.info.uid_validity),
                    _ => messages
                        .iter()
                        .filter(|m| !m.flags.contains(&Flag::Seen))
                        .count() as u64,
                };
                (item, value)
            })
            .collect();

        sender(s::Response::Status {
            name: path.display_name(),
            items: values,
        });
        success()
    }

    pub(super) fn cmd_append(&mut self, args: &[s::Token]) -> CmdResult {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| parse_error("Wrong number of arguments"))?;
        let name = name
            .as_astring()
            .ok_or_else(|| parse_error("Expected a mailbox name"))?;
        let (data, options) = rest
            .split_last()
            .ok_or_else(|| parse_error("Missing message"))?;
        let data = match *data {
            s::Token::Str(ref data) => data,
            _ => return Err(parse_error("Message must be a string")),
        };

        let mut flags = Vec::new();
        let mut internal_date = None;
        for option in options {
            if let Some(list) = option.as_list() {
                if !flags.is_empty() || internal_date.is_some() {
                    return Err(parse_error("Misplaced flag list"));
                }
                for flag in list {
                    let flag = flag
                        .as_atom()
                        .ok_or_else(|| parse_error("Bad flag"))?
                        .parse::<Flag>()
                        .map_err(map_error! {
                            self,
                            NxFlag | UnsafeName => (Bad, None),
                        })?;
                    flags.push(flag);
                }
            } else if internal_date.is_none() {
                let text = option
                    .as_astring()
                    .ok_or_else(|| parse_error("Bad date"))?;
                internal_date = Some(
                    parse_internal_date(&text)
                        .ok_or_else(|| parse_error("Bad date"))?,
                );
            } else {
                return Err(parse_error("Wrong number of arguments"));
            }
        }

        let creds = account!(self)?;
        let path = self
            .resolver()
            .folder(&name, creds)
            .and_then(|path| path.require(Rights::INSERT).map(|_| path))
            .map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::TryCreate)),
                PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
            })?;

        let internal_date = internal_date
            .unwrap_or_else(|| Utc::now().with_timezone(&FixedOffset::east(0)));
        let message = self
            .services
            .store
            .append(&path.owner, path.info.id, &flags, internal_date, data)
            .map_err(map_error! {
                self,
                MailboxUnselectable => (No, Some(s::RespTextCode::Cannot)),
                MailboxFull => (No, Some(s::RespTextCode::Limit)),
            })?;

        info!(
            "{} Appended UID {} to {} ({} bytes)",
            self.log_prefix,
            message.uid,
            path,
            data.len()
        );
        success()
    }

    pub(super) fn cmd_namespace(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
    ) -> CmdResult {
        arity(args, 0)?;
        account!(self)?;
        sender(s::Response::Namespace);
        success()
    }

    /// Parse a mailbox name for commands that don't need the folder to
    /// exist.
    fn parse_name(
        &self,
        name: &str,
        creds: &Credentials,
    ) -> PartialResult<PathPattern> {
        match self
            .resolver()
            .resolve(name, Scope::Unparsed, creds)
            .map_err(map_error! {
                self,
                InvalidMailboxName | UnsafeName =>
                    (No, Some(s::RespTextCode::Cannot)),
            })? {
            MailboxPath::Unresolved(pattern) => Ok(pattern),
            MailboxPath::Resolved(path) => Ok(PathPattern {
                owner: Some(path.owner),
                name: path.name,
            }),
        }
    }
}

fn subscriptions(
    store: &dyn MailboxStore,
    account: &str,
) -> Result<BTreeSet<String>, Error> {
    Ok(store
        .get_config(account, SUBSCRIPTIONS_KEY)?
        .map(|s| {
            s.lines()
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default())
}

/// Parse an RFC 3501 `date-time`, e.g. ` 7-Feb-1994 21:52:25 -0800`.
fn parse_internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim_start(), "%d-%b-%Y %H:%M:%S %z").ok()
}
