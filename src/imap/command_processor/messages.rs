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
use std::sync::Arc;

use log::info;

use super::defs::*;
use super::select::expunge_deleted;
use crate::account::model::*;
use crate::account::store::FlagOp;
use crate::imap::sequence_set::SequenceSet;
use crate::support::error::Error;

/// The attributes a `FETCH` asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FetchItems {
    uid: bool,
    flags: bool,
    rfc822_size: bool,
    internal_date: bool,
    body: Option<BodyItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BodyItem {
    /// The name the data is returned under.
    name: &'static str,
    peek: bool,
}

impl CommandProcessor {
    pub(super) fn cmd_expunge(
        &mut self,
        args: &[s::Token],
        only: Option<&[Uid]>,
    ) -> CmdResult {
        if only.is_none() {
            arity(args, 0)?;
        }

        let store = Arc::clone(&self.services.store);
        let (_, sel) = selected!(self)?;
        if sel.read_only {
            return Err(read_only());
        }

        let removed = expunge_deleted(&*store, sel, only).map_err(map_error! {
            self,
            PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
        })?;
        if !removed.is_empty() {
            info!(
                "{} Expunged {} message(s) from {}",
                self.log_prefix,
                removed.len(),
                sel.path
            );
        }

        success()
    }

    pub(super) fn cmd_uid_expunge(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 1)?;
        let set = sequence_set_arg(args, 0)?;
        let uids = {
            let (_, sel) = selected!(self)?;
            set.uids(true, &sel.snapshot).map_err(map_error!(self))?
        };

        self.cmd_expunge(args, Some(&uids))
    }

    pub(super) fn cmd_fetch(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
        uid_mode: bool,
    ) -> CmdResult {
        arity(args, 2)?;
        let set = sequence_set_arg(args, 0)?;
        let mut items = parse_fetch_items(&args[1])?;
        items.uid |= uid_mode;

        let store = Arc::clone(&self.services.store);
        let (_, sel) = selected!(self)?;
        let targets = set.uids(uid_mode, &sel.snapshot).map_err(map_error! {
            self,
            SeqnumOutOfRange => (Bad, Some(s::RespTextCode::ClientBug)),
        })?;

        // Reading the body without PEEK marks the message \Seen, if this
        // session may do so.
        let marks_seen = items.body.map_or(false, |b| !b.peek)
            && !sel.read_only
            && sel.path.rights.contains(Rights::SEEN);
        if marks_seen {
            let unseen = targets
                .iter()
                .copied()
                .filter(|&uid| {
                    sel.snapshot
                        .by_uid(uid)
                        .map_or(false, |e| !e.has_flag(&Flag::Seen))
                })
                .collect::<Vec<_>>();
            if !unseen.is_empty() {
                let updated = store
                    .set_flags(
                        &sel.path.owner,
                        sel.path.info.id,
                        &unseen,
                        FlagOp::Add,
                        &[Flag::Seen],
                    )
                    .map_err(map_error!(self))?;
                for update in &updated {
                    sel.snapshot.update_flags_at(
                        update.info.uid,
                        &update.info.flags,
                        update.modseq,
                    );
                }
                items.flags = true;
            }
        }

        let mut missing = false;
        for uid in targets {
            let body = match items.body {
                None => None,
                Some(body) => match store.fetch_body(
                    &sel.path.owner,
                    sel.path.info.id,
                    uid,
                ) {
                    Ok(data) => Some((body.name, data)),
                    Err(Error::ExpungedMessage) => {
                        // Gone from the store, but we haven't caught up
                        // with that yet.
                        missing = true;
                        continue;
                    }
                    Err(e) => {
                        return Err(catch_all_error_handling(
                            &self.log_prefix,
                            e,
                        ))
                    }
                },
            };

            let entry = match sel.snapshot.by_uid(uid) {
                Some(entry) => entry,
                None => continue,
            };

            let mut atts = Vec::new();
            if items.uid {
                atts.push(s::FetchAtt::Uid(uid));
            }
            if items.flags {
                atts.push(s::FetchAtt::Flags {
                    flags: entry.flags().cloned().collect(),
                    recent: entry.is_recent(),
                });
            }
            if items.internal_date {
                atts.push(s::FetchAtt::InternalDate(entry.internal_date()));
            }
            if items.rfc822_size {
                atts.push(s::FetchAtt::Rfc822Size(entry.size()));
            }
            if let Some((name, data)) = body {
                atts.push(s::FetchAtt::Body { name, data });
            }

            sender(s::Response::Fetch {
                seqnum: entry.seqnum(),
                atts,
            });
            if items.flags {
                sel.snapshot.acknowledge_flags(uid);
            }
        }

        if missing {
            Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: None,
                quip: Some(Cow::Borrowed("Some messages have been expunged")),
            }))
        } else {
            success()
        }
    }

    pub(super) fn cmd_store(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
        uid_mode: bool,
    ) -> CmdResult {
        arity(args, 3)?;
        let set = sequence_set_arg(args, 0)?;
        let (op, silent) = parse_store_item(atom_arg(args, 1)?)?;
        let flags = parse_flags(&args[2]).map_err(map_error! {
            self,
            NxFlag | UnsafeName => (Bad, None),
        })?;

        let store = Arc::clone(&self.services.store);
        let (_, sel) = selected!(self)?;
        if sel.read_only {
            return Err(read_only());
        }

        let mut required = if FlagOp::Replace == op {
            Rights::WRITE
        } else {
            Rights::empty()
        };
        for flag in &flags {
            required |= match *flag {
                Flag::Seen => Rights::SEEN,
                Flag::Deleted => Rights::DELETE,
                _ => Rights::WRITE,
            };
        }
        sel.path.require(required).map_err(map_error! {
            self,
            PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
        })?;

        let uids = set.uids(uid_mode, &sel.snapshot).map_err(map_error! {
            self,
            SeqnumOutOfRange => (Bad, Some(s::RespTextCode::ClientBug)),
        })?;
        if uids.is_empty() {
            return success();
        }

        let updated = store
            .set_flags(&sel.path.owner, sel.path.info.id, &uids, op, &flags)
            .map_err(map_error!(self))?;

        for update in &updated {
            let message = &update.info;
            sel.snapshot.update_flags_at(
                message.uid,
                &message.flags,
                update.modseq,
            );
            if !silent {
                if let Some(entry) = sel.snapshot.by_uid(message.uid) {
                    let mut atts = Vec::new();
                    if uid_mode {
                        atts.push(s::FetchAtt::Uid(message.uid));
                    }
                    atts.push(s::FetchAtt::Flags {
                        flags: entry.flags().cloned().collect(),
                        recent: entry.is_recent(),
                    });
                    sender(s::Response::Fetch {
                        seqnum: entry.seqnum(),
                        atts,
                    });
                }
            }
            sel.snapshot.acknowledge_flags(message.uid);
        }

        success()
    }

    pub(super) fn cmd_copy(
        &mut self,
        args: &[s::Token],
        uid_mode: bool,
    ) -> CmdResult {
        arity(args, 2)?;
        let set = sequence_set_arg(args, 0)?;
        let name = astring_arg(args, 1)?;

        let dst = {
            let creds = account!(self)?;
            self.resolver().folder(&name, creds).map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::TryCreate)),
                PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
            })?
        };
        // Messages only move between folders of the same node
        if let Some(ref node) = dst.remote {
            return Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::Cannot),
                quip: Some(Cow::Owned(format!(
                    "{} is served by node {}",
                    dst, node
                ))),
            }));
        }
        dst.require(Rights::INSERT).map_err(map_error! {
            self,
            PermissionDenied => (No, Some(s::RespTextCode::NoPerm)),
        })?;

        let store = Arc::clone(&self.services.store);
        let (_, sel) = selected!(self)?;
        let uids = set.uids(uid_mode, &sel.snapshot).map_err(map_error! {
            self,
            SeqnumOutOfRange => (Bad, Some(s::RespTextCode::ClientBug)),
        })?;
        if uids.is_empty() {
            return success();
        }

        let copied = store
            .copy(
                &sel.path.owner,
                sel.path.info.id,
                &uids,
                &dst.owner,
                dst.info.id,
            )
            .map_err(map_error! {
                self,
                MailboxUnselectable => (No, Some(s::RespTextCode::Cannot)),
                MailboxFull => (No, Some(s::RespTextCode::Limit)),
            })?;

        info!(
            "{} Copied {} message(s) from {} to {}",
            self.log_prefix,
            copied.len(),
            sel.path,
            dst
        );
        success()
    }
}

pub(super) fn sequence_set_arg(
    args: &[s::Token],
    ix: usize,
) -> PartialResult<SequenceSet> {
    args.get(ix)
        .and_then(s::Token::as_atom)
        .and_then(|set| SequenceSet::parse(set).ok())
        .ok_or_else(|| parse_error("Malformed sequence set"))
}

fn read_only() -> s::Response {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::No,
        code: Some(s::RespTextCode::ReadOnly),
        quip: Some(Cow::Borrowed("Mailbox is read-only")),
    })
}

fn parse_fetch_items(token: &s::Token) -> PartialResult<FetchItems> {
    let atts = match token.as_list() {
        Some(list) if list.is_empty() => {
            return Err(parse_error("Empty fetch attribute list"))
        }
        Some(list) => list,
        None => std::slice::from_ref(token),
    };

    let mut items = FetchItems::default();
    for att in atts {
        let att = att
            .as_atom()
            .ok_or_else(|| parse_error("Bad fetch attribute"))?;
        match att.to_ascii_uppercase().as_str() {
            "FAST" => {
                items.flags = true;
                items.internal_date = true;
                items.rfc822_size = true;
            }
            "FLAGS" => items.flags = true,
            "UID" => items.uid = true,
            "RFC822.SIZE" => items.rfc822_size = true,
            "INTERNALDATE" => items.internal_date = true,
            "RFC822" => {
                items.body = Some(BodyItem {
                    name: "RFC822",
                    peek: false,
                })
            }
            "BODY[]" => {
                items.body = Some(BodyItem {
                    name: "BODY[]",
                    peek: false,
                })
            }
            "BODY.PEEK[]" => {
                items.body = Some(BodyItem {
                    name: "BODY[]",
                    peek: items.body.map_or(true, |b| b.peek),
                })
            }
            _ => return Err(parse_error("Unsupported fetch attribute")),
        }
    }

    Ok(items)
}

/// Parse the data item name of `STORE` into the operation and whether it
/// is silent.
fn parse_store_item(item: &str) -> PartialResult<(FlagOp, bool)> {
    let upper = item.to_ascii_uppercase();
    let (name, silent) = match upper.strip_suffix(".SILENT") {
        Some(name) => (name, true),
        None => (&*upper, false),
    };

    let op = match name {
        "FLAGS" => FlagOp::Replace,
        "+FLAGS" => FlagOp::Add,
        "-FLAGS" => FlagOp::Remove,
        _ => return Err(parse_error("Unknown STORE item")),
    };
    Ok((op, silent))
}

/// Parse a flag list, or a single bare flag.
fn parse_flags(token: &s::Token) -> Result<Vec<Flag>, Error> {
    let tokens =
        token.as_list().unwrap_or_else(|| std::slice::from_ref(token));
    tokens
        .iter()
        .map(|t| t.as_atom().ok_or(Error::NxFlag)?.parse::<Flag>())
        .collect()
}
