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
use std::slice;
use std::sync::Arc;

use super::defs::*;
use crate::account::model::*;
use crate::account::search::SearchPredicate;
use crate::account::snapshot::FolderSnapshot;
use crate::account::store::ContentField;
use crate::imap::sequence_set::SequenceSet;
use crate::support::error::Error;

impl CommandProcessor {
    pub(super) fn cmd_search(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
        uid_mode: bool,
    ) -> CmdResult {
        let args = match args {
            [charset, name, rest @ ..] if charset.is_atom("CHARSET") => {
                let name = name
                    .as_astring()
                    .ok_or_else(|| parse_error("Bad charset"))?;
                if !name.eq_ignore_ascii_case("UTF-8")
                    && !name.eq_ignore_ascii_case("US-ASCII")
                {
                    return Err(s::Response::Cond(s::CondResponse {
                        cond: s::RespCondType::No,
                        code: Some(s::RespTextCode::Cannot),
                        quip: Some(Cow::Borrowed("Unsupported charset")),
                    }));
                }
                rest
            }
            args => args,
        };

        if args.is_empty() {
            return Err(parse_error("Missing search criteria"));
        }

        let store = Arc::clone(&self.services.store);
        let (_, sel) = selected!(self)?;
        let mut predicate = parse_criteria(args, &sel.snapshot)?;

        if predicate.needs_content() {
            let path = &sel.path;
            predicate
                .resolve_content(&mut |field, needle| {
                    store.search_content(&path.owner, path.info.id, field, needle)
                })
                .map_err(map_error!(self))?;
        }

        let hits = predicate
            .search(&sel.snapshot)
            .into_iter()
            .map(|e| {
                if uid_mode {
                    u32::from(e.uid())
                } else {
                    u32::from(e.seqnum())
                }
            })
            .collect();
        sender(s::Response::Search(hits));
        success()
    }
}

/// How deeply `NOT`, `OR` and parenthesised groups may nest.
const MAX_SEARCH_DEPTH: usize = 64;

/// Parse the whole list of search keys, which are implicitly ANDed.
fn parse_criteria(
    args: &[s::Token],
    snapshot: &FolderSnapshot,
) -> PartialResult<SearchPredicate> {
    parse_keys(args, snapshot, 0)
}

fn parse_keys(
    args: &[s::Token],
    snapshot: &FolderSnapshot,
    depth: usize,
) -> PartialResult<SearchPredicate> {
    let mut tokens = args.iter();
    let mut keys = Vec::new();
    while tokens.len() > 0 {
        keys.push(parse_key(&mut tokens, snapshot, depth)?);
    }

    Ok(if 1 == keys.len() {
        keys.remove(0)
    } else {
        SearchPredicate::And(keys)
    })
}

fn parse_key(
    tokens: &mut slice::Iter<'_, s::Token>,
    snapshot: &FolderSnapshot,
    depth: usize,
) -> PartialResult<SearchPredicate> {
    if depth > MAX_SEARCH_DEPTH {
        return Err(parse_error("Search criteria nested too deeply"));
    }

    let token = tokens
        .next()
        .ok_or_else(|| parse_error("Incomplete search key"))?;

    if let Some(group) = token.as_list() {
        if group.is_empty() {
            return Err(parse_error("Empty search group"));
        }
        return parse_keys(group, snapshot, depth + 1);
    }

    let key = token
        .as_atom()
        .ok_or_else(|| parse_error("Expected a search key"))?
        .to_ascii_uppercase();

    let flag = |f: Flag| SearchPredicate::flag(f);
    Ok(match key.as_str() {
        "ALL" => SearchPredicate::all(),
        "ANSWERED" => flag(Flag::Answered),
        "DELETED" => flag(Flag::Deleted),
        "DRAFT" => flag(Flag::Draft),
        "FLAGGED" => flag(Flag::Flagged),
        "SEEN" => flag(Flag::Seen),
        "UNANSWERED" => flag(Flag::Answered).not(),
        "UNDELETED" => flag(Flag::Deleted).not(),
        "UNDRAFT" => flag(Flag::Draft).not(),
        "UNFLAGGED" => flag(Flag::Flagged).not(),
        "UNSEEN" => flag(Flag::Seen).not(),
        "KEYWORD" => flag(keyword_arg(tokens)?),
        "UNKEYWORD" => flag(keyword_arg(tokens)?).not(),
        "RECENT" => SearchPredicate::recent(),
        "NEW" => SearchPredicate::And(vec![
            SearchPredicate::recent(),
            flag(Flag::Seen).not(),
        ]),
        "OLD" => SearchPredicate::recent().not(),
        "LARGER" => SearchPredicate::Larger(number_arg(tokens)?),
        "SMALLER" => SearchPredicate::Smaller(number_arg(tokens)?),
        "BODY" => content(ContentField::Body, tokens)?,
        "TEXT" => content(ContentField::Text, tokens)?,
        "SUBJECT" => content(ContentField::Subject, tokens)?,
        "FROM" => content(ContentField::From, tokens)?,
        "TO" => content(ContentField::To, tokens)?,
        "NOT" => parse_key(tokens, snapshot, depth + 1)?.not(),
        "OR" => {
            let a = parse_key(tokens, snapshot, depth + 1)?;
            let b = parse_key(tokens, snapshot, depth + 1)?;
            a.or(b)
        }
        "UID" => {
            let set = tokens
                .next()
                .and_then(s::Token::as_atom)
                .ok_or_else(|| parse_error("UID needs a sequence set"))?;
            uid_set(set, true, snapshot)?
        }
        _ => uid_set(&key, false, snapshot)?,
    })
}

/// Convert a sequence set in the given addressing mode to the UIDs it
/// currently denotes.
fn uid_set(
    set: &str,
    uid_mode: bool,
    snapshot: &FolderSnapshot,
) -> PartialResult<SearchPredicate> {
    let set = SequenceSet::parse(set)
        .map_err(|_| parse_error("Unknown search key"))?;
    let uids = set.uids(uid_mode, snapshot).map_err(|e| match e {
        Error::SeqnumOutOfRange => s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Bad,
            code: Some(s::RespTextCode::ClientBug),
            quip: Some(Cow::Owned(e.to_string())),
        }),
        _ => parse_error("Bad sequence set"),
    })?;
    Ok(SearchPredicate::UidIn(uids.into_iter().collect()))
}

fn keyword_arg(tokens: &mut slice::Iter<'_, s::Token>) -> PartialResult<Flag> {
    match tokens
        .next()
        .and_then(s::Token::as_atom)
        .map(str::parse::<Flag>)
    {
        Some(Ok(kw @ Flag::Keyword(_))) => Ok(kw),
        _ => Err(parse_error("Bad keyword")),
    }
}

fn number_arg(tokens: &mut slice::Iter<'_, s::Token>) -> PartialResult<u32> {
    tokens
        .next()
        .and_then(s::Token::as_atom)
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| parse_error("Expected a number"))
}

fn content(
    field: ContentField,
    tokens: &mut slice::Iter<'_, s::Token>,
) -> PartialResult<SearchPredicate> {
    let needle = tokens
        .next()
        .and_then(s::Token::as_astring)
        .ok_or_else(|| parse_error("Expected a search string"))?;
    Ok(SearchPredicate::content(field, needle.into_owned()))
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;

    fn snapshot() -> FolderSnapshot {
        let mut s = FolderSnapshot::new("azure".to_owned(), FolderId(1), 1, 1);
        let flags: [&[Flag]; 5] = [
            &[Flag::Seen],
            &[Flag::Deleted],
            &[],
            &[Flag::Seen, Flag::Keyword("$Junk".to_owned())],
            &[],
        ];
        for (ix, flags) in flags.iter().enumerate() {
            s.push_loaded(&MessageInfo {
                uid: Uid::u(ix as u32 + 10),
                flags: flags.to_vec(),
                size: (ix as u32 + 1) * 1000,
                internal_date: FixedOffset::east(0).timestamp(0, 0),
            });
        }
        s.set_recent_cutoff(12);
        s
    }

    fn search(criteria: &str) -> Vec<u32> {
        let s = snapshot();
        let line = format!("A1 SEARCH {}", criteria);
        let cmd = s::CommandText::of(&line).parse().unwrap();
        parse_criteria(&cmd.args, &s)
            .unwrap()
            .search(&s)
            .into_iter()
            .map(|e| u32::from(e.seqnum()))
            .collect()
    }

    /// Whether the criteria are rejected, either by the tokenizer or when
    /// building the predicate.
    fn fails(criteria: &str) -> bool {
        let s = snapshot();
        let line = format!("A1 SEARCH {}", criteria);
        match s::CommandText::of(&line).parse() {
            Ok(cmd) => parse_criteria(&cmd.args, &s).is_err(),
            Err(_) => true,
        }
    }

    #[test]
    fn flag_keys() {
        assert_eq!(vec![1, 2, 3, 4, 5], search("ALL"));
        assert_eq!(vec![1, 4], search("SEEN"));
        assert_eq!(vec![2, 3, 5], search("unseen"));
        assert_eq!(vec![2], search("DELETED"));
        assert_eq!(vec![4], search("KEYWORD $junk"));
        assert_eq!(vec![1, 2, 3, 5], search("UNKEYWORD $Junk"));
        assert_eq!(vec![4, 5], search("RECENT"));
        assert_eq!(vec![5], search("NEW"));
        assert_eq!(vec![1, 2, 3], search("OLD"));
    }

    #[test]
    fn sets_sizes_and_composition() {
        assert_eq!(vec![2, 3, 4], search("2:4"));
        assert_eq!(vec![5], search("*"));
        assert_eq!(vec![1, 5], search("UID 10,14:*"));
        assert_eq!(vec![4, 5], search("LARGER 3500"));
        assert_eq!(vec![1], search("SMALLER 2000"));
        assert_eq!(vec![3, 5], search("UNSEEN UNDELETED"));
        assert_eq!(vec![1, 2, 4], search("OR SEEN DELETED"));
        assert_eq!(vec![3, 5], search("NOT (OR SEEN DELETED)"));
        assert_eq!(vec![2, 3], search("2:5 (NOT RECENT)"));
    }

    #[test]
    fn malformed_criteria() {
        assert!(fails("BOGUS"));
        assert!(fails("LARGER"));
        assert!(fails("LARGER x"));
        assert!(fails("OR SEEN"));
        assert!(fails("KEYWORD \\Seen"));
        assert!(fails("()"));
        // Out of range
        assert!(fails("6"));
    }

    #[test]
    fn nesting_is_bounded() {
        let nots = |n: usize| format!("{}SEEN", "NOT ".repeat(n));
        assert_eq!(vec![2, 3, 5], search(&nots(MAX_SEARCH_DEPTH - 1)));
        assert_eq!(vec![1, 4], search(&nots(MAX_SEARCH_DEPTH)));
        assert!(fails(&nots(MAX_SEARCH_DEPTH + 1)));
        assert!(fails(&nots(16000)));

        let ors = |n: usize| format!("{}SEEN", "OR DELETED ".repeat(n));
        assert_eq!(vec![1, 2, 4], search(&ors(MAX_SEARCH_DEPTH)));
        assert!(fails(&ors(MAX_SEARCH_DEPTH + 1)));

        let groups = |n: usize| {
            format!("{}SEEN{}", "(".repeat(n), ")".repeat(n))
        };
        assert_eq!(vec![1, 4], search(&groups(MAX_SEARCH_DEPTH)));
        assert!(fails(&groups(MAX_SEARCH_DEPTH + 1)));
    }

    #[test]
    fn content_keys_need_resolution() {
        let s = snapshot();
        let cmd = s::CommandText::of("A1 SEARCH SUBJECT hello SEEN")
            .parse()
            .unwrap();
        let mut p = parse_criteria(&cmd.args, &s).unwrap();
        assert!(p.needs_content());

        p.resolve_content(&mut |field, needle| {
            assert_eq!(ContentField::Subject, field);
            assert_eq!("hello", needle);
            Ok(vec![Uid::u(10), Uid::u(11)])
        })
        .unwrap();
        assert_eq!(
            vec![1],
            p.search(&s)
                .into_iter()
                .map(|e| u32::from(e.seqnum()))
                .collect::<Vec<_>>()
        );
    }
}
