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

use std::collections::BTreeSet;

use super::model::*;
use super::snapshot::{EntryRef, FolderSnapshot};
use super::store::ContentField;
use crate::support::error::Error;

/// A boolean expression over the messages of a snapshot.
///
/// Everything except content matching can be answered from the snapshot
/// alone. Content matches must be resolved against the store with
/// `resolve_content()` before evaluation; an unresolved content match
/// matches nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchPredicate {
    /// True if every child is. An empty `And` matches everything.
    And(Vec<SearchPredicate>),
    Or(Box<SearchPredicate>, Box<SearchPredicate>),
    Not(Box<SearchPredicate>),
    FlagMatch(FlagTest),
    ContentMatch(ContentMatch),
    /// Membership in a set of UIDs. Sequence sets are converted to this
    /// before evaluation.
    UidIn(BTreeSet<Uid>),
    Larger(u32),
    Smaller(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagTest {
    Flag(Flag),
    Recent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentMatch {
    pub field: ContentField,
    pub needle: String,
    hits: Option<BTreeSet<Uid>>,
}

impl SearchPredicate {
    pub fn all() -> Self {
        SearchPredicate::And(vec![])
    }

    pub fn flag(flag: Flag) -> Self {
        SearchPredicate::FlagMatch(FlagTest::Flag(flag))
    }

    pub fn recent() -> Self {
        SearchPredicate::FlagMatch(FlagTest::Recent)
    }

    pub fn content(field: ContentField, needle: impl Into<String>) -> Self {
        SearchPredicate::ContentMatch(ContentMatch {
            field,
            needle: needle.into(),
            hits: None,
        })
    }

    pub fn not(self) -> Self {
        SearchPredicate::Not(Box::new(self))
    }

    pub fn or(self, other: Self) -> Self {
        SearchPredicate::Or(Box::new(self), Box::new(other))
    }

    /// Whether any content match remains to be resolved.
    pub fn needs_content(&self) -> bool {
        match *self {
            SearchPredicate::And(ref children) => {
                children.iter().any(SearchPredicate::needs_content)
            }
            SearchPredicate::Or(ref a, ref b) => {
                a.needs_content() || b.needs_content()
            }
            SearchPredicate::Not(ref p) => p.needs_content(),
            SearchPredicate::ContentMatch(ref m) => m.hits.is_none(),
            _ => false,
        }
    }

    /// Answer every content match through `lookup`, which returns the UIDs
    /// whose `field` contains the needle.
    pub fn resolve_content(
        &mut self,
        lookup: &mut dyn FnMut(ContentField, &str) -> Result<Vec<Uid>, Error>,
    ) -> Result<(), Error> {
        match *self {
            SearchPredicate::And(ref mut children) => {
                for child in children {
                    child.resolve_content(lookup)?;
                }
            }
            SearchPredicate::Or(ref mut a, ref mut b) => {
                a.resolve_content(lookup)?;
                b.resolve_content(lookup)?;
            }
            SearchPredicate::Not(ref mut p) => p.resolve_content(lookup)?,
            SearchPredicate::ContentMatch(ref mut m) => {
                if m.hits.is_none() {
                    m.hits = Some(
                        lookup(m.field, &m.needle)?.into_iter().collect(),
                    );
                }
            }
            _ => (),
        }

        Ok(())
    }

    pub fn evaluate(&self, entry: &EntryRef<'_>) -> bool {
        match *self {
            SearchPredicate::And(ref children) => {
                children.iter().all(|c| c.evaluate(entry))
            }
            SearchPredicate::Or(ref a, ref b) => {
                a.evaluate(entry) || b.evaluate(entry)
            }
            SearchPredicate::Not(ref p) => !p.evaluate(entry),
            SearchPredicate::FlagMatch(FlagTest::Flag(ref flag)) => {
                entry.has_flag(flag)
            }
            SearchPredicate::FlagMatch(FlagTest::Recent) => entry.is_recent(),
            SearchPredicate::ContentMatch(ref m) => m
                .hits
                .as_ref()
                .map_or(false, |hits| hits.contains(&entry.uid())),
            SearchPredicate::UidIn(ref uids) => uids.contains(&entry.uid()),
            SearchPredicate::Larger(size) => entry.size() > size,
            SearchPredicate::Smaller(size) => entry.size() < size,
        }
    }

    /// Every numbered, non-expunged entry of `snapshot` which matches, in
    /// ascending order.
    pub fn search<'a>(&self, snapshot: &'a FolderSnapshot) -> Vec<EntryRef<'a>> {
        snapshot
            .iter()
            .filter(|e| !e.is_expunged() && self.evaluate(e))
            .collect()
    }
}
