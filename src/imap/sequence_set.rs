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

//! Sequence sets such as `1,3:5,7:*`.
//!
//! Parsing needs no context. Expansion happens against the session's
//! snapshot, since what `*` and the numbers mean depends on the addressing
//! mode and the current folder size.

use std::fmt;

use crate::account::model::{Seqnum, Uid};
use crate::account::snapshot::{EntryRef, FolderSnapshot};
use crate::support::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    Num(u32),
    /// `*`: the greatest sequence number or UID in use.
    Star,
}

impl Bound {
    fn parse(s: &str) -> Result<Self, Error> {
        if "*" == s {
            return Ok(Bound::Star);
        }

        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::BadSequenceSet);
        }

        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(Error::BadSequenceSet),
            Ok(n) => Ok(Bound::Num(n)),
        }
    }

    fn resolve(self, max: u32) -> u32 {
        match self {
            Bound::Num(n) => n,
            Bound::Star => max,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Bound::Num(n) => write!(f, "{}", n),
            Bound::Star => write!(f, "*"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceSet {
    parts: Vec<(Bound, Bound)>,
}

impl SequenceSet {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let parts = s
            .split(',')
            .map(|part| {
                let mut bounds = part.splitn(2, ':');
                let lo = Bound::parse(bounds.next().unwrap_or(""))?;
                let hi = match bounds.next() {
                    Some(hi) => Bound::parse(hi)?,
                    None => lo,
                };
                Ok((lo, hi))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(SequenceSet { parts })
    }

    /// Whether `*` appears anywhere.
    pub fn uses_star(&self) -> bool {
        self.parts
            .iter()
            .any(|&(lo, hi)| Bound::Star == lo || Bound::Star == hi)
    }

    /// The set as sorted, merged, inclusive ranges, with `*` replaced by
    /// `max`.
    fn ranges(&self, max: u32) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = self
            .parts
            .iter()
            .map(|&(lo, hi)| {
                let (lo, hi) = (lo.resolve(max), hi.resolve(max));
                (lo.min(hi), lo.max(hi))
            })
            .collect();
        ranges.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (lo, hi) in ranges {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(hi);
                }
                _ => merged.push((lo, hi)),
            }
        }
        merged
    }

    /// Resolve the set against `snapshot`.
    ///
    /// In sequence-number mode, any number beyond the folder size fails
    /// with `SeqnumOutOfRange`. In UID mode, numbers that match no message
    /// are simply ignored.
    ///
    /// Entries awaiting expunge are never returned. The result is in
    /// ascending order without duplicates.
    pub fn expand<'a>(
        &self,
        uid_mode: bool,
        snapshot: &'a FolderSnapshot,
    ) -> Result<Vec<EntryRef<'a>>, Error> {
        let entries = if uid_mode {
            let max = snapshot.max_uid().map_or(0, u32::from);
            let ranges = self.ranges(max);
            snapshot
                .iter()
                .filter(|e| contains(&ranges, u32::from(e.uid())))
                .collect::<Vec<_>>()
        } else {
            let max = snapshot.num_messages() as u32;
            let ranges = self.ranges(max);
            // `*` in an empty folder names a message which does not exist
            if ranges.last().map_or(false, |&(_, hi)| hi > max || 0 == hi) {
                return Err(Error::SeqnumOutOfRange);
            }

            ranges
                .into_iter()
                .flat_map(|(lo, hi)| lo..=hi)
                .filter_map(|n| {
                    Seqnum::of(n).and_then(|s| snapshot.by_seqnum(s))
                })
                .collect::<Vec<_>>()
        };

        Ok(entries.into_iter().filter(|e| !e.is_expunged()).collect())
    }

    /// Shorthand for the UIDs of `expand()`.
    pub fn uids(
        &self,
        uid_mode: bool,
        snapshot: &FolderSnapshot,
    ) -> Result<Vec<Uid>, Error> {
        Ok(self
            .expand(uid_mode, snapshot)?
            .into_iter()
            .map(|e| e.uid())
            .collect())
    }
}

fn contains(ranges: &[(u32, u32)], n: u32) -> bool {
    match ranges.binary_search_by_key(&n, |&(lo, _)| lo) {
        Ok(_) => true,
        Err(0) => false,
        Err(ix) => n <= ranges[ix - 1].1,
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, &(lo, hi)) in self.parts.iter().enumerate() {
            if ix > 0 {
                write!(f, ",")?;
            }
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "{}:{}", lo, hi)?;
            }
        }
        Ok(())
    }
}
