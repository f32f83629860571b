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

use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Uniquely identifies a message within a single folder.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// folder. UIDs are never reused within one `uid_validity` epoch.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self = unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The 1-based position of a message within the client's current view of
/// the selected folder.
///
/// Unlike UIDs, sequence numbers shift down whenever an earlier message is
/// expunged, and they are tracked independently by every session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    pub const MIN: Self = unsafe { Seqnum(NonZeroU32::new_unchecked(1)) };

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Panics if `ix + 1` does not fit in a `u32`; folders never get that
    /// large since UIDs would be exhausted first.
    pub fn from_index(ix: usize) -> Self {
        let raw: u32 = (ix + 1).try_into().unwrap();
        Seqnum::of(raw).unwrap()
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

impl fmt::Display for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// Identifies a folder within its owner's mailbox.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct FolderId(pub u32);

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
///
/// `\Recent` is not represented by this enum since it is a property of the
/// session and not of the message.
#[derive(Clone, Serialize, Deserialize)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Keyword(String),
}

impl Flag {
    pub const SYSTEM: [Flag; 5] = [
        Flag::Answered,
        Flag::Deleted,
        Flag::Draft,
        Flag::Flagged,
        Flag::Seen,
    ];
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.starts_with('\\') || s.is_empty() {
            Err(Error::NxFlag)
        } else if s.bytes().all(is_keyword_char) {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

fn is_keyword_char(ch: u8) -> bool {
    match ch {
        0..=b' ' | 127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            (&Flag::Answered, &Flag::Answered) => true,
            (&Flag::Deleted, &Flag::Deleted) => true,
            (&Flag::Draft, &Flag::Draft) => true,
            (&Flag::Flagged, &Flag::Flagged) => true,
            (&Flag::Seen, &Flag::Seen) => true,
            // Keywords are matched ASCII-case-insensitively, which is what
            // clients expect in practice.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => false,
        }
    }
}

impl Eq for Flag {}

bitflags! {
    /// Access rights on a folder, after RFC 4314.
    pub struct Rights: u32 {
        /// `l`: the folder is visible in `LIST`.
        const LOOKUP = 1 << 0;
        /// `r`: `SELECT`, `FETCH`, `SEARCH`, `COPY` from.
        const READ = 1 << 1;
        /// `s`: keep `\Seen` across sessions.
        const SEEN = 1 << 2;
        /// `w`: set flags other than `\Seen` and `\Deleted`.
        const WRITE = 1 << 3;
        /// `i`: `APPEND` and `COPY` into.
        const INSERT = 1 << 4;
        /// `k`: create child folders.
        const CREATE = 1 << 5;
        /// `x`: delete the folder itself.
        const DELETE_FOLDER = 1 << 6;
        /// `t`: set `\Deleted`.
        const DELETE = 1 << 7;
        /// `e`: `EXPUNGE`.
        const EXPUNGE = 1 << 8;
        /// `a`: administer the access list.
        const ADMIN = 1 << 9;
    }
}

const RIGHTS_LETTERS: &[(char, Rights)] = &[
    ('l', Rights::LOOKUP),
    ('r', Rights::READ),
    ('s', Rights::SEEN),
    ('w', Rights::WRITE),
    ('i', Rights::INSERT),
    ('k', Rights::CREATE),
    ('x', Rights::DELETE_FOLDER),
    ('t', Rights::DELETE),
    ('e', Rights::EXPUNGE),
    ('a', Rights::ADMIN),
];

impl Rights {
    /// Parse an RFC 4314 rights string such as `lrswi`.
    ///
    /// The obsolete RFC 2086 letters `c` and `d` are accepted as their
    /// RFC 4314 expansions.
    pub fn parse_acl(s: &str) -> Result<Self, Error> {
        let mut rights = Rights::empty();
        for ch in s.chars() {
            rights |= match ch {
                'c' => Rights::CREATE | Rights::DELETE_FOLDER,
                'd' => Rights::DELETE | Rights::EXPUNGE,
                ch => RIGHTS_LETTERS
                    .iter()
                    .find(|&&(letter, _)| letter == ch)
                    .map(|&(_, r)| r)
                    .ok_or(Error::PermissionDenied)?,
            };
        }

        Ok(rights)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &(letter, right) in RIGHTS_LETTERS {
            if self.contains(right) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// The per-message metadata a folder snapshot mirrors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: Uid,
    pub flags: Vec<Flag>,
    pub size: u32,
    pub internal_date: DateTime<FixedOffset>,
}
