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

//! Writing values under IMAP's lexical rules.
//!
//! Strings are written in the most conservative form that can carry them:
//! an atom if every character is in `a-zA-Z0-9?=+/_.-` and the string is
//! not `NIL`, else a quoted string if it is short and free of controls,
//! backslash, double quote and 8-bit characters, else a literal.
//!
//! Mailbox names are converted to modified UTF-7 first.

use std::io::{self, Write};

use chrono::prelude::*;

use super::utf7;
use crate::account::model::Flag;

#[derive(Debug)]
pub struct LexWriter<W> {
    writer: W,
}

impl<W: Write> LexWriter<W> {
    pub fn new(writer: W) -> Self {
        LexWriter { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn verbatim(&mut self, s: &str) -> io::Result<()> {
        self.writer.write_all(s.as_bytes())
    }

    pub fn raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    pub fn nil(&mut self) -> io::Result<()> {
        self.verbatim("NIL")
    }

    pub fn astring(&mut self, s: &str) -> io::Result<()> {
        if is_conservative_atom(s) {
            self.verbatim(s)
        } else {
            self.string(s)
        }
    }

    pub fn string(&mut self, s: &str) -> io::Result<()> {
        if is_quotable(s) {
            write!(self.writer, "\"{}\"", s)
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn literal(&mut self, data: &[u8]) -> io::Result<()> {
        write!(self.writer, "{{{}}}\r\n", data.len())?;
        self.writer.write_all(data)
    }

    pub fn mailbox(&mut self, name: &str) -> io::Result<()> {
        self.astring(&utf7::encode(name))
    }

    pub fn flag(&mut self, flag: &Flag) -> io::Result<()> {
        write!(self.writer, "{}", flag)
    }

    /// Write a parenthesised flag list, optionally followed by `\*`.
    pub fn flag_list(
        &mut self,
        flags: &[Flag],
        keywords_allowed: bool,
    ) -> io::Result<()> {
        self.verbatim("(")?;
        for (ix, flag) in flags.iter().enumerate() {
            if ix > 0 {
                self.verbatim(" ")?;
            }
            self.flag(flag)?;
        }
        if keywords_allowed {
            self.verbatim(if flags.is_empty() { "\\*" } else { " \\*" })?;
        }
        self.verbatim(")")
    }

    /// Write a message's flag list, with `\Recent` added if `recent`.
    pub fn flags_with_recent(
        &mut self,
        flags: &[Flag],
        recent: bool,
    ) -> io::Result<()> {
        self.verbatim("(")?;
        for (ix, flag) in flags.iter().enumerate() {
            if ix > 0 {
                self.verbatim(" ")?;
            }
            self.flag(flag)?;
        }
        if recent {
            self.verbatim(if flags.is_empty() {
                "\\Recent"
            } else {
                " \\Recent"
            })?;
        }
        self.verbatim(")")
    }

    pub fn datetime(
        &mut self,
        datetime: DateTime<FixedOffset>,
    ) -> io::Result<()> {
        write!(
            self.writer,
            "\"{}\"",
            datetime.format("%_d-%b-%Y %H:%M:%S %z")
        )
    }
}

fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.bytes().all(|b| {
            matches!(b,
                     b'a'..=b'z'
                     | b'A'..=b'Z'
                     | b'0'..=b'9'
                     | b'='
                     | b'?'
                     | b'/'
                     | b'+'
                     | b'_'
                     | b'.'
                     | b'-')
        })
}

fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.bytes().all(|b| match b {
            0..=31 | 127..=255 | b'\\' | b'"' => false,
            _ => true,
        })
}
