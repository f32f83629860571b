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

//! Incremental decoding of the client byte stream.
//!
//! The decoder is fed whatever the network hands us, in whatever fragments
//! it arrives, and yields command lines and literals in order. It owns no
//! I/O; the caller pushes bytes in and pulls items out.
//!
//! A line ending with `{n}` or `{n+}` switches the decoder into literal
//! mode, in which exactly `n` bytes are collected regardless of content.
//! Whether the client actually sends those bytes right away depends on the
//! literal type; for a synchronising literal the caller must either send a
//! continuation or call `cancel_literal()`.

use std::mem;
use std::str;

use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r"\{([0-9]+)(\+?)\}$").unwrap();
}

/// How many bytes of an offending unit to retain in a `DecodeError`.
const ERROR_PREFIX_LEN: usize = 64;
/// Only this many trailing bytes of a line are inspected for a literal
/// marker.
const MARKER_WINDOW: usize = 32;

/// A literal announced at the end of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiteralSpec {
    pub len: u32,
    /// `false` for `LITERAL+` literals, which the client sends without
    /// waiting for a continuation.
    pub synchronizing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// A line with its line ending removed.
    ///
    /// If `literal` is set, the line ends with the literal marker and the
    /// literal's content is the next item.
    Line {
        text: Vec<u8>,
        literal: Option<LiteralSpec>,
    },
    Literal(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// A line exceeded the maximum length. The rest of the line is discarded.
    TooLongLine { prefix: Vec<u8> },
    /// A line announced a literal over the maximum size.
    ///
    /// The line itself is not delivered. If the literal was
    /// non-synchronising, its content is discarded as it arrives.
    TooBigLiteral {
        prefix: Vec<u8>,
        size: u64,
        synchronizing: bool,
    },
}

impl DecodeError {
    /// The start of the offending line, for logging and for recovering the
    /// command tag.
    pub fn prefix(&self) -> &[u8] {
        match *self {
            DecodeError::TooLongLine { ref prefix } => prefix,
            DecodeError::TooBigLiteral { ref prefix, .. } => prefix,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Line,
    Literal { remaining: usize, synchronizing: bool },
    DiscardLine,
    DiscardLiteral { remaining: u64 },
}

#[derive(Debug)]
pub struct WireDecoder {
    state: State,
    /// Input not yet consumed.
    buf: Vec<u8>,
    /// Content of the literal currently being collected.
    literal: Vec<u8>,
    max_line: usize,
    max_literal: u32,
}

impl WireDecoder {
    /// Create a decoder accepting lines of at most `max_line` bytes
    /// (excluding the line ending) and literals of at most `max_literal`
    /// bytes.
    pub fn new(max_line: usize, max_literal: u32) -> Self {
        WireDecoder {
            state: State::Line,
            buf: Vec::new(),
            literal: Vec::new(),
            max_line,
            max_literal,
        }
    }

    /// Add more input.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether the decoder is in the middle of a literal.
    pub fn in_literal(&self) -> bool {
        match self.state {
            State::Literal { .. } | State::DiscardLiteral { .. } => true,
            State::Line | State::DiscardLine => false,
        }
    }

    /// Push `data` and decode everything now available.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Item, DecodeError>> {
        self.push(data);
        let mut ret = Vec::new();
        while let Some(item) = self.next_item() {
            ret.push(item);
        }
        ret
    }

    /// Abandon the literal announced by the last line.
    ///
    /// A synchronising literal that has not started arriving is simply
    /// forgotten, since the client will not send it. Otherwise the rest of
    /// the literal is discarded as it arrives.
    pub fn cancel_literal(&mut self) {
        if let State::Literal {
            remaining,
            synchronizing,
        } = self.state
        {
            let received = self.literal.len();
            self.literal = Vec::new();
            self.state = if synchronizing && 0 == received {
                State::Line
            } else {
                State::DiscardLiteral {
                    remaining: remaining as u64,
                }
            };
        }
    }

    /// Decode the next item from the buffered input.
    ///
    /// Returns `None` if more input is needed.
    pub fn next_item(&mut self) -> Option<Result<Item, DecodeError>> {
        loop {
            match self.state {
                State::Line => return self.next_line(),

                State::Literal { remaining, .. } => {
                    let n = remaining.min(self.buf.len());
                    self.literal.extend(self.buf.drain(..n));
                    if n < remaining {
                        if let State::Literal {
                            ref mut remaining, ..
                        } = self.state
                        {
                            *remaining -= n;
                        }
                        return None;
                    }

                    self.state = State::Line;
                    return Some(Ok(Item::Literal(mem::replace(
                        &mut self.literal,
                        Vec::new(),
                    ))));
                }

                State::DiscardLine => {
                    match memchr::memchr(b'\n', &self.buf) {
                        Some(ix) => {
                            self.buf.drain(..=ix);
                            self.state = State::Line;
                        }
                        None => {
                            self.buf.clear();
                            return None;
                        }
                    }
                }

                State::DiscardLiteral { remaining } => {
                    let n = (self.buf.len() as u64).min(remaining);
                    self.buf.drain(..n as usize);
                    if n < remaining {
                        self.state =
                            State::DiscardLiteral { remaining: remaining - n };
                        return None;
                    }
                    self.state = State::Line;
                }
            }
        }
    }

    fn next_line(&mut self) -> Option<Result<Item, DecodeError>> {
        // The longest acceptable line plus CRLF
        let window = self.buf.len().min(self.max_line.saturating_add(2));
        let lf = match memchr::memchr(b'\n', &self.buf[..window]) {
            Some(lf) => lf,
            None if window < self.max_line.saturating_add(2) => return None,
            None => {
                let prefix = self.error_prefix(window);
                self.state = State::DiscardLine;
                return Some(Err(DecodeError::TooLongLine { prefix }));
            }
        };

        let mut text: Vec<u8> = self.buf.drain(..=lf).collect();
        text.pop();
        if text.ends_with(b"\r") {
            text.pop();
        }

        if text.len() > self.max_line {
            return Some(Err(DecodeError::TooLongLine {
                prefix: truncate(text),
            }));
        }

        let literal = match literal_marker(&text) {
            None => None,
            Some((size, synchronizing)) => {
                if size > u64::from(self.max_literal) {
                    if !synchronizing {
                        self.state =
                            State::DiscardLiteral { remaining: size };
                    }
                    return Some(Err(DecodeError::TooBigLiteral {
                        prefix: truncate(text),
                        size,
                        synchronizing,
                    }));
                }

                // Bounded by max_literal above
                let len = size as u32;
                self.state = State::Literal {
                    remaining: len as usize,
                    synchronizing,
                };
                Some(LiteralSpec { len, synchronizing })
            }
        };

        Some(Ok(Item::Line { text, literal }))
    }

    fn error_prefix(&self, len: usize) -> Vec<u8> {
        self.buf[..len.min(ERROR_PREFIX_LEN)].to_vec()
    }
}

fn truncate(mut text: Vec<u8>) -> Vec<u8> {
    text.truncate(ERROR_PREFIX_LEN);
    text
}

/// If `line` ends with a literal marker, return its size and whether it is
/// synchronising. Sizes too large for a `u64` saturate.
fn literal_marker(line: &[u8]) -> Option<(u64, bool)> {
    let tail = &line[line.len().saturating_sub(MARKER_WINDOW)..];
    let captures = LITERAL_AT_EOL.captures(tail)?;
    let digits = str::from_utf8(captures.get(1)?.as_bytes()).ok()?;
    let size = digits.parse::<u64>().unwrap_or(u64::MAX);
    let synchronizing =
        captures.get(2).map_or(true, |m| m.as_bytes().is_empty());
    Some((size, synchronizing))
}

/// Strip a trailing literal marker from `line`, if present.
pub fn strip_literal_marker(line: &[u8]) -> &[u8] {
    let tail_start = line.len().saturating_sub(MARKER_WINDOW);
    match LITERAL_AT_EOL.find(&line[tail_start..]) {
        Some(m) => &line[..tail_start + m.start()],
        None => line,
    }
}
