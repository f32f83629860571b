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

//! A simple line-level IMAP client.
//!
//! **THIS IS NOT A GENERAL-PURPOSE IMAP CLIENT.** It understands exactly
//! enough of the protocol to frame responses (lines plus any literals
//! embedded in them) and to match tagged completions to commands. The
//! backend proxy uses it to talk to other nodes, and the integration tests
//! use it to talk to the server under test.

use std::io::{self, BufRead, Read, Write};
use std::str;

use lazy_static::lazy_static;
use regex::bytes::Regex;
use thiserror::Error;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r"\{([0-9]+)\+?\}\r\n$").unwrap();
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

pub struct Client<R, W> {
    read: R,
    write: W,
    trace_stderr: Option<&'static str>,
    tag_prefix: &'static str,
    next_tag: u64,
}

impl<R: BufRead, W: Write> Client<R, W> {
    pub fn new(read: R, write: W, trace_stderr: Option<&'static str>) -> Self {
        Client {
            read,
            write,
            trace_stderr,
            tag_prefix: "",
            next_tag: 0,
        }
    }

    /// Use `prefix` before the number in every generated tag.
    pub fn with_tag_prefix(mut self, prefix: &'static str) -> Self {
        self.tag_prefix = prefix;
        self
    }

    /// Allocate a fresh tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("{}{}", self.tag_prefix, self.next_tag);
        self.next_tag += 1;
        tag
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.trace(true, ">>[raw]", bytes);
        self.write.write_all(bytes)?;
        self.write.flush()?;
        Ok(())
    }

    pub fn read_line_raw(&mut self, dst: &mut Vec<u8>) -> Result<usize, Error> {
        let start = dst.len();
        let nread = self.read.read_until(b'\n', dst)?;
        self.trace(false, "<<[eol]", &dst[start..]);
        Ok(nread)
    }

    pub fn read_data_raw(
        &mut self,
        dst: &mut Vec<u8>,
        n: u32,
    ) -> Result<usize, Error> {
        let start = dst.len();
        let nread = self.read.by_ref().take(n.into()).read_to_end(dst)?;
        self.trace(true, "<<[lit]", &dst[start..]);
        if n > nread as u32 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Hit EOF before end of literal",
            )));
        }

        Ok(nread)
    }

    /// Read one response line, including any literals it contains, into
    /// `dst`. The final CRLF is included.
    pub fn read_logical_line(
        &mut self,
        dst: &mut Vec<u8>,
    ) -> Result<(), Error> {
        loop {
            let nread = self.read_line_raw(dst)?;
            if !dst.ends_with(b"\r\n") {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Line didn't end with CRLF",
                )));
            }

            let literal_len = LITERAL_AT_EOL
                .captures(&dst[dst.len() - nread..])
                .and_then(|cap| cap.get(1))
                .and_then(|m| str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.parse::<u32>().ok());

            match literal_len {
                Some(literal_len) => {
                    self.read_data_raw(dst, literal_len)?;
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Read one logical line and return it without the final CRLF.
    pub fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut line = Vec::new();
        self.read_logical_line(&mut line)?;
        line.truncate(line.len() - 2);
        Ok(line)
    }

    /// Read responses up to and including the one tagged with `tag`.
    pub fn read_until_tagged(
        &mut self,
        tag: &str,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_response()?;
            let done = is_tagged(&line, tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Send `command` under a fresh tag and collect every response up to
    /// its completion.
    ///
    /// The command must not contain literals; use `write_raw()` and
    /// `read_until_tagged()` for those.
    pub fn command(&mut self, command: &str) -> Result<Vec<String>, Error> {
        let tag = self.next_tag();
        let line = format!("{} {}\r\n", tag, command);
        self.trace(false, ">>[cmd]", line.as_bytes());
        self.write.write_all(line.as_bytes())?;
        self.write.flush()?;

        Ok(self
            .read_until_tagged(&tag)?
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect())
    }

    fn trace(&self, truncate: bool, what: &str, data: &[u8]) {
        if let Some(prefix) = self.trace_stderr {
            if data.is_empty() {
                eprintln!("{} WIRE {}<empty>", prefix, what);
                return;
            }

            let (data, truncated) = if truncate {
                data.split_at(data.len().min(128))
            } else {
                (data, &[] as &[u8])
            };

            let mut start = 0;
            for split in memchr::memchr_iter(b'\n', data)
                .chain(std::iter::once(data.len() - 1))
            {
                if split < start {
                    continue;
                }

                let data = &data[start..=split];
                start = split + 1;

                let mut vis = String::new();
                for &byte in data {
                    match byte {
                        b' '..=b'~' => vis.push(byte as char),
                        b'\n' => vis.push_str("\\n"),
                        b'\r' => vis.push_str("\\r"),
                        b => vis.push_str(&format!("\\x{:02X}", b)),
                    }
                }

                eprintln!("{} WIRE {} {}", prefix, what, vis);
            }

            if !truncated.is_empty() {
                eprintln!(
                    "{} WIRE {}<{} more bytes>",
                    prefix,
                    what,
                    truncated.len()
                );
            }
        }
    }
}

/// Whether `line` is the completion of the command tagged `tag`.
pub fn is_tagged(line: &[u8], tag: &str) -> bool {
    line.len() > tag.len()
        && line.starts_with(tag.as_bytes())
        && b' ' == line[tag.len()]
}
