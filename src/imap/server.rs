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
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use super::command_processor::CommandProcessor;
use super::lex::LexWriter;
use super::syntax as s;
use super::wire_decoder::{DecodeError, Item, WireDecoder};
use crate::support::error::Error;

const READ_BUFFER_SIZE: usize = 4096;

/// Drives one connection: decodes commands off the wire, feeds them to the
/// command processor, and writes the responses.
pub struct Server {
    read: Box<dyn Read + Send>,
    write: Arc<Mutex<Box<dyn Write + Send>>>,
    processor: CommandProcessor,
    decoder: WireDecoder,
    max_line: usize,
    /// The command being assembled, while its literals arrive.
    command: Option<s::CommandText>,
    /// Set while swallowing the remainder of a rejected command.
    discarding: bool,
    sent_bye: bool,
}

impl Server {
    pub fn new<R: Read + Send + 'static, W: Write + Send + 'static>(
        read: R,
        write: W,
        processor: CommandProcessor,
        max_line: usize,
        max_literal: u32,
    ) -> Self {
        Server {
            read: Box::new(read),
            write: Arc::new(Mutex::new(Box::new(write))),
            processor,
            decoder: WireDecoder::new(max_line, max_literal),
            max_line,
            command: None,
            discarding: false,
            sent_bye: false,
        }
    }

    /// Run the server.
    ///
    /// Blocks until an error occurs, the client logs out, or a BYE response
    /// has been sent. A session which ends any way other than `LOGOUT` is
    /// abandoned.
    pub fn run(&mut self) -> Result<(), Error> {
        let result = self.run_impl();
        if !self.processor.logged_out() {
            self.processor.abandon();
        }
        result
    }

    fn run_impl(&mut self) -> Result<(), Error> {
        self.send_response(self.processor.greet())?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            while let Some(item) = self.decoder.next_item() {
                self.handle_item(item)?;
                if self.sent_bye || self.processor.logged_out() {
                    return Ok(());
                }
            }

            let nread = match self.read.read(&mut buf) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "EOF reached before LOGOUT",
                    )))
                }
                Ok(n) => n,
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                Err(e)
                    if io::ErrorKind::WouldBlock == e.kind()
                        || io::ErrorKind::TimedOut == e.kind() =>
                {
                    info!("{} Idle timeout", self.processor.log_prefix());
                    self.send_response(s::ResponseLine {
                        tag: None,
                        response: s::Response::Cond(s::CondResponse {
                            cond: s::RespCondType::Bye,
                            code: None,
                            quip: Some(Cow::Borrowed("Idle timeout")),
                        }),
                    })?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            self.decoder.push(&buf[..nread]);
        }
    }

    fn handle_item(
        &mut self,
        item: Result<Item, DecodeError>,
    ) -> Result<(), Error> {
        match item {
            Ok(Item::Line { text, literal }) => {
                if self.discarding {
                    // Continuation lines of a rejected command. A
                    // synchronising literal ends it, since the client will
                    // wait for a continuation that never comes.
                    match literal {
                        Some(spec) => {
                            self.decoder.cancel_literal();
                            self.discarding = !spec.synchronizing;
                        }
                        None => self.discarding = false,
                    }
                    return Ok(());
                }

                let mut command = match self.command.take() {
                    Some(mut command) => {
                        command.lines.push(text);
                        command
                    }
                    // Blank lines between commands are harmless
                    None if text.is_empty() && literal.is_none() => {
                        return Ok(())
                    }
                    None => s::CommandText::new(text),
                };

                let spec = match literal {
                    None => return self.execute(command),
                    Some(spec) => spec,
                };

                let is_append = command.verb().map_or(false, |v| "APPEND" == v);
                if !is_append
                    && command.len() + spec.len as usize > self.max_line
                {
                    self.decoder.cancel_literal();
                    self.discarding = !spec.synchronizing;
                    let tag = command.tag().map(str::to_owned);
                    return self.reject(tag, None, "Command line too long");
                }

                if spec.synchronizing {
                    let mut w = self.write.lock().unwrap();
                    w.write_all(b"+ go\r\n")?;
                    w.flush()?;
                }

                self.command = Some(command);
                Ok(())
            }

            Ok(Item::Literal(data)) => {
                if let Some(ref mut command) = self.command {
                    command.literals.push(data);
                }
                Ok(())
            }

            Err(DecodeError::TooLongLine { prefix }) => {
                let tag = self.abandon_command(&prefix);
                warn!(
                    "{} Rejected over-long command line",
                    self.processor.log_prefix()
                );
                self.reject(tag, None, "Command line too long")
            }

            Err(DecodeError::TooBigLiteral {
                prefix,
                size,
                synchronizing,
            }) => {
                let tag = self.abandon_command(&prefix);
                // The decoder drops a non-synchronising literal's content;
                // the lines after it are still part of this command.
                self.discarding = !synchronizing;
                info!(
                    "{} Rejected {}-byte literal",
                    self.processor.log_prefix(),
                    size
                );
                self.reject(
                    tag,
                    Some(s::RespTextCode::TooBig),
                    "Literal too big",
                )
            }
        }
    }

    /// Drop any command in progress, returning the tag the rejection
    /// should carry.
    fn abandon_command(&mut self, prefix: &[u8]) -> Option<String> {
        self.command
            .take()
            .and_then(|c| c.tag().map(str::to_owned))
            .or_else(|| s::tag_of(prefix).map(str::to_owned))
    }

    /// Send `NO` to the command tagged `tag`, or an untagged `BAD` if no
    /// tag could be found.
    fn reject(
        &mut self,
        tag: Option<String>,
        code: Option<s::RespTextCode>,
        quip: &'static str,
    ) -> Result<(), Error> {
        let cond = if tag.is_some() {
            s::RespCondType::No
        } else {
            s::RespCondType::Bad
        };

        self.send_response(s::ResponseLine {
            tag,
            response: s::Response::Cond(s::CondResponse {
                cond,
                code,
                quip: Some(Cow::Borrowed(quip)),
            }),
        })
    }

    fn execute(&mut self, command: s::CommandText) -> Result<(), Error> {
        let r = self
            .processor
            .handle_command(&command, &response_sender(&self.write));
        self.send_response(r)
    }

    fn send_response(&mut self, r: s::ResponseLine) -> Result<(), Error> {
        self.sent_bye |= matches!(
            r.response,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bye,
                ..
            })
        );

        let mut w = self.write.lock().unwrap();
        {
            let mut w = LexWriter::new(&mut *w);
            r.write_to(&mut w)?;
            w.raw(b"\r\n")?;
        }
        w.flush()?;
        Ok(())
    }
}

fn response_sender<'a>(
    w: &'a Arc<Mutex<Box<dyn Write + Send>>>,
) -> impl Fn(s::Response) + Send + Sync + 'a {
    move |r| {
        let mut w = w.lock().unwrap();
        {
            let mut w = LexWriter::new(&mut *w);
            let _ = s::ResponseLine {
                tag: None,
                response: r,
            }
            .write_to(&mut w);
            let _ = w.raw(b"\r\n");
        }
        let _ = w.flush();
    }
}
