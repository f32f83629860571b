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

//! Forwarding of a session's commands to the node owning its folder.
//!
//! A `BackendProxy` wraps one connection to another node, established and
//! authenticated once, then reused for every command the session forwards.
//! Responses are streamed back to the client as they arrive, with the
//! tagged completion carried back under the client's own tag.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{info, warn};

use super::client::{self, Client};
use super::syntax as s;
use crate::account::auth::Credentials;
use crate::cluster::topology::Node;
use crate::support::error::Error;

/// The identification key by which a proxy announces itself, so that the
/// node receiving it never proxies again.
pub const PROXY_ID_KEY: &str = "x-mailfront-proxy";
/// The identification key carrying the cluster's shared secret, which
/// must accompany `PROXY_ID_KEY` for the announcement to be believed.
pub const PROXY_SECRET_ID_KEY: &str = "x-mailfront-proxy-secret";

/// How this node identifies itself to the nodes it proxies to.
#[derive(Clone, Copy)]
pub struct ProxyIdentity<'a> {
    pub node: &'a str,
    pub secret: Option<&'a str>,
}

pub type BackendRead = Box<dyn BufRead + Send>;
pub type BackendWrite = Box<dyn Write + Send>;

/// Opens raw connections to other nodes.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, node: &Node) -> io::Result<(BackendRead, BackendWrite)>;
}

/// Connects over plain TCP to the node's configured address.
pub struct TcpConnector {
    pub read_timeout: Option<Duration>,
}

impl BackendConnector for TcpConnector {
    fn connect(&self, node: &Node) -> io::Result<(BackendRead, BackendWrite)> {
        let stream = TcpStream::connect(&node.address)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_nodelay(true)?;
        let read = stream.try_clone()?;
        Ok((Box::new(BufReader::new(read)), Box::new(stream)))
    }
}

pub struct BackendProxy {
    node: Node,
    client: Client<BackendRead, BackendWrite>,
    capabilities: Vec<String>,
    /// Set when the backend announced it is closing the connection.
    dropped: bool,
}

impl BackendProxy {
    /// Connect to `node` and log in as `credentials`.
    pub fn connect(
        connector: &dyn BackendConnector,
        node: &Node,
        identity: ProxyIdentity<'_>,
        credentials: &Credentials,
    ) -> Result<Self, Error> {
        let (read, write) = connector
            .connect(node)
            .map_err(|e| unavailable(node, e))?;
        let mut proxy = BackendProxy {
            node: node.clone(),
            client: Client::new(read, write, None).with_tag_prefix("P"),
            capabilities: Vec::new(),
            dropped: false,
        };

        proxy.handshake(identity, credentials)?;
        info!(
            "Proxying {} to node {}",
            credentials.account, proxy.node
        );
        Ok(proxy)
    }

    fn handshake(
        &mut self,
        identity: ProxyIdentity<'_>,
        credentials: &Credentials,
    ) -> Result<(), Error> {
        let node = self.node.clone();

        let greeting =
            self.client.read_response().map_err(|e| client_error(&node, e))?;
        if !greeting.starts_with(b"* OK") {
            return Err(Error::BackendProtocol(format!(
                "Bad greeting from {}: {}",
                node,
                String::from_utf8_lossy(&greeting)
            )));
        }

        let capability = self
            .client
            .command("CAPABILITY")
            .map_err(|e| client_error(&node, e))?;
        require_ok(&node, "CAPABILITY", &capability)?;
        self.capabilities = capability
            .iter()
            .filter(|line| line.starts_with("* CAPABILITY "))
            .flat_map(|line| line["* CAPABILITY ".len()..].split(' '))
            .map(str::to_owned)
            .collect();

        // The backend's ID reply is bookkeeping only; a backend which does
        // not understand ID is still usable.
        let mut id_fields =
            format!("\"{}\" \"{}\"", PROXY_ID_KEY, quotable(identity.node));
        if let Some(secret) = identity.secret {
            id_fields.push_str(&format!(
                " \"{}\" \"{}\"",
                PROXY_SECRET_ID_KEY,
                quotable(secret)
            ));
        }
        let id = self
            .client
            .command(&format!("ID ({})", id_fields))
            .map_err(|e| client_error(&node, e))?;
        if require_ok(&node, "ID", &id).is_err() {
            warn!("Node {} rejected proxy identification", node);
        }

        let tag = self.client.next_tag();
        let user = credentials.account.as_bytes();
        let password = credentials.password.unsecure();
        let mut login = Vec::new();
        write!(login, "{} LOGIN {{{}+}}\r\n", tag, user.len())?;
        login.extend_from_slice(user);
        write!(login, " {{{}+}}\r\n", password.len())?;
        login.extend_from_slice(password);
        login.extend_from_slice(b"\r\n");
        self.client
            .write_raw(&login)
            .map_err(|e| client_error(&node, e))?;

        let responses = self
            .client
            .read_until_tagged(&tag)
            .map_err(|e| client_error(&node, e))?;
        let accepted = responses
            .last()
            .and_then(|line| line.get(tag.len()..))
            .map_or(false, |rest| rest.starts_with(b" OK"));
        if !accepted {
            return Err(Error::BackendUnavailable(format!(
                "{} rejected login for {}",
                node, credentials.account
            )));
        }

        Ok(())
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Whether the backend has closed, or is closing, the connection.
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// Forward `command` and stream its untagged responses into `sink`.
    ///
    /// Returns the backend's tagged completion, rewritten to carry `tag`.
    ///
    /// Fails with `BackendDropped` if an earlier command saw the backend
    /// announce that it is closing the connection, and with
    /// `BackendUnavailable` if the connection fails during this command.
    pub fn proxy(
        &mut self,
        tag: &str,
        command: &s::CommandText,
        sink: &mut dyn FnMut(s::Response),
    ) -> Result<s::Response, Error> {
        if self.dropped {
            return Err(Error::BackendDropped);
        }

        let node = self.node.clone();
        let backend_tag = self.client.next_tag();
        let mut buf = Vec::with_capacity(command.len() + 16);
        command.write_retagged(&backend_tag, &mut buf)?;
        if let Err(e) = self.client.write_raw(&buf) {
            self.dropped = true;
            return Err(client_error(&node, e));
        }

        loop {
            let line = match self.client.read_response() {
                Ok(line) => line,
                Err(e) => {
                    self.dropped = true;
                    return Err(client_error(&node, e));
                }
            };

            if client::is_tagged(&line, &backend_tag) {
                let mut rewritten = tag.as_bytes().to_vec();
                rewritten.extend_from_slice(&line[backend_tag.len()..]);
                return Ok(s::Response::Raw(rewritten));
            } else if is_bye(&line) {
                info!(
                    "Node {} is closing the connection: {}",
                    node,
                    String::from_utf8_lossy(&line)
                );
                self.dropped = true;
            } else if line.starts_with(b"* ") {
                sink(s::Response::Raw(line));
            } else if line.starts_with(b"+") {
                // Literals are always sent non-synchronising
                continue;
            } else {
                self.dropped = true;
                return Err(Error::BackendProtocol(format!(
                    "Unexpected line from {}: {}",
                    node,
                    String::from_utf8_lossy(&line[..line.len().min(64)])
                )));
            }
        }
    }
}

impl fmt::Debug for BackendProxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BackendProxy")
            .field("node", &self.node)
            .field("client", &"<connection>")
            .field("capabilities", &self.capabilities)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl Drop for BackendProxy {
    fn drop(&mut self) {
        if !self.dropped {
            let tag = self.client.next_tag();
            let _ = self
                .client
                .write_raw(format!("{} LOGOUT\r\n", tag).as_bytes());
        }
    }
}

fn is_bye(line: &[u8]) -> bool {
    line.len() >= 5 && line[..5].eq_ignore_ascii_case(b"* BYE")
}

fn require_ok(node: &Node, what: &str, lines: &[String]) -> Result<(), Error> {
    let completion = lines.last().map(String::as_str).unwrap_or("");
    match completion.splitn(3, ' ').nth(1) {
        Some(cond) if cond.eq_ignore_ascii_case("OK") => Ok(()),
        _ => Err(Error::BackendProtocol(format!(
            "{} failed on {}: {}",
            what, node, completion
        ))),
    }
}

fn unavailable(node: &Node, e: io::Error) -> Error {
    Error::BackendUnavailable(format!("{}: {}", node, e))
}

/// Strip what cannot appear inside a quoted string.
fn quotable(s: &str) -> String {
    s.replace(|c: char| '"' == c || '\\' == c || '\r' == c || '\n' == c, "")
}

fn client_error(node: &Node, e: client::Error) -> Error {
    match e {
        client::Error::Io(e) => unavailable(node, e),
        client::Error::Protocol(msg) => {
            Error::BackendProtocol(format!("{}: {}", node, msg))
        }
    }
}
