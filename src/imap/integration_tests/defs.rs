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

use std::io::{self, BufReader};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::account::auth::StaticAuthenticator;
use crate::account::memory_store::MemoryStore;
use crate::cluster::topology::Node;
use crate::imap::client::Client;
use crate::imap::command_processor::{CommandProcessor, Services};
use crate::imap::proxy::{BackendConnector, BackendRead, BackendWrite};
use crate::imap::server::Server;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::*;

pub const MAX_LINE: usize = 1024;
pub const MAX_LITERAL: u32 = 4096;
pub const CLUSTER_SECRET: &str = "s3cret";

lazy_static! {
    // Hashing is the slowest part of setting up, so only do it once.
    static ref USERS: Vec<UserConfig> = vec![
        UserConfig {
            name: "azure".to_owned(),
            password_hash: cheap_hash("hunter2"),
            folders: vec!["Archive".to_owned()],
            grants: vec![],
        },
        UserConfig {
            name: "cyan".to_owned(),
            password_hash: cheap_hash("hunter3"),
            folders: vec!["Shared".to_owned(), "Private".to_owned()],
            grants: vec![GrantConfig {
                folder: "Shared".to_owned(),
                grantee: "azure".to_owned(),
                rights: "lrs".to_owned(),
            }],
        },
    ];
}

fn cheap_hash(password: &str) -> String {
    argon2::hash_encoded(
        password.as_bytes(),
        b"saltsaltsaltsalt",
        &argon2::Config {
            mem_cost: 64,
            time_cost: 1,
            ..argon2::Config::default()
        },
    )
    .unwrap()
}

fn system_config(local: &str, nodes: &[&str]) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.server.max_line = MAX_LINE;
    config.server.max_literal = MAX_LITERAL;
    // Small enough that loading any folder with a few messages pages
    config.server.page_size = 2;
    config.cluster.local_node = local.to_owned();
    config.cluster.nodes = nodes
        .iter()
        .map(|&id| NodeConfig {
            id: id.to_owned(),
            address: format!("{}.invalid:143", id),
        })
        .collect();
    config.cluster.strategy = "first".to_owned();
    config.cluster.proxy_secret = Some(CLUSTER_SECRET.to_owned());
    config.users = USERS.clone();
    config
        .identification
        .insert("support-url".to_owned(), "mailto:help@example.com".to_owned());
    config
}

fn services(
    config: SystemConfig,
    store: &Arc<MemoryStore>,
    connector: Arc<dyn BackendConnector>,
) -> Arc<Services> {
    Arc::new(
        Services::new(
            Arc::new(config),
            Arc::clone(store) as _,
            Arc::new(StaticAuthenticator::new(&USERS)),
            Arc::clone(store) as _,
            connector,
        )
        .unwrap(),
    )
}

pub struct Setup {
    pub store: Arc<MemoryStore>,
    /// The node the test's sessions connect to.
    pub services: Arc<Services>,
    /// In a cluster, the node owning every account.
    pub backend: Option<Arc<Services>>,
}

/// A single node owning every account.
pub fn set_up() -> Setup {
    crate::init_test_log();

    let store = Arc::new(MemoryStore::from_config(&USERS).unwrap());
    let services = services(
        system_config("local", &[]),
        &store,
        Arc::new(NoRoute),
    );
    Setup {
        store,
        services,
        backend: None,
    }
}

/// Two nodes, `a` and `b`, sharing one store. Every account lives on `a`;
/// the test's sessions connect to `b`.
pub fn set_up_cluster() -> Setup {
    crate::init_test_log();

    let store = Arc::new(MemoryStore::from_config(&USERS).unwrap());
    let a = services(
        system_config("a", &["a", "b"]),
        &store,
        Arc::new(NoRoute),
    );
    let b = services(
        system_config("b", &["a", "b"]),
        &store,
        Arc::new(InProcess(Arc::clone(&a))),
    );
    Setup {
        store,
        services: b,
        backend: Some(a),
    }
}

/// Like `set_up_cluster()`, but node `a` cannot be reached.
pub fn set_up_partitioned() -> Setup {
    crate::init_test_log();

    let store = Arc::new(MemoryStore::from_config(&USERS).unwrap());
    let b = services(
        system_config("b", &["a", "b"]),
        &store,
        Arc::new(NoRoute),
    );
    Setup {
        store,
        services: b,
        backend: None,
    }
}

/// A three-node cluster seen from node `c`, placing accounts by hash.
///
/// That puts `azure` on `c` itself and `cyan` on `b`, which cannot be
/// reached.
pub fn set_up_split() -> Setup {
    crate::init_test_log();

    let store = Arc::new(MemoryStore::from_config(&USERS).unwrap());
    let mut config = system_config("c", &["a", "b", "c"]);
    config.cluster.strategy = "hash".to_owned();
    let c = services(config, &store, Arc::new(NoRoute));
    Setup {
        store,
        services: c,
        backend: None,
    }
}

pub type PipeClient =
    Client<BufReader<os_pipe::PipeReader>, os_pipe::PipeWriter>;

impl Setup {
    pub fn connect(&self, name: &'static str) -> PipeClient {
        let (read, write) =
            spawn_server(Arc::clone(&self.services), name.to_owned()).unwrap();
        Client::new(BufReader::new(read), write, Some(name))
    }

    /// Connect directly to the backend node of a cluster.
    pub fn connect_backend(&self, name: &'static str) -> PipeClient {
        let backend = self.backend.as_ref().expect("not a cluster");
        let (read, write) =
            spawn_server(Arc::clone(backend), name.to_owned()).unwrap();
        Client::new(BufReader::new(read), write, Some(name))
    }
}

fn spawn_server(
    services: Arc<Services>,
    name: String,
) -> io::Result<(os_pipe::PipeReader, os_pipe::PipeWriter)> {
    let (server_in, client_out) = os_pipe::pipe()?;
    let (client_in, server_out) = os_pipe::pipe()?;

    thread::spawn(move || {
        let processor = CommandProcessor::new(
            LogPrefix::new("imap".to_owned(), name),
            Arc::clone(&services),
        );
        let mut server = Server::new(
            server_in,
            server_out,
            processor,
            services.config.server.max_line,
            services.config.server.max_literal,
        );

        match server.run() {
            Ok(()) => (),
            Err(Error::Io(e))
                if io::ErrorKind::UnexpectedEof == e.kind()
                    || io::ErrorKind::BrokenPipe == e.kind() => {}
            Err(e) => panic!("Unexpected server error: {}", e),
        }
    });

    Ok((client_in, client_out))
}

/// Reaches another node by running a session on it in this process.
struct InProcess(Arc<Services>);

impl BackendConnector for InProcess {
    fn connect(&self, node: &Node) -> io::Result<(BackendRead, BackendWrite)> {
        assert_eq!(self.0.config.cluster.local_node, node.id);
        let (read, write) =
            spawn_server(Arc::clone(&self.0), format!("proxy-{}", node.id))?;
        Ok((Box::new(BufReader::new(read)), Box::new(write)))
    }
}

struct NoRoute;

impl BackendConnector for NoRoute {
    fn connect(&self, node: &Node) -> io::Result<(BackendRead, BackendWrite)> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("no route to {}", node),
        ))
    }
}

pub fn skip_greeting(client: &mut PipeClient) {
    client.read_response().unwrap();
}

pub fn log_in_as(client: &mut PipeClient, user: &str, password: &str) {
    skip_greeting(client);
    let lines = client
        .command(&format!("LOGIN {} {}", user, password))
        .unwrap();
    assert_ok(&lines);
}

pub fn quick_log_in(client: &mut PipeClient) {
    log_in_as(client, "azure", "hunter2");
}

pub fn quick_select(client: &mut PipeClient, mailbox: &str) -> Vec<String> {
    ok_command(client, &format!("SELECT {}", mailbox))
}

/// The completion of a command with the tag removed.
pub fn completion(lines: &[String]) -> &str {
    lines
        .last()
        .and_then(|line| line.splitn(2, ' ').nth(1))
        .unwrap_or("")
}

pub fn assert_ok(lines: &[String]) {
    assert!(
        completion(lines).starts_with("OK"),
        "Command failed: {:?}",
        lines
    );
}

pub fn assert_completion(lines: &[String], pat: &str) {
    let completion = completion(lines);
    assert!(
        Regex::new(pat).unwrap().is_match(completion),
        "Expected\n\
         match: {:?}\n\
         Got:   {:?}\n",
        pat,
        completion
    );
}

pub fn ok_command(client: &mut PipeClient, command: &str) -> Vec<String> {
    let lines = client.command(command).unwrap();
    assert_ok(&lines);
    lines
}

/// The untagged responses among `lines` which match `pat`.
pub fn matching<'a>(lines: &'a [String], pat: &str) -> Vec<&'a str> {
    let re = Regex::new(pat).unwrap();
    lines
        .iter()
        .filter(|line| line.starts_with("* ") && re.is_match(line))
        .map(String::as_str)
        .collect()
}

pub fn assert_has_line(lines: &[String], pat: &str) {
    assert!(
        !matching(lines, pat).is_empty(),
        "No line matching {:?} in {:?}",
        pat,
        lines
    );
}

pub fn assert_no_line(lines: &[String], pat: &str) {
    let found = matching(lines, pat);
    assert!(found.is_empty(), "Unexpected {:?}", found);
}

/// Run `NOOP` until a response matching `pat` arrives.
///
/// Notifications from other sessions travel through the change listener,
/// so they take a moment to show up.
pub fn poll_until(client: &mut PipeClient, pat: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for _ in 0..100 {
        let lines = ok_command(client, "NOOP");
        let found = !matching(&lines, pat).is_empty();
        seen.extend(lines);
        if found {
            return seen;
        }
        thread::sleep(Duration::from_millis(20));
    }

    panic!("Never got a line matching {:?}; saw {:?}", pat, seen);
}

/// Append `message` to `mailbox` through the protocol and return the
/// completion.
pub fn append(
    client: &mut PipeClient,
    mailbox: &str,
    flags: &str,
    message: &[u8],
) -> Vec<String> {
    let tag = client.next_tag();
    let mut command = format!(
        "{} APPEND {} {}{{{}+}}\r\n",
        tag,
        mailbox,
        flags,
        message.len()
    )
    .into_bytes();
    command.extend_from_slice(message);
    command.extend_from_slice(b"\r\n");
    client.write_raw(&command).unwrap();
    client
        .read_until_tagged(&tag)
        .unwrap()
        .into_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

pub fn message(subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: azure@example.com\r\n\
         To: cyan@example.com\r\n\
         Subject: {}\r\n\
         \r\n\
         {}\r\n",
        subject, body
    )
    .into_bytes()
}
