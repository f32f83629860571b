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

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

use crate::account::auth::StaticAuthenticator;
use crate::account::memory_store::MemoryStore;
use crate::imap::command_processor::{CommandProcessor, Services};
use crate::imap::proxy::TcpConnector;
use crate::imap::server::Server;
use crate::support::log_prefix::LogPrefix;
use crate::support::sysexits::Sysexit;
use crate::support::system_config::SystemConfig;

// Need to use a this and not die! so that errors go to syslog/etc
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub fn serve(system_config: SystemConfig) {
    let system_config = Arc::new(system_config);

    let store = match MemoryStore::from_config(&system_config.users) {
        Ok(store) => Arc::new(store),
        Err(e) => fatal!(EX_CONFIG, "Invalid [[users]] configuration: {}", e),
    };

    let services = match Services::new(
        Arc::clone(&system_config),
        Arc::clone(&store) as _,
        Arc::new(StaticAuthenticator::new(&system_config.users)),
        store,
        Arc::new(TcpConnector {
            read_timeout: system_config.server.idle_timeout(),
        }),
    ) {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("Failed to initialise: {}", e);
            Sysexit::for_error(&e).exit()
        }
    };

    let listener = match TcpListener::bind(&system_config.server.listen) {
        Ok(listener) => listener,
        Err(e) => fatal!(
            EX_OSERR,
            "Unable to listen on {}: {}",
            system_config.server.listen,
            e
        ),
    };

    info!(
        "Node {} listening on {}",
        system_config.cluster.local_node, system_config.server.listen
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let services = Arc::clone(&services);
                if let Err(e) = thread::Builder::new()
                    .name("session".to_owned())
                    .spawn(move || session(stream, services))
                {
                    error!("Unable to start session thread: {}", e);
                }
            }
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

fn session(stream: TcpStream, services: Arc<Services>) {
    let peer_name = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            warn!("Unable to determine peer name: {}", e);
            "unknown-socket".to_owned()
        }
    };

    let config = &services.config.server;
    if let Err(e) = stream
        .set_read_timeout(config.idle_timeout())
        .and_then(|_| stream.set_write_timeout(config.idle_timeout()))
    {
        warn!("{} Unable to configure timeouts: {}", peer_name, e);
    }
    let _ = stream.set_nodelay(true);

    let write = match stream.try_clone() {
        Ok(write) => write,
        Err(e) => {
            warn!("{} Unable to split connection: {}", peer_name, e);
            return;
        }
    };

    info!("{} Connection established", peer_name);
    let max_line = config.max_line;
    let max_literal = config.max_literal;
    let log_prefix = LogPrefix::new("imap".to_owned(), peer_name.clone());
    let processor = CommandProcessor::new(log_prefix, Arc::clone(&services));
    let mut server = Server::new(
        stream,
        io::BufWriter::new(write),
        processor,
        max_line,
        max_literal,
    );

    match server.run() {
        Ok(_) => info!("{} Normal client disconnect", peer_name),
        Err(e) => warn!("{} Abnormal client disconnect: {}", peer_name, e),
    }
}
