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

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mailfront.
///
/// This is stored in a file named `mailfront.toml` under the Mailfront system
/// root, which is typically `/usr/local/etc/mailfront` or `/etc/mailfront`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Limits and addresses for the client-facing listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// The backend nodes and how accounts are spread across them.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Where folder snapshots are kept between sessions.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Statically configured users.
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Extra values to report in the ID command.
    /// The main useful value here is `support-url`.
    #[serde(default)]
    pub identification: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address to listen on for plain-text IMAP connections.
    pub listen: String,
    /// The longest single command line, in bytes, accepted from a client.
    ///
    /// Literals in commands other than `APPEND` count towards this limit.
    pub max_line: usize,
    /// The largest literal accepted in an `APPEND`.
    pub max_literal: u32,
    /// Connections which send nothing for this many seconds are closed.
    pub idle_timeout_secs: u64,
    /// How many messages to request from the store at a time when building a
    /// folder snapshot. 0 loads the whole folder in one request.
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "127.0.0.1:1143".to_owned(),
            max_line: 65536,
            max_literal: 64 * 1024 * 1024,
            idle_timeout_secs: 30 * 60,
            page_size: 1000,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        if 0 == self.idle_timeout_secs {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// The identity of this process within `nodes`.
    pub local_node: String,
    /// Every node that may own accounts.
    ///
    /// If empty, the cluster consists of only this node, reachable at
    /// `server.listen`.
    pub nodes: Vec<NodeConfig>,
    /// The name of the load-balancing strategy. Unknown names fall back to
    /// `hash`.
    pub strategy: String,
    /// A secret shared by every node, presented when proxying a session to
    /// another node.
    ///
    /// A connection announcing itself as a proxy is only served without
    /// further routing if it presents this secret. If unset, such
    /// announcements are ignored and every session is routed normally.
    pub proxy_secret: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            local_node: "local".to_owned(),
            nodes: Vec::new(),
            strategy: "hash".to_owned(),
            proxy_secret: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeConfig {
    pub id: String,
    /// `host:port` of the node's IMAP listener.
    pub address: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// An in-process map, lost on restart.
    Local,
    /// A directory of files, which may be shared between nodes.
    Directory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    /// The cache directory when `kind` is `directory`.
    pub path: PathBuf,
    /// The maximum number of snapshots held by the local cache.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            kind: CacheKind::Local,
            path: PathBuf::new(),
            capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserConfig {
    pub name: String,
    /// An encoded Argon2 hash, as printed by `mailfront hash-password`.
    pub password_hash: String,
    /// Folders to create for the user beyond INBOX.
    #[serde(default)]
    pub folders: Vec<String>,
    /// Access granted to other users on this user's folders.
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GrantConfig {
    pub folder: String,
    pub grantee: String,
    /// RFC 4314 rights letters, e.g. `lrs`.
    pub rights: String,
}
