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

use std::cmp::Ordering;
use std::fmt;
use std::sync::RwLock;

use crate::support::system_config::{NodeConfig, SystemConfig};

/// A backend node.
///
/// Nodes are identified, compared and ordered solely by `id`.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: String,
    /// `host:port` of the node's IMAP service.
    pub address: String,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Node) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Node) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<&NodeConfig> for Node {
    fn from(config: &NodeConfig) -> Self {
        Node::new(config.id.clone(), config.address.clone())
    }
}

/// Supplies the current set of backend nodes.
///
/// The list is read afresh on every assignment, so changes become visible
/// to the next session that needs one.
pub trait Topology: Send + Sync {
    fn nodes(&self) -> Vec<Node>;
}

/// A topology fixed by configuration, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticTopology {
    nodes: RwLock<Vec<Node>>,
}

impl StaticTopology {
    pub fn new(nodes: Vec<Node>) -> Self {
        StaticTopology {
            nodes: RwLock::new(nodes),
        }
    }

    /// The configured nodes, or just this process at its listen address if
    /// none are configured.
    pub fn from_config(config: &SystemConfig) -> Self {
        let cluster = &config.cluster;
        if cluster.nodes.is_empty() {
            Self::new(vec![Node::new(
                cluster.local_node.clone(),
                config.server.listen.clone(),
            )])
        } else {
            Self::new(cluster.nodes.iter().map(Node::from).collect())
        }
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.write().unwrap() = nodes;
    }
}

impl Topology for StaticTopology {
    fn nodes(&self) -> Vec<Node> {
        self.nodes.read().unwrap().clone()
    }
}
