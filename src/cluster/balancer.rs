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

//! Assignment of accounts to backend nodes.
//!
//! An assignment is a pure function of the account name and the node pool.
//! Nothing is cached here: the pool is read from the topology every time, so
//! a changed topology takes effect on the next assignment.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::warn;
use tiny_keccak::{Hasher, Sha3};

use super::topology::{Node, Topology};
use crate::support::error::Error;

/// A way of choosing one node for an account.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Choose a node for `account` from `nodes`.
    ///
    /// `nodes` is never empty, is sorted by id and contains no duplicates.
    fn pick<'a>(&self, account: &str, nodes: &'a [Node]) -> &'a Node;
}

/// The default strategy: hash the account name and take it modulo the pool
/// size.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashStrategy;

impl HashStrategy {
    fn hash(account: &str) -> u64 {
        let mut sha3 = Sha3::v256();
        // Account names are case-insensitive everywhere else, so they must
        // be here too or the same user could land on two nodes.
        sha3.update(account.to_lowercase().as_bytes());
        let mut out = [0u8; 32];
        sha3.finalize(&mut out);
        BigEndian::read_u64(&out[..8])
    }
}

impl Strategy for HashStrategy {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn pick<'a>(&self, account: &str, nodes: &'a [Node]) -> &'a Node {
        let ix = Self::hash(account) % nodes.len() as u64;
        &nodes[ix as usize]
    }
}

/// Always the first node. Mostly useful for single-node setups and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstNodeStrategy;

impl Strategy for FirstNodeStrategy {
    fn name(&self) -> &'static str {
        "first"
    }

    fn pick<'a>(&self, _: &str, nodes: &'a [Node]) -> &'a Node {
        &nodes[0]
    }
}

type StrategyCtor = fn() -> Box<dyn Strategy>;

/// Named strategy constructors, looked up from configuration.
pub struct StrategyRegistry {
    entries: Vec<(&'static str, StrategyCtor)>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut this = StrategyRegistry {
            entries: Vec::new(),
        };
        this.register("hash", || Box::new(HashStrategy));
        this.register("first", || Box::new(FirstNodeStrategy));
        this
    }
}

impl StrategyRegistry {
    /// Register `ctor` under `name`, replacing any existing entry.
    pub fn register(&mut self, name: &'static str, ctor: StrategyCtor) {
        self.entries.retain(|&(n, _)| n != name);
        self.entries.push((name, ctor));
    }

    /// Build the strategy called `name`.
    ///
    /// Unknown names give the hash strategy so that a typo in the
    /// configuration degrades placement instead of breaking every session.
    pub fn build(&self, name: &str) -> Box<dyn Strategy> {
        match self.entries.iter().find(|&&(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(&(_, ctor)) => ctor(),
            None => {
                warn!(
                    "Unknown load-balancing strategy {:?}, using \"hash\"",
                    name
                );
                Box::new(HashStrategy)
            }
        }
    }
}

pub struct LoadBalancer {
    strategy: Box<dyn Strategy>,
}

impl LoadBalancer {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        LoadBalancer { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Assign `account` to one node of `pool`.
    ///
    /// The result does not depend on the order of `pool`.
    pub fn assign(&self, account: &str, pool: &[Node]) -> Result<Node, Error> {
        let mut nodes = pool.to_vec();
        nodes.sort();
        nodes.dedup();

        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable);
        }

        Ok(self.strategy.pick(account, &nodes).clone())
    }
}

/// Where accounts live relative to this process.
pub struct Placement {
    balancer: LoadBalancer,
    topology: Arc<dyn Topology>,
    local: String,
}

impl Placement {
    pub fn new(
        balancer: LoadBalancer,
        topology: Arc<dyn Topology>,
        local: String,
    ) -> Self {
        Placement {
            balancer,
            topology,
            local,
        }
    }

    pub fn local_node(&self) -> &str {
        &self.local
    }

    pub fn node_for(&self, account: &str) -> Result<Node, Error> {
        self.balancer.assign(account, &self.topology.nodes())
    }

    /// The node owning `account` if it is not this one.
    pub fn remote_node(&self, account: &str) -> Result<Option<Node>, Error> {
        let node = self.node_for(account)?;
        if node.id == self.local {
            Ok(None)
        } else {
            Ok(Some(node))
        }
    }
}
