//! Consistent-hash ring mapping nodes and filenames onto a 64-bit position
//! space.
//!
//! All nodes must derive identical positions, so positions come from the
//! crate's stable hash over the canonical `host:port:boot_time` string (for
//! nodes) or the raw filename (for files). Position collisions are
//! last-write-wins on the key; with 64-bit positions and double-digit node
//! counts they are not a practical concern.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::membership::NodeId;
use crate::utils::stable_hash;

use itertools::Itertools;

/// Ring position of a node.
pub fn node_position(id: &NodeId) -> u64 {
    stable_hash(id.canonical().as_bytes())
}

/// Ring position of a file.
pub fn file_position(filename: &str) -> u64 {
    stable_hash(filename.as_bytes())
}

/// Sorted position -> node map behind a readers-writer lock.
pub struct HashRing {
    ring: RwLock<BTreeMap<u64, NodeId>>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    pub fn new() -> Self {
        HashRing {
            ring: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add_node(&self, id: &NodeId) {
        let mut ring = self.ring.write().unwrap();
        ring.insert(node_position(id), id.clone());
    }

    pub fn remove_node(&self, id: &NodeId) {
        let mut ring = self.ring.write().unwrap();
        ring.remove(&node_position(id));
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        let ring = self.ring.read().unwrap();
        ring.get(&node_position(id)).is_some_and(|n| n == id)
    }

    pub fn len(&self) -> usize {
        self.ring.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().unwrap().is_empty()
    }

    /// Up to `n` distinct nodes starting at the least position >= `position`,
    /// wrapping around the ring once.
    pub fn successors(&self, position: u64, n: usize) -> Vec<NodeId> {
        let ring = self.ring.read().unwrap();
        ring.range(position..)
            .chain(ring.range(..position))
            .map(|(_, id)| id.clone())
            .unique()
            .take(n)
            .collect()
    }

    /// The replica set of a file: the `n` successors of its hash position.
    pub fn file_replicas(&self, filename: &str, n: usize) -> Vec<NodeId> {
        self.successors(file_position(filename), n)
    }

    /// All (position, node) entries in ascending position order.
    pub fn entries(&self) -> Vec<(u64, NodeId)> {
        let ring = self.ring.read().unwrap();
        ring.iter().map(|(p, id)| (*p, id.clone())).collect()
    }
}
