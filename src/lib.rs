//! Public interface to the Shoal core library, linked by the node
//! executable and by anything embedding a node.
//!
//! Shoal is an append-only replicated file store over best-effort UDP
//! datagrams: cluster membership comes from a SWIM-style failure detector
//! (gossip or ping-ack, with or without suspicion), file placement from a
//! consistent-hash ring, and per-client read-my-writes consistency from an
//! append tracker checked on every read.

#[macro_use]
mod utils;

mod fileops;
mod membership;
mod node;
mod ring;
mod store;
mod transport;

pub use fileops::{
    FileMessage, FileOps, FileOpsConfig, LsReplicaStatus, LsReport, StoreEntry,
};
pub use membership::{
    ClusterMessage, ClusterMsgKind, DetectorMode, MemberInfo, MemberStatus, MembershipList, NodeId,
};
pub use node::{NodeConfig, ShoalNode};
pub use ring::{file_position, node_position, HashRing};
pub use store::{order_blocks, BlockStore, ClientTracker, FileBlock, FileMetadata};
pub use transport::DatagramHub;
pub use utils::{stable_hash, unix_millis, unix_secs, ShoalError};
