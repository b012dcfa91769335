//! Cluster membership: node identity, per-peer records, the membership
//! table, and the gossip/ping-ack message set.

mod identity;
mod info;
mod list;
mod message;

pub use identity::NodeId;
pub use info::{DetectorMode, MemberInfo, MemberStatus};
pub use list::MembershipList;
pub use message::{ClusterMessage, ClusterMsgKind};

pub(crate) use message::CLUSTER_KIND_MAX;
