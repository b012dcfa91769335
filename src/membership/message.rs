//! Membership protocol wire messages.
//!
//! A cluster datagram is one discriminant byte (0..=5) followed by a u32
//! record count and that many `MemberInfo` records. File operation messages
//! live in a disjoint discriminant range (100+), so the receive loop can
//! demultiplex on the first byte alone.

use crate::membership::MemberInfo;
use crate::utils::{ShoalError, WireReader, WireWriter};

use bytes::Bytes;

/// Highest discriminant byte belonging to the membership message range.
pub(crate) const CLUSTER_KIND_MAX: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterMsgKind {
    Ping = 0,
    Ack = 1,
    Gossip = 2,
    Join = 3,
    Leave = 4,
    Switch = 5,
}

impl ClusterMsgKind {
    fn from_u8(v: u8) -> Result<Self, ShoalError> {
        match v {
            0 => Ok(ClusterMsgKind::Ping),
            1 => Ok(ClusterMsgKind::Ack),
            2 => Ok(ClusterMsgKind::Gossip),
            3 => Ok(ClusterMsgKind::Join),
            4 => Ok(ClusterMsgKind::Leave),
            5 => Ok(ClusterMsgKind::Switch),
            _ => Err(ShoalError(format!("invalid cluster message kind {}", v))),
        }
    }
}

/// A membership message: PING/ACK/JOIN/LEAVE/SWITCH carry a single record
/// (the sender's, or for SWITCH the mode carrier); GOSSIP carries a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMessage {
    pub kind: ClusterMsgKind,
    pub records: Vec<MemberInfo>,
}

impl ClusterMessage {
    pub fn new(kind: ClusterMsgKind, records: Vec<MemberInfo>) -> Self {
        ClusterMessage { kind, records }
    }

    pub fn encode(&self) -> Result<Bytes, ShoalError> {
        let mut w = WireWriter::new();
        w.put_u8(self.kind as u8);
        w.put_u32(self.records.len() as u32);
        for record in &self.records {
            record.encode(&mut w);
        }
        w.finish_datagram()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ShoalError> {
        let mut r = WireReader::new(buf);
        let kind = ClusterMsgKind::from_u8(r.get_u8()?)?;
        let count = r.get_u32()? as usize;
        let mut records = Vec::with_capacity(count.min(128));
        for _ in 0..count {
            records.push(MemberInfo::decode(&mut r)?);
        }
        Ok(ClusterMessage { kind, records })
    }
}

#[cfg(test)]
mod message_tests {
    use super::*;
    use crate::membership::{DetectorMode, MemberStatus, NodeId};

    fn record(port: &str, status: MemberStatus) -> MemberInfo {
        MemberInfo {
            node_id: NodeId::new("localhost", port, 7).unwrap(),
            status,
            mode: DetectorMode::Gossip,
            local_time: 0,
            incarnation: 2,
            heartbeat: 31,
        }
    }

    fn wire_eq(a: &MemberInfo, b: &MemberInfo) -> bool {
        // everything except local observation time survives the wire
        a.node_id == b.node_id
            && a.status == b.status
            && a.mode == b.mode
            && a.incarnation == b.incarnation
            && a.heartbeat == b.heartbeat
    }

    #[test]
    fn round_trip_batch() -> Result<(), ShoalError> {
        let msg = ClusterMessage::new(
            ClusterMsgKind::Gossip,
            vec![
                record("9000", MemberStatus::Alive),
                record("9001", MemberStatus::Suspect),
                record("9002", MemberStatus::Left),
            ],
        );
        let bytes = msg.encode()?;
        assert_eq!(bytes[0], ClusterMsgKind::Gossip as u8);
        let decoded = ClusterMessage::decode(&bytes)?;
        assert_eq!(decoded.kind, msg.kind);
        assert_eq!(decoded.records.len(), msg.records.len());
        for (a, b) in decoded.records.iter().zip(msg.records.iter()) {
            assert!(wire_eq(a, b));
        }
        Ok(())
    }

    #[test]
    fn round_trip_empty() -> Result<(), ShoalError> {
        let msg = ClusterMessage::new(ClusterMsgKind::Leave, vec![]);
        let decoded = ClusterMessage::decode(&msg.encode()?)?;
        assert_eq!(decoded.kind, ClusterMsgKind::Leave);
        assert!(decoded.records.is_empty());
        Ok(())
    }

    #[test]
    fn kinds_stay_in_membership_range() {
        for kind in [
            ClusterMsgKind::Ping,
            ClusterMsgKind::Ack,
            ClusterMsgKind::Gossip,
            ClusterMsgKind::Join,
            ClusterMsgKind::Leave,
            ClusterMsgKind::Switch,
        ] {
            assert!((kind as u8) <= CLUSTER_KIND_MAX);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(ClusterMessage::decode(&[]).is_err());
        assert!(ClusterMessage::decode(&[9, 0, 0, 0, 0]).is_err());
        // promised record missing
        assert!(ClusterMessage::decode(&[0, 0, 0, 0, 1]).is_err());
    }
}
