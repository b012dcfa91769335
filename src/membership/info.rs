//! Per-peer membership records.

use std::fmt;

use crate::membership::NodeId;
use crate::utils::{unix_secs, ShoalError, WireReader, WireWriter};

/// Liveness status of a peer as seen from one node's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemberStatus {
    Alive = 0,
    Suspect = 1,
    Dead = 2,
    Left = 3,
}

impl MemberStatus {
    pub(crate) fn from_u8(v: u8) -> Result<Self, ShoalError> {
        match v {
            0 => Ok(MemberStatus::Alive),
            1 => Ok(MemberStatus::Suspect),
            2 => Ok(MemberStatus::Dead),
            3 => Ok(MemberStatus::Left),
            _ => Err(ShoalError(format!("invalid member status byte {}", v))),
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MemberStatus::Alive => "ALIVE",
            MemberStatus::Suspect => "SUSPECT",
            MemberStatus::Dead => "DEAD",
            MemberStatus::Left => "LEFT",
        };
        write!(f, "{}", s)
    }
}

/// Failure detection operating mode, cluster-global. Two base protocols,
/// each with or without the suspicion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetectorMode {
    GossipSuspect = 0,
    PingAckSuspect = 1,
    Gossip = 2,
    PingAck = 3,
}

impl DetectorMode {
    /// True for the two gossip-dissemination modes.
    pub fn gossiping(self) -> bool {
        matches!(self, DetectorMode::Gossip | DetectorMode::GossipSuspect)
    }

    /// True when the suspicion stage is enabled.
    pub fn suspicion(self) -> bool {
        matches!(
            self,
            DetectorMode::GossipSuspect | DetectorMode::PingAckSuspect
        )
    }

    /// Parses the `switch <gossip|ping> <suspect|nosuspect>` command words.
    pub fn parse_name(protocol: &str, suspicion: &str) -> Option<Self> {
        let suspect = match suspicion {
            "suspect" => true,
            "nosuspect" => false,
            _ => return None,
        };
        match (protocol, suspect) {
            ("gossip", true) => Some(DetectorMode::GossipSuspect),
            ("gossip", false) => Some(DetectorMode::Gossip),
            ("ping", true) => Some(DetectorMode::PingAckSuspect),
            ("ping", false) => Some(DetectorMode::PingAck),
            _ => None,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self, ShoalError> {
        match v {
            0 => Ok(DetectorMode::GossipSuspect),
            1 => Ok(DetectorMode::PingAckSuspect),
            2 => Ok(DetectorMode::Gossip),
            3 => Ok(DetectorMode::PingAck),
            _ => Err(ShoalError(format!("invalid detector mode byte {}", v))),
        }
    }
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DetectorMode::GossipSuspect => "<gossip, suspect>",
            DetectorMode::PingAckSuspect => "<ping, suspect>",
            DetectorMode::Gossip => "<gossip, nosuspect>",
            DetectorMode::PingAck => "<ping, nosuspect>",
        };
        write!(f, "{}", s)
    }
}

/// One node's view of one peer.
///
/// `incarnation` is owned by the peer itself and only ever bumped by it (to
/// refute rumors about itself); `heartbeat` is bumped by the peer every tick
/// in gossip mode. `local_time` is when THIS node last touched the record;
/// it never crosses the wire and is re-stamped on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub node_id: NodeId,
    pub status: MemberStatus,
    pub mode: DetectorMode,
    pub local_time: u32,
    pub incarnation: u32,
    pub heartbeat: u32,
}

impl MemberInfo {
    /// A freshly observed ALIVE record.
    pub fn alive(node_id: NodeId, mode: DetectorMode) -> Self {
        MemberInfo {
            node_id,
            status: MemberStatus::Alive,
            mode,
            local_time: unix_secs(),
            incarnation: 0,
            heartbeat: 0,
        }
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        self.node_id.encode(w);
        w.put_u8(self.status as u8);
        w.put_u8(self.mode as u8);
        w.put_u32(self.incarnation);
        w.put_u32(self.heartbeat);
    }

    pub(crate) fn decode(r: &mut WireReader) -> Result<Self, ShoalError> {
        let node_id = NodeId::decode(r)?;
        let status = MemberStatus::from_u8(r.get_u8()?)?;
        let mode = DetectorMode::from_u8(r.get_u8()?)?;
        let incarnation = r.get_u32()?;
        let heartbeat = r.get_u32()?;
        Ok(MemberInfo {
            node_id,
            status,
            mode,
            local_time: unix_secs(),
            incarnation,
            heartbeat,
        })
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} status={} incarnation={} heartbeat={} mode={}",
            self.node_id, self.status, self.incarnation, self.heartbeat, self.mode
        )
    }
}

#[cfg(test)]
mod info_tests {
    use super::*;

    fn sample() -> MemberInfo {
        MemberInfo {
            node_id: NodeId::new("localhost", "9000", 77).unwrap(),
            status: MemberStatus::Suspect,
            mode: DetectorMode::GossipSuspect,
            local_time: 123,
            incarnation: 4,
            heartbeat: 19,
        }
    }

    #[test]
    fn round_trip_restamps_local_time() -> Result<(), ShoalError> {
        let info = sample();
        let mut w = WireWriter::new();
        info.encode(&mut w);
        let bytes = w.finish();
        let decoded = MemberInfo::decode(&mut WireReader::new(&bytes))?;
        assert_eq!(decoded.node_id, info.node_id);
        assert_eq!(decoded.status, info.status);
        assert_eq!(decoded.mode, info.mode);
        assert_eq!(decoded.incarnation, info.incarnation);
        assert_eq!(decoded.heartbeat, info.heartbeat);
        // local observation time is never transmitted
        assert!(decoded.local_time >= unix_secs().saturating_sub(1));
        Ok(())
    }

    #[test]
    fn mode_predicates() {
        assert!(DetectorMode::Gossip.gossiping());
        assert!(!DetectorMode::Gossip.suspicion());
        assert!(DetectorMode::PingAckSuspect.suspicion());
        assert!(!DetectorMode::PingAckSuspect.gossiping());
    }

    #[test]
    fn mode_parse_name() {
        assert_eq!(
            DetectorMode::parse_name("gossip", "suspect"),
            Some(DetectorMode::GossipSuspect)
        );
        assert_eq!(
            DetectorMode::parse_name("ping", "nosuspect"),
            Some(DetectorMode::PingAck)
        );
        assert_eq!(DetectorMode::parse_name("raft", "suspect"), None);
        assert_eq!(DetectorMode::parse_name("gossip", "maybe"), None);
    }

    #[test]
    fn rejects_bad_bytes() {
        assert!(MemberStatus::from_u8(9).is_err());
        assert!(DetectorMode::from_u8(9).is_err());
    }
}
