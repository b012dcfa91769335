//! Stable node identity.

use std::fmt;

use crate::utils::{unix_secs, ShoalError, WireReader, WireWriter};

/// Identity of a node process: where it listens plus when it booted. The
/// boot-time field disambiguates a restarted process at the same address, so
/// equality and hashing cover all three fields. Immutable for the lifetime
/// of a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    host: String,
    port: String,
    boot_time: u32,
}

impl NodeId {
    pub const MAX_HOST_LEN: usize = 32;
    pub const MAX_PORT_LEN: usize = 5;

    /// Builds an identity with an explicit boot timestamp, validating field
    /// lengths.
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        boot_time: u32,
    ) -> Result<Self, ShoalError> {
        let host = host.into();
        let port = port.into();
        if host.is_empty() || host.len() > Self::MAX_HOST_LEN {
            return Err(ShoalError(format!(
                "invalid host '{}': length must be 1..={}",
                host,
                Self::MAX_HOST_LEN
            )));
        }
        if port.is_empty() || port.len() > Self::MAX_PORT_LEN {
            return Err(ShoalError(format!(
                "invalid port '{}': length must be 1..={}",
                port,
                Self::MAX_PORT_LEN
            )));
        }
        Ok(NodeId {
            host,
            port,
            boot_time,
        })
    }

    /// Builds the identity of a process booting right now.
    pub fn fresh(host: impl Into<String>, port: impl Into<String>) -> Result<Self, ShoalError> {
        Self::new(host, port, unix_secs())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn boot_time(&self) -> u32 {
        self.boot_time
    }

    /// `host:port`, the node's datagram endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port:boot_time`, the canonical string hashed onto the ring and
    /// used as this node's client identity in block records.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.boot_time)
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.put_str(&self.host);
        w.put_str(&self.port);
        w.put_u32(self.boot_time);
    }

    pub(crate) fn decode(r: &mut WireReader) -> Result<Self, ShoalError> {
        let host = r.get_str()?;
        let port = r.get_str()?;
        let boot_time = r.get_u32()?;
        Self::new(host, port, boot_time)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.boot_time)
    }
}

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn round_trip() -> Result<(), ShoalError> {
        let id = NodeId::new("10.0.0.1", "9000", 1_700_000_000)?;
        let mut w = WireWriter::new();
        id.encode(&mut w);
        let bytes = w.finish();
        let decoded = NodeId::decode(&mut WireReader::new(&bytes))?;
        assert_eq!(decoded, id);
        Ok(())
    }

    #[test]
    fn field_length_limits() {
        assert!(NodeId::new("h".repeat(33), "9000", 0).is_err());
        assert!(NodeId::new("localhost", "123456", 0).is_err());
        assert!(NodeId::new("", "9000", 0).is_err());
        assert!(NodeId::new("h".repeat(32), "12345", 0).is_ok());
    }

    #[test]
    fn restart_changes_identity() -> Result<(), ShoalError> {
        let before = NodeId::new("localhost", "9000", 100)?;
        let after = NodeId::new("localhost", "9000", 200)?;
        assert_ne!(before, after);
        assert_eq!(before.endpoint(), after.endpoint());
        Ok(())
    }

    #[test]
    fn canonical_format() -> Result<(), ShoalError> {
        let id = NodeId::new("localhost", "9000", 42)?;
        assert_eq!(id.canonical(), "localhost:9000:42");
        assert_eq!(format!("{}", id), "localhost:9000:42");
        Ok(())
    }
}
