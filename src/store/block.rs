//! Immutable file blocks.

use crate::utils::{stable_hash, ShoalError, WireReader, WireWriter};

/// One appended unit of data. Blocks are immutable once built; the id is a
/// stable hash of (client, timestamp, sequence), which collides only for an
/// identical re-issue of the same append -- exactly the case where dropping
/// the duplicate is correct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub block_id: u64,
    pub client_id: String,
    pub sequence_num: u32,
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

impl FileBlock {
    /// Derives the globally unique block id.
    pub fn id_for(client_id: &str, timestamp_ms: u64, sequence_num: u32) -> u64 {
        let mut seed = Vec::with_capacity(client_id.len() + 12);
        seed.extend_from_slice(client_id.as_bytes());
        seed.extend_from_slice(&timestamp_ms.to_be_bytes());
        seed.extend_from_slice(&sequence_num.to_be_bytes());
        stable_hash(&seed)
    }

    pub fn build(client_id: &str, sequence_num: u32, timestamp_ms: u64, data: Vec<u8>) -> Self {
        FileBlock {
            block_id: Self::id_for(client_id, timestamp_ms, sequence_num),
            client_id: client_id.to_string(),
            sequence_num,
            timestamp_ms,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// On-wire and on-disk layout: u64 block_id, u32 client_id_len + bytes,
    /// u32 sequence_num, u64 timestamp_ms, u32 data_size, data bytes.
    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.block_id);
        w.put_str(&self.client_id);
        w.put_u32(self.sequence_num);
        w.put_u64(self.timestamp_ms);
        w.put_u32(self.data.len() as u32);
        w.put_raw(&self.data);
    }

    pub(crate) fn decode(r: &mut WireReader) -> Result<Self, ShoalError> {
        let block_id = r.get_u64()?;
        let client_id = r.get_str()?;
        let sequence_num = r.get_u32()?;
        let timestamp_ms = r.get_u64()?;
        let data_size = r.get_u32()? as usize;
        let data = r.get_raw(data_size)?;
        Ok(FileBlock {
            block_id,
            client_id,
            sequence_num,
            timestamp_ms,
            data,
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.finish().to_vec()
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Result<Self, ShoalError> {
        Self::decode(&mut WireReader::new(buf))
    }
}

#[cfg(test)]
mod block_tests {
    use super::*;

    #[test]
    fn round_trip() -> Result<(), ShoalError> {
        let block = FileBlock::build("localhost:9000:7", 3, 1_700_000_123_456, b"abcde".to_vec());
        let decoded = FileBlock::from_bytes(&block.to_bytes())?;
        assert_eq!(decoded, block);
        Ok(())
    }

    #[test]
    fn id_depends_on_all_seed_parts() {
        let base = FileBlock::id_for("c1", 1000, 0);
        assert_eq!(base, FileBlock::id_for("c1", 1000, 0));
        assert_ne!(base, FileBlock::id_for("c2", 1000, 0));
        assert_ne!(base, FileBlock::id_for("c1", 1001, 0));
        assert_ne!(base, FileBlock::id_for("c1", 1000, 1));
    }

    #[test]
    fn empty_payload_allowed() -> Result<(), ShoalError> {
        let block = FileBlock::build("c", 0, 5, vec![]);
        assert!(block.is_empty());
        let decoded = FileBlock::from_bytes(&block.to_bytes())?;
        assert_eq!(decoded, block);
        Ok(())
    }

    #[test]
    fn truncated_rejected() {
        let block = FileBlock::build("c", 0, 5, b"payload".to_vec());
        let bytes = block.to_bytes();
        assert!(FileBlock::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
