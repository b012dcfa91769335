//! Per-file metadata records.

use crate::utils::{stable_hash, ShoalError, WireReader, WireWriter};

/// Metadata for one stored file: the ordered block-id list is the file's
/// content as seen by THIS replica; different replicas may observe different
/// orders until a merge reconciles them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub filename: String,
    pub file_id: u64,
    pub total_size: u64,
    pub block_ids: Vec<u64>,
    pub version: u32,
    pub created_ms: u64,
    pub last_modified_ms: u64,
}

impl FileMetadata {
    pub fn file_id_for(filename: &str) -> u64 {
        stable_hash(filename.as_bytes())
    }

    /// Fresh metadata for a newly created file (version 1, no blocks yet).
    pub fn fresh(filename: &str, now_ms: u64) -> Self {
        FileMetadata {
            filename: filename.to_string(),
            file_id: Self::file_id_for(filename),
            total_size: 0,
            block_ids: Vec::new(),
            version: 1,
            created_ms: now_ms,
            last_modified_ms: now_ms,
        }
    }

    /// On-wire and on-disk layout: u32 filename_len + bytes, u64 file_id,
    /// u64 total_size, u32 version, u64 created_ms, u64 last_modified_ms,
    /// u32 block_count, then block_count x u64 block_id.
    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.put_str(&self.filename);
        w.put_u64(self.file_id);
        w.put_u64(self.total_size);
        w.put_u32(self.version);
        w.put_u64(self.created_ms);
        w.put_u64(self.last_modified_ms);
        w.put_u32(self.block_ids.len() as u32);
        for id in &self.block_ids {
            w.put_u64(*id);
        }
    }

    pub(crate) fn decode(r: &mut WireReader) -> Result<Self, ShoalError> {
        let filename = r.get_str()?;
        let file_id = r.get_u64()?;
        let total_size = r.get_u64()?;
        let version = r.get_u32()?;
        let created_ms = r.get_u64()?;
        let last_modified_ms = r.get_u64()?;
        let count = r.get_u32()? as usize;
        let mut block_ids = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            block_ids.push(r.get_u64()?);
        }
        Ok(FileMetadata {
            filename,
            file_id,
            total_size,
            block_ids,
            version,
            created_ms,
            last_modified_ms,
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
mod metadata_tests {
    use super::*;

    #[test]
    fn round_trip() -> Result<(), ShoalError> {
        let meta = FileMetadata {
            filename: "reports/q3.txt".into(),
            file_id: FileMetadata::file_id_for("reports/q3.txt"),
            total_size: 1234,
            block_ids: vec![9, 8, 7, 6],
            version: 5,
            created_ms: 1_700_000_000_000,
            last_modified_ms: 1_700_000_000_999,
        };
        let decoded = FileMetadata::from_bytes(&meta.to_bytes())?;
        assert_eq!(decoded, meta);
        Ok(())
    }

    #[test]
    fn fresh_starts_at_version_one() {
        let meta = FileMetadata::fresh("a.txt", 42);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.total_size, 0);
        assert!(meta.block_ids.is_empty());
        assert_eq!(meta.created_ms, meta.last_modified_ms);
        assert_eq!(meta.file_id, FileMetadata::file_id_for("a.txt"));
    }

    #[test]
    fn file_id_is_name_hash() {
        assert_eq!(
            FileMetadata::file_id_for("x"),
            crate::utils::stable_hash(b"x")
        );
        assert_ne!(FileMetadata::file_id_for("x"), FileMetadata::file_id_for("y"));
    }
}
