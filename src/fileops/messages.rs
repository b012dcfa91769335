//! File operation wire messages.
//!
//! Every file operation datagram is one discriminant byte from the 100+
//! range followed by the message body. Dispatch is a plain tagged union on
//! that byte; membership traffic owns the 0..=5 range, so the two protocols
//! share one socket without ambiguity.

use crate::store::{FileBlock, FileMetadata};
use crate::utils::{ShoalError, WireReader, WireWriter};

use bytes::Bytes;

/// Lowest discriminant byte belonging to the file operation range.
pub(crate) const FILE_KIND_BASE: u8 = 100;

mod kind {
    pub const CREATE_REQUEST: u8 = 100;
    pub const CREATE_RESPONSE: u8 = 101;
    pub const GET_REQUEST: u8 = 102;
    pub const GET_RESPONSE: u8 = 103;
    pub const APPEND_REQUEST: u8 = 104;
    pub const APPEND_RESPONSE: u8 = 105;
    pub const MERGE_REQUEST: u8 = 106;
    pub const MERGE_RESPONSE: u8 = 107;
    pub const REPLICATE_BLOCK: u8 = 108;
    pub const REPLICATE_ACK: u8 = 109;
    pub const LS_REQUEST: u8 = 110;
    pub const LS_RESPONSE: u8 = 111;
    pub const LISTSTORE_REQUEST: u8 = 112;
    pub const LISTSTORE_RESPONSE: u8 = 113;
    pub const FILE_EXISTS_REQUEST: u8 = 114;
    pub const FILE_EXISTS_RESPONSE: u8 = 115;
    pub const COLLECT_BLOCKS_REQUEST: u8 = 116;
    pub const COLLECT_BLOCKS_RESPONSE: u8 = 117;
    pub const MERGE_UPDATE: u8 = 118;
    pub const MERGE_UPDATE_ACK: u8 = 119;
    pub const TRANSFER_FILES: u8 = 120;
    pub const DELETE_FILE: u8 = 121;
    pub const ERROR_FILE_EXISTS: u8 = 122;
    pub const ERROR_FILE_NOT_FOUND: u8 = 123;
    pub const ERROR_REPLICA_UNAVAILABLE: u8 = 124;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub filename: String,
    pub client_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub filename: String,
    pub success: bool,
    pub file_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub filename: String,
    pub client_id: String,
}

/// Success carries metadata plus the blocks in metadata order; failure
/// carries a diagnostic instead (e.g. the file outgrew the datagram limit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub filename: String,
    pub success: bool,
    pub error: String,
    pub metadata: Option<FileMetadata>,
    pub blocks: Vec<FileBlock>,
}

impl GetResponse {
    pub fn ok(metadata: FileMetadata, blocks: Vec<FileBlock>) -> Self {
        GetResponse {
            filename: metadata.filename.clone(),
            success: true,
            error: String::new(),
            metadata: Some(metadata),
            blocks,
        }
    }

    pub fn failed(filename: &str, error: impl Into<String>) -> Self {
        GetResponse {
            filename: filename.to_string(),
            success: false,
            error: error.into(),
            metadata: None,
            blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub filename: String,
    pub client_id: String,
    pub sequence_num: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResponse {
    pub filename: String,
    pub success: bool,
    pub error: String,
    pub block_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResponse {
    pub filename: String,
    pub success: bool,
    pub error: String,
    pub new_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateBlock {
    pub filename: String,
    pub block: FileBlock,
}

/// Acks both block replication (`ref_id` = block id) and whole-file
/// transfers (`ref_id` = file id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateAck {
    pub filename: String,
    pub ref_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsResponse {
    pub filename: String,
    pub file_id: u64,
    pub endpoints: Vec<String>,
    pub ring_ids: Vec<u64>,
}

/// One file in a liststore report. `merging` surfaces the replica's
/// in-flight merge state (a round whose update never landed shows up here
/// until the next round clears it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub filename: String,
    pub file_id: u64,
    pub total_size: u64,
    pub merging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStoreResponse {
    pub entries: Vec<StoreEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExistsRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExistsResponse {
    pub filename: String,
    pub exists: bool,
    pub file_id: u64,
    pub total_size: u64,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectBlocksRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectBlocksResponse {
    pub filename: String,
    pub version: u32,
    pub blocks: Vec<FileBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeUpdate {
    pub filename: String,
    pub new_version: u32,
    pub block_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeUpdateAck {
    pub filename: String,
    pub new_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFiles {
    pub metadata: FileMetadata,
    pub blocks: Vec<FileBlock>,
}

/// Body shared by the three error sentinel messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub filename: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMessage {
    CreateRequest(CreateRequest),
    CreateResponse(CreateResponse),
    GetRequest(GetRequest),
    GetResponse(GetResponse),
    AppendRequest(AppendRequest),
    AppendResponse(AppendResponse),
    MergeRequest(MergeRequest),
    MergeResponse(MergeResponse),
    ReplicateBlock(ReplicateBlock),
    ReplicateAck(ReplicateAck),
    LsRequest(LsRequest),
    LsResponse(LsResponse),
    ListStoreRequest,
    ListStoreResponse(ListStoreResponse),
    FileExistsRequest(FileExistsRequest),
    FileExistsResponse(FileExistsResponse),
    CollectBlocksRequest(CollectBlocksRequest),
    CollectBlocksResponse(CollectBlocksResponse),
    MergeUpdate(MergeUpdate),
    MergeUpdateAck(MergeUpdateAck),
    TransferFiles(TransferFiles),
    DeleteFile(String),
    ErrorFileExists(ErrorNotice),
    ErrorFileNotFound(ErrorNotice),
    ErrorReplicaUnavailable(ErrorNotice),
}

fn encode_blocks(w: &mut WireWriter, blocks: &[FileBlock]) {
    w.put_u32(blocks.len() as u32);
    for block in blocks {
        block.encode(w);
    }
}

fn decode_blocks(r: &mut WireReader) -> Result<Vec<FileBlock>, ShoalError> {
    let count = r.get_u32()? as usize;
    let mut blocks = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        blocks.push(FileBlock::decode(r)?);
    }
    Ok(blocks)
}

fn encode_ids(w: &mut WireWriter, ids: &[u64]) {
    w.put_u32(ids.len() as u32);
    for id in ids {
        w.put_u64(*id);
    }
}

fn decode_ids(r: &mut WireReader) -> Result<Vec<u64>, ShoalError> {
    let count = r.get_u32()? as usize;
    let mut ids = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        ids.push(r.get_u64()?);
    }
    Ok(ids)
}

fn encode_notice(w: &mut WireWriter, notice: &ErrorNotice) {
    w.put_str(&notice.filename);
    w.put_str(&notice.detail);
}

fn decode_notice(r: &mut WireReader) -> Result<ErrorNotice, ShoalError> {
    Ok(ErrorNotice {
        filename: r.get_str()?,
        detail: r.get_str()?,
    })
}

impl FileMessage {
    /// The discriminant byte this message travels under.
    pub fn kind_byte(&self) -> u8 {
        match self {
            FileMessage::CreateRequest(_) => kind::CREATE_REQUEST,
            FileMessage::CreateResponse(_) => kind::CREATE_RESPONSE,
            FileMessage::GetRequest(_) => kind::GET_REQUEST,
            FileMessage::GetResponse(_) => kind::GET_RESPONSE,
            FileMessage::AppendRequest(_) => kind::APPEND_REQUEST,
            FileMessage::AppendResponse(_) => kind::APPEND_RESPONSE,
            FileMessage::MergeRequest(_) => kind::MERGE_REQUEST,
            FileMessage::MergeResponse(_) => kind::MERGE_RESPONSE,
            FileMessage::ReplicateBlock(_) => kind::REPLICATE_BLOCK,
            FileMessage::ReplicateAck(_) => kind::REPLICATE_ACK,
            FileMessage::LsRequest(_) => kind::LS_REQUEST,
            FileMessage::LsResponse(_) => kind::LS_RESPONSE,
            FileMessage::ListStoreRequest => kind::LISTSTORE_REQUEST,
            FileMessage::ListStoreResponse(_) => kind::LISTSTORE_RESPONSE,
            FileMessage::FileExistsRequest(_) => kind::FILE_EXISTS_REQUEST,
            FileMessage::FileExistsResponse(_) => kind::FILE_EXISTS_RESPONSE,
            FileMessage::CollectBlocksRequest(_) => kind::COLLECT_BLOCKS_REQUEST,
            FileMessage::CollectBlocksResponse(_) => kind::COLLECT_BLOCKS_RESPONSE,
            FileMessage::MergeUpdate(_) => kind::MERGE_UPDATE,
            FileMessage::MergeUpdateAck(_) => kind::MERGE_UPDATE_ACK,
            FileMessage::TransferFiles(_) => kind::TRANSFER_FILES,
            FileMessage::DeleteFile(_) => kind::DELETE_FILE,
            FileMessage::ErrorFileExists(_) => kind::ERROR_FILE_EXISTS,
            FileMessage::ErrorFileNotFound(_) => kind::ERROR_FILE_NOT_FOUND,
            FileMessage::ErrorReplicaUnavailable(_) => kind::ERROR_REPLICA_UNAVAILABLE,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ShoalError> {
        let mut w = WireWriter::new();
        w.put_u8(self.kind_byte());
        match self {
            FileMessage::CreateRequest(m) => {
                w.put_str(&m.filename);
                w.put_str(&m.client_id);
                w.put_blob(&m.data);
            }
            FileMessage::CreateResponse(m) => {
                w.put_str(&m.filename);
                w.put_u8(m.success as u8);
                w.put_u64(m.file_id);
            }
            FileMessage::GetRequest(m) => {
                w.put_str(&m.filename);
                w.put_str(&m.client_id);
            }
            FileMessage::GetResponse(m) => {
                w.put_str(&m.filename);
                w.put_u8(m.success as u8);
                if m.success {
                    match &m.metadata {
                        Some(meta) => meta.encode(&mut w),
                        None => {
                            return Err(ShoalError(
                                "get response marked success without metadata".into(),
                            ))
                        }
                    }
                    encode_blocks(&mut w, &m.blocks);
                } else {
                    w.put_str(&m.error);
                }
            }
            FileMessage::AppendRequest(m) => {
                w.put_str(&m.filename);
                w.put_str(&m.client_id);
                w.put_u32(m.sequence_num);
                w.put_blob(&m.data);
            }
            FileMessage::AppendResponse(m) => {
                w.put_str(&m.filename);
                w.put_u8(m.success as u8);
                w.put_str(&m.error);
                w.put_u64(m.block_id);
            }
            FileMessage::MergeRequest(m) => {
                w.put_str(&m.filename);
            }
            FileMessage::MergeResponse(m) => {
                w.put_str(&m.filename);
                w.put_u8(m.success as u8);
                w.put_str(&m.error);
                w.put_u32(m.new_version);
            }
            FileMessage::ReplicateBlock(m) => {
                w.put_str(&m.filename);
                m.block.encode(&mut w);
            }
            FileMessage::ReplicateAck(m) => {
                w.put_str(&m.filename);
                w.put_u64(m.ref_id);
            }
            FileMessage::LsRequest(m) => {
                w.put_str(&m.filename);
            }
            FileMessage::LsResponse(m) => {
                w.put_str(&m.filename);
                w.put_u64(m.file_id);
                w.put_u32(m.endpoints.len() as u32);
                for endpoint in &m.endpoints {
                    w.put_str(endpoint);
                }
                encode_ids(&mut w, &m.ring_ids);
            }
            FileMessage::ListStoreRequest => {}
            FileMessage::ListStoreResponse(m) => {
                w.put_u32(m.entries.len() as u32);
                for entry in &m.entries {
                    w.put_str(&entry.filename);
                    w.put_u64(entry.file_id);
                    w.put_u64(entry.total_size);
                    w.put_u8(entry.merging as u8);
                }
            }
            FileMessage::FileExistsRequest(m) => {
                w.put_str(&m.filename);
            }
            FileMessage::FileExistsResponse(m) => {
                w.put_str(&m.filename);
                w.put_u8(m.exists as u8);
                w.put_u64(m.file_id);
                w.put_u64(m.total_size);
                w.put_u32(m.version);
            }
            FileMessage::CollectBlocksRequest(m) => {
                w.put_str(&m.filename);
            }
            FileMessage::CollectBlocksResponse(m) => {
                w.put_str(&m.filename);
                w.put_u32(m.version);
                encode_blocks(&mut w, &m.blocks);
            }
            FileMessage::MergeUpdate(m) => {
                w.put_str(&m.filename);
                w.put_u32(m.new_version);
                encode_ids(&mut w, &m.block_ids);
            }
            FileMessage::MergeUpdateAck(m) => {
                w.put_str(&m.filename);
                w.put_u32(m.new_version);
            }
            FileMessage::TransferFiles(m) => {
                m.metadata.encode(&mut w);
                encode_blocks(&mut w, &m.blocks);
            }
            FileMessage::DeleteFile(filename) => {
                w.put_str(filename);
            }
            FileMessage::ErrorFileExists(n)
            | FileMessage::ErrorFileNotFound(n)
            | FileMessage::ErrorReplicaUnavailable(n) => encode_notice(&mut w, n),
        }
        w.finish_datagram()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ShoalError> {
        let mut r = WireReader::new(buf);
        let kind_byte = r.get_u8()?;
        let msg = match kind_byte {
            kind::CREATE_REQUEST => FileMessage::CreateRequest(CreateRequest {
                filename: r.get_str()?,
                client_id: r.get_str()?,
                data: r.get_blob()?,
            }),
            kind::CREATE_RESPONSE => FileMessage::CreateResponse(CreateResponse {
                filename: r.get_str()?,
                success: r.get_u8()? != 0,
                file_id: r.get_u64()?,
            }),
            kind::GET_REQUEST => FileMessage::GetRequest(GetRequest {
                filename: r.get_str()?,
                client_id: r.get_str()?,
            }),
            kind::GET_RESPONSE => {
                let filename = r.get_str()?;
                let success = r.get_u8()? != 0;
                if success {
                    let metadata = FileMetadata::decode(&mut r)?;
                    let blocks = decode_blocks(&mut r)?;
                    FileMessage::GetResponse(GetResponse {
                        filename,
                        success,
                        error: String::new(),
                        metadata: Some(metadata),
                        blocks,
                    })
                } else {
                    FileMessage::GetResponse(GetResponse {
                        filename,
                        success,
                        error: r.get_str()?,
                        metadata: None,
                        blocks: Vec::new(),
                    })
                }
            }
            kind::APPEND_REQUEST => FileMessage::AppendRequest(AppendRequest {
                filename: r.get_str()?,
                client_id: r.get_str()?,
                sequence_num: r.get_u32()?,
                data: r.get_blob()?,
            }),
            kind::APPEND_RESPONSE => FileMessage::AppendResponse(AppendResponse {
                filename: r.get_str()?,
                success: r.get_u8()? != 0,
                error: r.get_str()?,
                block_id: r.get_u64()?,
            }),
            kind::MERGE_REQUEST => FileMessage::MergeRequest(MergeRequest {
                filename: r.get_str()?,
            }),
            kind::MERGE_RESPONSE => FileMessage::MergeResponse(MergeResponse {
                filename: r.get_str()?,
                success: r.get_u8()? != 0,
                error: r.get_str()?,
                new_version: r.get_u32()?,
            }),
            kind::REPLICATE_BLOCK => FileMessage::ReplicateBlock(ReplicateBlock {
                filename: r.get_str()?,
                block: FileBlock::decode(&mut r)?,
            }),
            kind::REPLICATE_ACK => FileMessage::ReplicateAck(ReplicateAck {
                filename: r.get_str()?,
                ref_id: r.get_u64()?,
            }),
            kind::LS_REQUEST => FileMessage::LsRequest(LsRequest {
                filename: r.get_str()?,
            }),
            kind::LS_RESPONSE => {
                let filename = r.get_str()?;
                let file_id = r.get_u64()?;
                let count = r.get_u32()? as usize;
                let mut endpoints = Vec::with_capacity(count.min(128));
                for _ in 0..count {
                    endpoints.push(r.get_str()?);
                }
                let ring_ids = decode_ids(&mut r)?;
                FileMessage::LsResponse(LsResponse {
                    filename,
                    file_id,
                    endpoints,
                    ring_ids,
                })
            }
            kind::LISTSTORE_REQUEST => FileMessage::ListStoreRequest,
            kind::LISTSTORE_RESPONSE => {
                let count = r.get_u32()? as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    entries.push(StoreEntry {
                        filename: r.get_str()?,
                        file_id: r.get_u64()?,
                        total_size: r.get_u64()?,
                        merging: r.get_u8()? != 0,
                    });
                }
                FileMessage::ListStoreResponse(ListStoreResponse { entries })
            }
            kind::FILE_EXISTS_REQUEST => FileMessage::FileExistsRequest(FileExistsRequest {
                filename: r.get_str()?,
            }),
            kind::FILE_EXISTS_RESPONSE => FileMessage::FileExistsResponse(FileExistsResponse {
                filename: r.get_str()?,
                exists: r.get_u8()? != 0,
                file_id: r.get_u64()?,
                total_size: r.get_u64()?,
                version: r.get_u32()?,
            }),
            kind::COLLECT_BLOCKS_REQUEST => {
                FileMessage::CollectBlocksRequest(CollectBlocksRequest {
                    filename: r.get_str()?,
                })
            }
            kind::COLLECT_BLOCKS_RESPONSE => {
                FileMessage::CollectBlocksResponse(CollectBlocksResponse {
                    filename: r.get_str()?,
                    version: r.get_u32()?,
                    blocks: decode_blocks(&mut r)?,
                })
            }
            kind::MERGE_UPDATE => FileMessage::MergeUpdate(MergeUpdate {
                filename: r.get_str()?,
                new_version: r.get_u32()?,
                block_ids: decode_ids(&mut r)?,
            }),
            kind::MERGE_UPDATE_ACK => FileMessage::MergeUpdateAck(MergeUpdateAck {
                filename: r.get_str()?,
                new_version: r.get_u32()?,
            }),
            kind::TRANSFER_FILES => FileMessage::TransferFiles(TransferFiles {
                metadata: FileMetadata::decode(&mut r)?,
                blocks: decode_blocks(&mut r)?,
            }),
            kind::DELETE_FILE => FileMessage::DeleteFile(r.get_str()?),
            kind::ERROR_FILE_EXISTS => FileMessage::ErrorFileExists(decode_notice(&mut r)?),
            kind::ERROR_FILE_NOT_FOUND => FileMessage::ErrorFileNotFound(decode_notice(&mut r)?),
            kind::ERROR_REPLICA_UNAVAILABLE => {
                FileMessage::ErrorReplicaUnavailable(decode_notice(&mut r)?)
            }
            other => {
                return Err(ShoalError(format!(
                    "invalid file message kind {}",
                    other
                )))
            }
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod messages_tests {
    use super::*;
    use crate::utils::MAX_DATAGRAM;

    fn block(seq: u32) -> FileBlock {
        FileBlock::build("localhost:9000:1", seq, 1000 + seq as u64, vec![seq as u8; 4])
    }

    fn meta() -> FileMetadata {
        let mut m = FileMetadata::fresh("doc.txt", 500);
        m.block_ids = vec![block(0).block_id, block(1).block_id];
        m.total_size = 8;
        m.version = 3;
        m
    }

    fn round_trip(msg: FileMessage) {
        let bytes = msg.encode().unwrap();
        assert!(bytes[0] >= FILE_KIND_BASE);
        assert_eq!(bytes[0], msg.kind_byte());
        let decoded = FileMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_every_variant() {
        round_trip(FileMessage::CreateRequest(CreateRequest {
            filename: "doc.txt".into(),
            client_id: "localhost:9000:1".into(),
            data: b"contents".to_vec(),
        }));
        round_trip(FileMessage::CreateResponse(CreateResponse {
            filename: "doc.txt".into(),
            success: true,
            file_id: 99,
        }));
        round_trip(FileMessage::GetRequest(GetRequest {
            filename: "doc.txt".into(),
            client_id: "localhost:9000:1".into(),
        }));
        round_trip(FileMessage::GetResponse(GetResponse::ok(
            meta(),
            vec![block(0), block(1)],
        )));
        round_trip(FileMessage::GetResponse(GetResponse::failed(
            "doc.txt",
            "not stored here",
        )));
        round_trip(FileMessage::AppendRequest(AppendRequest {
            filename: "doc.txt".into(),
            client_id: "localhost:9000:1".into(),
            sequence_num: 7,
            data: b"tail".to_vec(),
        }));
        round_trip(FileMessage::AppendResponse(AppendResponse {
            filename: "doc.txt".into(),
            success: false,
            error: "file not found".into(),
            block_id: 0,
        }));
        round_trip(FileMessage::MergeRequest(MergeRequest {
            filename: "doc.txt".into(),
        }));
        round_trip(FileMessage::MergeResponse(MergeResponse {
            filename: "doc.txt".into(),
            success: true,
            error: String::new(),
            new_version: 4,
        }));
        round_trip(FileMessage::ReplicateBlock(ReplicateBlock {
            filename: "doc.txt".into(),
            block: block(2),
        }));
        round_trip(FileMessage::ReplicateAck(ReplicateAck {
            filename: "doc.txt".into(),
            ref_id: block(2).block_id,
        }));
        round_trip(FileMessage::LsRequest(LsRequest {
            filename: "doc.txt".into(),
        }));
        round_trip(FileMessage::LsResponse(LsResponse {
            filename: "doc.txt".into(),
            file_id: 99,
            endpoints: vec!["localhost:9000".into(), "localhost:9001".into()],
            ring_ids: vec![1, 2],
        }));
        round_trip(FileMessage::ListStoreRequest);
        round_trip(FileMessage::ListStoreResponse(ListStoreResponse {
            entries: vec![StoreEntry {
                filename: "doc.txt".into(),
                file_id: 99,
                total_size: 8,
                merging: true,
            }],
        }));
        round_trip(FileMessage::FileExistsRequest(FileExistsRequest {
            filename: "doc.txt".into(),
        }));
        round_trip(FileMessage::FileExistsResponse(FileExistsResponse {
            filename: "doc.txt".into(),
            exists: true,
            file_id: 99,
            total_size: 8,
            version: 3,
        }));
        round_trip(FileMessage::CollectBlocksRequest(CollectBlocksRequest {
            filename: "doc.txt".into(),
        }));
        round_trip(FileMessage::CollectBlocksResponse(CollectBlocksResponse {
            filename: "doc.txt".into(),
            version: 3,
            blocks: vec![block(0)],
        }));
        round_trip(FileMessage::MergeUpdate(MergeUpdate {
            filename: "doc.txt".into(),
            new_version: 4,
            block_ids: vec![5, 6, 7],
        }));
        round_trip(FileMessage::MergeUpdateAck(MergeUpdateAck {
            filename: "doc.txt".into(),
            new_version: 4,
        }));
        round_trip(FileMessage::TransferFiles(TransferFiles {
            metadata: meta(),
            blocks: vec![block(0), block(1)],
        }));
        round_trip(FileMessage::DeleteFile("doc.txt".into()));
        round_trip(FileMessage::ErrorFileExists(ErrorNotice {
            filename: "doc.txt".into(),
            detail: "file already exists".into(),
        }));
        round_trip(FileMessage::ErrorFileNotFound(ErrorNotice {
            filename: "doc.txt".into(),
            detail: "no such file".into(),
        }));
        round_trip(FileMessage::ErrorReplicaUnavailable(ErrorNotice {
            filename: "doc.txt".into(),
            detail: "no replica reachable".into(),
        }));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(FileMessage::decode(&[250]).is_err());
        assert!(FileMessage::decode(&[]).is_err());
        // membership-range byte is not a file message
        assert!(FileMessage::decode(&[2, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn oversized_payload_fails_encode() {
        let msg = FileMessage::CreateRequest(CreateRequest {
            filename: "big.bin".into(),
            client_id: "c".into(),
            data: vec![0u8; MAX_DATAGRAM],
        });
        let err = msg.encode().unwrap_err();
        assert!(err.0.contains("buffer oversize"));
    }
}
