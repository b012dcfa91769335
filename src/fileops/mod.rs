//! File operation coordination: the request/response protocol over the
//! shared datagram hub, replica fan-out, read-my-writes enforcement, merge
//! coordination, and ring-change rebalancing.

mod client;
mod messages;
mod pending;
mod server;

pub use client::{LsReplicaStatus, LsReport};
pub use messages::{
    AppendRequest, AppendResponse, CollectBlocksRequest, CollectBlocksResponse, CreateRequest,
    CreateResponse, ErrorNotice, FileExistsRequest, FileExistsResponse, FileMessage, GetRequest,
    GetResponse, ListStoreResponse, LsRequest, LsResponse, MergeRequest, MergeResponse,
    MergeUpdate, MergeUpdateAck, ReplicateAck, ReplicateBlock, StoreEntry, TransferFiles,
};

pub(crate) use messages::FILE_KIND_BASE;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::membership::NodeId;
use crate::ring::HashRing;
use crate::store::{BlockStore, ClientTracker};
use crate::transport::DatagramHub;

use pending::{PendingTable, ResponseGather};

/// Tunables the coordinator needs from the node configuration.
#[derive(Debug, Clone)]
pub struct FileOpsConfig {
    /// Replication degree (successor count per file).
    pub replication: usize,

    /// How long a get waits for its response.
    pub get_timeout: Duration,

    /// How long an ls waits for per-replica existence responses.
    pub ls_timeout: Duration,

    /// How long a merge coordinator waits for collected blocks.
    pub collect_timeout: Duration,
}

/// The file operation coordinator. Holds non-owning handles to the ring and
/// store (the node owns them); shared between the node's receive loop and
/// whatever thread drives client commands.
pub struct FileOps {
    /// My log line prefix.
    me: String,

    self_id: NodeId,

    /// Canonical client identity used in block records and the tracker.
    client_id: String,

    config: FileOpsConfig,

    hub: Arc<DatagramHub>,
    ring: Arc<HashRing>,
    store: Arc<BlockStore>,
    tracker: ClientTracker,

    /// Per-file monotone append sequence numbers issued by this node.
    seq_nums: Mutex<HashMap<String, u32>>,

    /// Gets awaiting a GET_RESPONSE (result: assembled file bytes).
    pending_gets: PendingTable<Vec<u8>>,

    /// Ls fan-outs awaiting FILE_EXISTS_RESPONSEs.
    exists_gather: ResponseGather<FileExistsResponse>,

    /// Merge coordinators awaiting COLLECT_BLOCKS_RESPONSEs.
    collect_gather: ResponseGather<CollectBlocksResponse>,

    /// Files shipped away by rebalancing, deleted once acked.
    pending_transfers: Mutex<HashSet<String>>,

    /// Collapses bursts of ring changes into one rebalance pass.
    rebalancing: AtomicBool,
}

impl FileOps {
    pub fn new(
        me: String,
        self_id: NodeId,
        config: FileOpsConfig,
        hub: Arc<DatagramHub>,
        ring: Arc<HashRing>,
        store: Arc<BlockStore>,
    ) -> Arc<Self> {
        let client_id = self_id.canonical();
        Arc::new(FileOps {
            me,
            self_id,
            client_id,
            config,
            hub,
            ring,
            store,
            tracker: ClientTracker::new(),
            seq_nums: Mutex::new(HashMap::new()),
            pending_gets: PendingTable::new(),
            exists_gather: ResponseGather::new(),
            collect_gather: ResponseGather::new(),
            pending_transfers: Mutex::new(HashSet::new()),
            rebalancing: AtomicBool::new(false),
        })
    }

    /// This node's client identity string.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn tracker(&self) -> &ClientTracker {
        &self.tracker
    }

    pub(crate) fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// Is this node the coordinator (first successor) for the file?
    pub fn is_coordinator(&self, filename: &str) -> bool {
        self.ring
            .file_replicas(filename, self.config.replication)
            .first()
            .is_some_and(|first| *first == self.self_id)
    }
}
