//! Handler-side file operations: dispatch of incoming file messages, merge
//! coordination, and ring-change rebalancing.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::fileops::messages::{
    AppendRequest, AppendResponse, CollectBlocksRequest, CollectBlocksResponse, CreateRequest,
    CreateResponse, ErrorNotice, FileExistsRequest, FileExistsResponse, FileMessage, GetRequest,
    GetResponse, ListStoreResponse, LsRequest, LsResponse, MergeRequest, MergeResponse,
    MergeUpdate, MergeUpdateAck, ReplicateAck, ReplicateBlock, TransferFiles,
};
use crate::fileops::FileOps;
use crate::membership::NodeId;
use crate::ring::node_position;
use crate::store::{order_blocks, FileBlock, FileMetadata};
use crate::transport::DatagramHub;
use crate::utils::unix_millis;

impl FileOps {
    /// Routes one incoming file message. Called from the node's receive
    /// loop; anything that must wait (merge coordination) is spawned off so
    /// the loop never stalls.
    pub(crate) async fn handle_message(self: &Arc<Self>, sender: SocketAddr, msg: FileMessage) {
        match msg {
            FileMessage::CreateRequest(req) => self.handle_create_request(sender, req).await,
            FileMessage::CreateResponse(resp) => {
                pf_debug!(self.me; "create response for '{}': success={} file_id={}",
                          resp.filename, resp.success, resp.file_id);
            }
            FileMessage::GetRequest(req) => self.handle_get_request(sender, req).await,
            FileMessage::GetResponse(resp) => self.handle_get_response(resp).await,
            FileMessage::AppendRequest(req) => self.handle_append_request(sender, req).await,
            FileMessage::AppendResponse(resp) => self.handle_append_response(resp),
            FileMessage::MergeRequest(req) => self.handle_merge_request(sender, req).await,
            FileMessage::MergeResponse(resp) => {
                if resp.success {
                    pf_info!(self.me; "merge of '{}' completed at version {}",
                             resp.filename, resp.new_version);
                } else {
                    pf_warn!(self.me; "merge of '{}' failed: {}", resp.filename, resp.error);
                }
            }
            FileMessage::ReplicateBlock(msg) => self.handle_replicate_block(sender, msg).await,
            FileMessage::ReplicateAck(ack) => self.handle_replicate_ack(ack).await,
            FileMessage::LsRequest(req) => self.handle_ls_request(sender, req).await,
            FileMessage::LsResponse(resp) => {
                pf_info!(self.me; "file '{}' is replicated at {:?}", resp.filename, resp.endpoints);
            }
            FileMessage::ListStoreRequest => self.handle_liststore_request(sender).await,
            FileMessage::ListStoreResponse(resp) => self.log_remote_store(resp),
            FileMessage::FileExistsRequest(req) => self.handle_exists_request(sender, req).await,
            FileMessage::FileExistsResponse(resp) => {
                if !self.exists_gather.add(&resp.filename, sender, resp.clone()) {
                    pf_debug!(self.me; "unsolicited exists response for '{}'", resp.filename);
                }
            }
            FileMessage::CollectBlocksRequest(req) => self.handle_collect_request(sender, req).await,
            FileMessage::CollectBlocksResponse(resp) => {
                if !self.collect_gather.add(&resp.filename, sender, resp.clone()) {
                    pf_debug!(self.me; "unsolicited collect response for '{}'", resp.filename);
                }
            }
            FileMessage::MergeUpdate(update) => self.handle_merge_update(sender, update).await,
            FileMessage::MergeUpdateAck(ack) => {
                pf_debug!(self.me; "replica applied merge of '{}' at version {}",
                          ack.filename, ack.new_version);
            }
            FileMessage::TransferFiles(transfer) => self.handle_transfer(sender, transfer).await,
            FileMessage::DeleteFile(filename) => {
                if self.store().delete(&filename).await {
                    self.tracker().clear_file(&filename);
                    pf_info!(self.me; "deleted '{}' on request", filename);
                }
            }
            FileMessage::ErrorFileExists(notice) => {
                // informational: the create's goal (file present) is met
                pf_info!(self.me; "create of '{}' answered: {}", notice.filename, notice.detail);
            }
            FileMessage::ErrorFileNotFound(notice) => {
                if !self
                    .pending_gets
                    .complete(&notice.filename, Err(notice.detail.clone()))
                {
                    pf_warn!(self.me; "peer reports '{}' missing: {}", notice.filename, notice.detail);
                }
            }
            FileMessage::ErrorReplicaUnavailable(notice) => {
                self.pending_gets
                    .complete(&notice.filename, Err(notice.detail.clone()));
                pf_warn!(self.me; "replica unavailable for '{}': {}", notice.filename, notice.detail);
            }
        }
    }

    /// Encodes and sends a response datagram, logging failures instead of
    /// propagating them -- response loss is a condition the initiators'
    /// timeouts already cover.
    async fn respond(&self, msg: FileMessage, dest: SocketAddr) {
        let bytes = match msg.encode() {
            Ok(b) => b,
            Err(e) => {
                pf_error!(self.me; "cannot encode response kind {}: {}", msg.kind_byte(), e);
                return;
            }
        };
        if let Err(e) = self.hub.send_bytes(&bytes, dest).await {
            pf_warn!(self.me; "response to {} failed: {}", dest, e);
        }
    }

    async fn handle_create_request(&self, sender: SocketAddr, req: CreateRequest) {
        if self
            .store()
            .create(&req.filename, &req.data, &req.client_id)
            .await
        {
            pf_info!(self.me; "created '{}' from remote request ({} bytes)",
                     req.filename, req.data.len());
            self.respond(
                FileMessage::CreateResponse(CreateResponse {
                    filename: req.filename.clone(),
                    success: true,
                    file_id: FileMetadata::file_id_for(&req.filename),
                }),
                sender,
            )
            .await;
        } else {
            self.respond(
                FileMessage::ErrorFileExists(ErrorNotice {
                    filename: req.filename,
                    detail: "file already exists".into(),
                }),
                sender,
            )
            .await;
        }
    }

    async fn handle_get_request(&self, sender: SocketAddr, req: GetRequest) {
        let Some(meta) = self.store().metadata(&req.filename).await else {
            self.respond(
                FileMessage::ErrorFileNotFound(ErrorNotice {
                    filename: req.filename,
                    detail: "file not stored at this replica".into(),
                }),
                sender,
            )
            .await;
            return;
        };

        let blocks = self.store().get_blocks(&req.filename).await;
        for block in &blocks {
            pf_trace!(self.me; "serving block {} (client {}, seq {}, {} bytes)",
                      block.block_id, block.client_id, block.sequence_num, block.len());
        }

        let resp = FileMessage::GetResponse(GetResponse::ok(meta, blocks));
        match resp.encode() {
            Ok(bytes) => {
                if let Err(e) = self.hub.send_bytes(&bytes, sender).await {
                    pf_warn!(self.me; "get response to {} failed: {}", sender, e);
                }
            }
            Err(e) => {
                // file outgrew one datagram; report instead of fragmenting
                self.respond(
                    FileMessage::GetResponse(GetResponse::failed(
                        &req.filename,
                        format!("file too large for a single datagram: {}", e),
                    )),
                    sender,
                )
                .await;
            }
        }
    }

    async fn handle_get_response(&self, resp: GetResponse) {
        if !self.pending_gets.is_pending(&resp.filename) {
            pf_debug!(self.me; "get response for non-pending '{}'", resp.filename);
            return;
        }
        if !resp.success {
            self.pending_gets.complete(&resp.filename, Err(resp.error));
            return;
        }
        let Some(meta) = resp.metadata else {
            self.pending_gets
                .complete(&resp.filename, Err("malformed get response".into()));
            return;
        };

        // the replica's view must contain every block this client appended
        if !self
            .tracker()
            .satisfies_read_my_writes(&self.client_id, &resp.filename, &meta.block_ids)
        {
            pf_warn!(self.me; "replica copy of '{}' misses this client's writes", resp.filename);
            self.pending_gets.complete(
                &resp.filename,
                Err("replica does not satisfy read-my-writes".into()),
            );
            return;
        }

        let mut data = Vec::with_capacity(meta.total_size as usize);
        for block in &resp.blocks {
            pf_trace!(self.me; "assembling block {} (seq {}, {} bytes)",
                      block.block_id, block.sequence_num, block.len());
            data.extend_from_slice(&block.data);
        }
        pf_info!(self.me; "fetched '{}' ({} bytes in {} blocks)",
                 resp.filename, data.len(), resp.blocks.len());
        self.pending_gets.complete(&resp.filename, Ok(data));
    }

    async fn handle_append_request(&self, sender: SocketAddr, req: AppendRequest) {
        let block = FileBlock::build(&req.client_id, req.sequence_num, unix_millis(), req.data);
        let block_id = block.block_id;
        let success = self.store().append_block(&req.filename, block.clone()).await;

        self.respond(
            FileMessage::AppendResponse(AppendResponse {
                filename: req.filename.clone(),
                success,
                error: if success {
                    String::new()
                } else {
                    "file not found".into()
                },
                block_id,
            }),
            sender,
        )
        .await;

        if !success {
            pf_warn!(self.me; "append to unknown file '{}' rejected", req.filename);
            return;
        }

        pf_info!(self.me; "appended block {} to '{}' (client {}, seq {})",
                 block_id, req.filename, req.client_id, req.sequence_num);
        self.tracker().record(&req.client_id, &req.filename, block_id);

        // fan the committed block out to the other replicas
        let msg = FileMessage::ReplicateBlock(ReplicateBlock {
            filename: req.filename.clone(),
            block,
        });
        let bytes = match msg.encode() {
            Ok(b) => b,
            Err(e) => {
                pf_error!(self.me; "cannot encode replicate block: {}", e);
                return;
            }
        };
        for replica in self.replicas_of(&req.filename) {
            if replica == self.self_id {
                continue;
            }
            if let Err(e) = self.hub.send_to_node(&bytes, &replica).await {
                pf_warn!(self.me; "replicate block to {} failed: {}", replica.endpoint(), e);
            }
        }
    }

    fn handle_append_response(&self, resp: AppendResponse) {
        if resp.success {
            pf_info!(self.me; "coordinator accepted append to '{}' as block {}",
                     resp.filename, resp.block_id);
        } else {
            pf_warn!(self.me; "coordinator rejected append to '{}': {}", resp.filename, resp.error);
        }
    }

    async fn handle_replicate_block(&self, sender: SocketAddr, msg: ReplicateBlock) {
        let block_id = msg.block.block_id;
        let applied = self.store().append_block(&msg.filename, msg.block.clone()).await;
        let ok = if applied {
            true
        } else {
            // implicit create keeps the original block id so every replica
            // agrees on the file's history
            self.store()
                .create_with_block(&msg.filename, msg.block)
                .await
        };
        if ok {
            pf_debug!(self.me; "replicated block {} of '{}'", block_id, msg.filename);
        } else {
            pf_warn!(self.me; "failed to replicate block {} of '{}'", block_id, msg.filename);
        }

        self.respond(
            FileMessage::ReplicateAck(ReplicateAck {
                filename: msg.filename,
                ref_id: block_id,
            }),
            sender,
        )
        .await;
    }

    async fn handle_replicate_ack(&self, ack: ReplicateAck) {
        let transferred = self
            .pending_transfers
            .lock()
            .unwrap()
            .contains(&ack.filename);
        if !transferred {
            pf_trace!(self.me; "replication of {} in '{}' acked", ack.ref_id, ack.filename);
            return;
        }

        // a file this node shipped away has landed; drop the local copy
        // once the ring confirms we are no longer a replica for it
        if !self.replicas_of(&ack.filename).contains(&self.self_id) {
            self.pending_transfers.lock().unwrap().remove(&ack.filename);
            if self.store().delete(&ack.filename).await {
                self.tracker().clear_file(&ack.filename);
                pf_info!(self.me; "transfer of '{}' acked, local copy deleted", ack.filename);
            }
        } else {
            self.pending_transfers.lock().unwrap().remove(&ack.filename);
        }
    }

    async fn handle_ls_request(&self, sender: SocketAddr, req: LsRequest) {
        let replicas = self.replicas_of(&req.filename);
        self.respond(
            FileMessage::LsResponse(LsResponse {
                file_id: FileMetadata::file_id_for(&req.filename),
                endpoints: replicas.iter().map(|r| r.endpoint()).collect(),
                ring_ids: replicas.iter().map(node_position).collect(),
                filename: req.filename,
            }),
            sender,
        )
        .await;
    }

    async fn handle_liststore_request(&self, sender: SocketAddr) {
        let entries = self.liststore().await;
        self.respond(
            FileMessage::ListStoreResponse(ListStoreResponse { entries }),
            sender,
        )
        .await;
    }

    fn log_remote_store(&self, resp: ListStoreResponse) {
        pf_info!(self.me; "peer stores {} file(s)", resp.entries.len());
        for entry in resp.entries {
            pf_info!(self.me; "  '{}' (id {}, {} bytes)",
                     entry.filename, entry.file_id, entry.total_size);
        }
    }

    async fn handle_exists_request(&self, sender: SocketAddr, req: FileExistsRequest) {
        let resp = match self.store().metadata(&req.filename).await {
            Some(meta) => FileExistsResponse {
                filename: req.filename,
                exists: true,
                file_id: meta.file_id,
                total_size: meta.total_size,
                version: meta.version,
            },
            None => FileExistsResponse {
                filename: req.filename,
                exists: false,
                file_id: 0,
                total_size: 0,
                version: 0,
            },
        };
        self.respond(FileMessage::FileExistsResponse(resp), sender).await;
    }

    async fn handle_merge_request(self: &Arc<Self>, sender: SocketAddr, req: MergeRequest) {
        if !self.is_coordinator(&req.filename) {
            // the initiator's ring view lags ours; coordinate anyway, the
            // collect round reaches whatever replica set we both agree on
            pf_warn!(self.me; "asked to coordinate merge of '{}' without being its first successor",
                     req.filename);
        }
        if !self.store().has_file(&req.filename).await {
            self.respond(
                FileMessage::MergeResponse(MergeResponse {
                    filename: req.filename,
                    success: false,
                    error: "file not found at coordinator".into(),
                    new_version: 0,
                }),
                sender,
            )
            .await;
            return;
        }

        // coordination waits on collect responses; keep the receive loop free
        let ops = self.clone();
        tokio::spawn(async move { ops.coordinate_merge(req.filename, sender).await });
    }

    /// Runs one merge round as the file's coordinator: collect blocks from
    /// the other replicas, union with our own, order deterministically,
    /// swap locally, then push the ordered id list (and any blocks a
    /// responder turned out to be missing) back out.
    async fn coordinate_merge(self: Arc<Self>, filename: String, reply_to: SocketAddr) {
        self.store().set_merging(&filename, true).await;

        let peers = self.resolved_peers(&filename).await;
        if !self.collect_gather.open(&filename, peers.len()) {
            pf_warn!(self.me; "merge of '{}' already in flight, ignoring", filename);
            return;
        }

        let collect = FileMessage::CollectBlocksRequest(CollectBlocksRequest {
            filename: filename.clone(),
        });
        match collect.encode() {
            Ok(bytes) => {
                for (node, addr) in &peers {
                    if let Err(e) = self.hub.send_bytes(&bytes, *addr).await {
                        pf_warn!(self.me; "collect request to {} failed: {}", node.endpoint(), e);
                    }
                }
            }
            Err(e) => pf_error!(self.me; "cannot encode collect request: {}", e),
        }

        // snapshot of our own history; appends racing past this point are
        // deliberately left to the next merge round
        let local_blocks = self.store().get_blocks(&filename).await;
        let responses = self
            .collect_gather
            .wait(&filename, self.config.collect_timeout)
            .await;
        pf_info!(self.me; "merge of '{}': {} of {} replicas responded",
                 filename, responses.len(), peers.len());

        let mut union = local_blocks;
        for resp in responses.values() {
            union.extend(resp.blocks.iter().cloned());
        }
        let ordered = order_blocks(union);
        let ordered_ids: Vec<u64> = ordered.iter().map(|b| b.block_id).collect();

        let Some(new_version) = self.store().merge(&filename, ordered.clone()).await else {
            pf_error!(self.me; "merge target '{}' vanished mid-round", filename);
            return;
        };

        let update = FileMessage::MergeUpdate(MergeUpdate {
            filename: filename.clone(),
            new_version,
            block_ids: ordered_ids,
        });
        let update_bytes = match update.encode() {
            Ok(b) => b,
            Err(e) => {
                pf_error!(self.me; "cannot encode merge update for '{}': {}", filename, e);
                return;
            }
        };
        for (node, addr) in &peers {
            if let Err(e) = self.hub.send_bytes(&update_bytes, *addr).await {
                pf_warn!(self.me; "merge update to {} failed: {}", node.endpoint(), e);
            }

            // back-fill blocks this responder reported not having
            if let Some(resp) = responses.get(addr) {
                let have: HashSet<u64> = resp.blocks.iter().map(|b| b.block_id).collect();
                for block in ordered.iter().filter(|b| !have.contains(&b.block_id)) {
                    let fill = FileMessage::ReplicateBlock(ReplicateBlock {
                        filename: filename.clone(),
                        block: block.clone(),
                    });
                    match fill.encode() {
                        Ok(bytes) => {
                            if let Err(e) = self.hub.send_bytes(&bytes, *addr).await {
                                pf_warn!(self.me; "back-fill to {} failed: {}", node.endpoint(), e);
                            }
                        }
                        Err(e) => pf_error!(self.me; "cannot encode back-fill block: {}", e),
                    }
                }
            }
        }

        pf_info!(self.me; "merged '{}' into {} block(s) at version {}",
                 filename, ordered.len(), new_version);
        self.respond(
            FileMessage::MergeResponse(MergeResponse {
                filename,
                success: true,
                error: String::new(),
                new_version,
            }),
            reply_to,
        )
        .await;
    }

    async fn handle_collect_request(&self, sender: SocketAddr, req: CollectBlocksRequest) {
        let resp = match self.store().metadata(&req.filename).await {
            Some(meta) => {
                // responder side of a merge round
                if self.store().is_merging(&req.filename).await {
                    // a previous round's MERGE_UPDATE never landed; this
                    // round's update supersedes it either way
                    pf_warn!(self.me; "'{}' still flagged merging from an unfinished round",
                             req.filename);
                }
                self.store().set_merging(&req.filename, true).await;
                CollectBlocksResponse {
                    blocks: self.store().get_blocks(&req.filename).await,
                    version: meta.version,
                    filename: req.filename,
                }
            }
            None => CollectBlocksResponse {
                filename: req.filename,
                version: 0,
                blocks: Vec::new(),
            },
        };
        self.respond(FileMessage::CollectBlocksResponse(resp), sender).await;
    }

    async fn handle_merge_update(&self, sender: SocketAddr, update: MergeUpdate) {
        if self
            .store()
            .apply_merge_update(&update.filename, update.block_ids, update.new_version)
            .await
        {
            pf_info!(self.me; "applied merge of '{}' at version {}",
                     update.filename, update.new_version);
            self.respond(
                FileMessage::MergeUpdateAck(MergeUpdateAck {
                    filename: update.filename,
                    new_version: update.new_version,
                }),
                sender,
            )
            .await;
        } else {
            pf_warn!(self.me; "merge update for unknown file '{}'", update.filename);
        }
    }

    async fn handle_transfer(&self, sender: SocketAddr, transfer: TransferFiles) {
        let filename = transfer.metadata.filename.clone();
        let file_id = transfer.metadata.file_id;
        if self
            .store()
            .store_file(transfer.metadata, transfer.blocks)
            .await
        {
            pf_info!(self.me; "installed transferred file '{}'", filename);
            self.respond(
                FileMessage::ReplicateAck(ReplicateAck {
                    filename,
                    ref_id: file_id,
                }),
                sender,
            )
            .await;
        }
    }

    /// Spawns a rebalance pass in the background (fired on ring changes).
    pub fn schedule_rebalance(self: &Arc<Self>) {
        let ops = self.clone();
        tokio::spawn(async move { ops.rebalance().await });
    }

    /// Ships every file this node holds but is no longer among the top
    /// successors for to the file's current replica set. Local copies are
    /// deleted only after a replica acks the transfer.
    async fn rebalance(self: Arc<Self>) {
        if self.rebalancing.swap(true, Ordering::SeqCst) {
            return; // a pass is already running
        }
        // coalesce bursts of membership churn into one pass
        tokio::time::sleep(Duration::from_millis(300)).await;

        for filename in self.store().list_files().await {
            let replicas = self.replicas_of(&filename);
            if replicas.is_empty() || replicas.contains(&self.self_id) {
                continue;
            }
            let Some(meta) = self.store().metadata(&filename).await else {
                continue;
            };
            let blocks = self.store().get_blocks(&filename).await;
            pf_info!(self.me; "no longer a replica for '{}', shipping to {:?}",
                     filename, replicas.iter().map(|r| r.endpoint()).collect::<Vec<_>>());

            self.pending_transfers
                .lock()
                .unwrap()
                .insert(filename.clone());
            for replica in &replicas {
                self.ship_file(&meta, &blocks, replica).await;
            }
        }

        self.rebalancing.store(false, Ordering::SeqCst);
    }

    /// Sends one file to one replica: whole in a single TRANSFER_FILES
    /// datagram when it fits, otherwise metadata first and the blocks as
    /// individual replicate messages (the idempotent append fills them in).
    async fn ship_file(&self, meta: &FileMetadata, blocks: &[FileBlock], dest: &NodeId) {
        let full = FileMessage::TransferFiles(TransferFiles {
            metadata: meta.clone(),
            blocks: blocks.to_vec(),
        });
        if let Ok(bytes) = full.encode() {
            if let Err(e) = self.hub.send_to_node(&bytes, dest).await {
                pf_warn!(self.me; "transfer of '{}' to {} failed: {}",
                         meta.filename, dest.endpoint(), e);
            }
            return;
        }

        let header = FileMessage::TransferFiles(TransferFiles {
            metadata: meta.clone(),
            blocks: Vec::new(),
        });
        match header.encode() {
            Ok(bytes) => {
                if let Err(e) = self.hub.send_to_node(&bytes, dest).await {
                    pf_warn!(self.me; "transfer of '{}' to {} failed: {}",
                             meta.filename, dest.endpoint(), e);
                    return;
                }
            }
            Err(e) => {
                pf_error!(self.me; "cannot encode transfer header for '{}': {}", meta.filename, e);
                return;
            }
        }
        for block in blocks {
            let fill = FileMessage::ReplicateBlock(ReplicateBlock {
                filename: meta.filename.clone(),
                block: block.clone(),
            });
            match fill.encode() {
                Ok(bytes) => {
                    if let Err(e) = self.hub.send_to_node(&bytes, dest).await {
                        pf_warn!(self.me; "block transfer to {} failed: {}", dest.endpoint(), e);
                    }
                }
                Err(e) => pf_error!(self.me; "cannot encode transfer block: {}", e),
            }
        }
    }

    /// The file's replica set minus self, with resolved datagram addresses.
    async fn resolved_peers(&self, filename: &str) -> Vec<(NodeId, SocketAddr)> {
        let mut peers = Vec::new();
        for replica in self.replicas_of(filename) {
            if replica == self.self_id {
                continue;
            }
            match DatagramHub::resolve(replica.host(), replica.port()).await {
                Ok(addr) => peers.push((replica, addr)),
                Err(e) => {
                    pf_warn!(self.me; "cannot resolve replica {}: {}", replica.endpoint(), e);
                }
            }
        }
        peers
    }
}
