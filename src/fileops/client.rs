//! Initiator-side file operations.
//!
//! These run on whatever task drives client commands and may park on the
//! pending tables; the node's receive loop completes them when response
//! datagrams arrive. Create and append are fire-and-forget past the send
//! fan-out -- the replication degree covers peers the datagrams miss.

use std::fmt;
use std::net::SocketAddr;

use crate::fileops::messages::{
    AppendRequest, CreateRequest, FileExistsRequest, FileExistsResponse, FileMessage, GetRequest,
    MergeRequest, StoreEntry,
};
use crate::fileops::FileOps;
use crate::membership::NodeId;
use crate::ring::node_position;
use crate::store::FileMetadata;
use crate::transport::DatagramHub;
use crate::utils::ShoalError;

/// One replica's slot in an ls report. `response == None` means the replica
/// never answered within the wait window.
#[derive(Debug, Clone)]
pub struct LsReplicaStatus {
    pub node: NodeId,
    pub ring_id: u64,
    pub response: Option<FileExistsResponse>,
}

/// Per-replica presence report for one file.
#[derive(Debug, Clone)]
pub struct LsReport {
    pub filename: String,
    pub file_id: u64,
    pub replicas: Vec<LsReplicaStatus>,
}

impl LsReport {
    /// True if any replica reported the file present.
    pub fn exists_somewhere(&self) -> bool {
        self.replicas
            .iter()
            .any(|r| r.response.as_ref().is_some_and(|resp| resp.exists))
    }
}

impl fmt::Display for LsReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "file '{}' (id {})", self.filename, self.file_id)?;
        for replica in &self.replicas {
            let state = match &replica.response {
                Some(resp) if resp.exists => format!(
                    "has file ({} bytes, version {})",
                    resp.total_size, resp.version
                ),
                Some(_) => "no file".to_string(),
                None => "no response".to_string(),
            };
            writeln!(
                f,
                "  {} (ring {}): {}",
                replica.node.endpoint(),
                replica.ring_id,
                state
            )?;
        }
        write!(
            f,
            "  => file {} in the cluster",
            if self.exists_somewhere() {
                "EXISTS"
            } else {
                "DOES NOT EXIST"
            }
        )
    }
}

impl FileOps {
    /// Creates `filename` with `data` as initial content on its replica
    /// set. Success means the file landed locally (when self is a replica)
    /// or the request reached at least one replica; acknowledgements are
    /// not awaited.
    pub async fn create_file(&self, filename: &str, data: Vec<u8>) -> Result<(), ShoalError> {
        let replicas = self.replicas_of(filename);
        if replicas.is_empty() {
            return logged_err!(self.me; "no replicas available for '{}'", filename);
        }

        // sequence 0 belongs to the create block; later appends by this
        // node must not reuse it
        let _ = self.next_seq(filename);

        let we_are_replica = replicas.contains(&self.self_id);
        if we_are_replica {
            if !self.store().create(filename, &data, &self.client_id).await {
                // present already: informational, the create goal is met
                pf_info!(self.me; "file '{}' already exists in the cluster", filename);
                return Ok(());
            }
            pf_info!(self.me; "created file '{}' locally ({} bytes)", filename, data.len());
        }

        let msg = FileMessage::CreateRequest(CreateRequest {
            filename: filename.to_string(),
            client_id: self.client_id.clone(),
            data,
        });
        let bytes = msg.encode()?;

        let mut sent = 0usize;
        for replica in &replicas {
            if *replica == self.self_id {
                continue;
            }
            match self.hub.send_to_node(&bytes, replica).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    pf_warn!(self.me; "create request to {} failed: {}", replica.endpoint(), e);
                }
            }
        }

        if !we_are_replica && sent == 0 {
            return logged_err!(self.me; "no replica reachable for create of '{}'", filename);
        }
        pf_info!(self.me; "create of '{}' fanned out to {} replica(s)", filename, sent);
        Ok(())
    }

    /// Fetches `filename` and returns its assembled bytes. Serves locally
    /// when this replica's copy satisfies read-my-writes; otherwise asks a
    /// remote replica and re-checks the response.
    pub async fn get_file(&self, filename: &str) -> Result<Vec<u8>, ShoalError> {
        if let Some(meta) = self.store().metadata(filename).await {
            if self
                .tracker()
                .satisfies_read_my_writes(&self.client_id, filename, &meta.block_ids)
            {
                pf_info!(self.me; "serving '{}' from the local store", filename);
                return self
                    .store()
                    .get(filename)
                    .await
                    .ok_or_else(|| ShoalError(format!("file '{}' vanished mid-read", filename)));
            }
            pf_info!(self.me; "local copy of '{}' misses own writes, asking a peer", filename);
        }

        let replicas = self.replicas_of(filename);
        if replicas.is_empty() {
            return logged_err!(self.me; "no replicas available for '{}'", filename);
        }

        if !self.pending_gets.register(filename) {
            return logged_err!(self.me; "a get of '{}' is already in flight", filename);
        }

        let msg = FileMessage::GetRequest(GetRequest {
            filename: filename.to_string(),
            client_id: self.client_id.clone(),
        });
        let bytes = match msg.encode() {
            Ok(b) => b,
            Err(e) => {
                self.pending_gets.cancel(filename);
                return Err(e);
            }
        };

        let mut sent = false;
        for replica in &replicas {
            if *replica == self.self_id {
                continue;
            }
            match self.hub.send_to_node(&bytes, replica).await {
                Ok(()) => {
                    pf_debug!(self.me; "get request for '{}' sent to {}", filename, replica.endpoint());
                    sent = true;
                    break;
                }
                Err(e) => {
                    pf_warn!(self.me; "get request to {} failed: {}", replica.endpoint(), e);
                }
            }
        }
        if !sent {
            self.pending_gets.cancel(filename);
            return logged_err!(self.me; "no replica reachable for get of '{}'", filename);
        }

        self.pending_gets
            .wait(filename, self.config.get_timeout)
            .await
    }

    /// Directed get: fetches `filename` from one specific node, bypassing
    /// replica selection.
    pub async fn get_from_replica(
        &self,
        endpoint: &str,
        filename: &str,
    ) -> Result<Vec<u8>, ShoalError> {
        let (host, port) = endpoint
            .split_once(':')
            .ok_or_else(|| ShoalError(format!("invalid endpoint '{}', want host:port", endpoint)))?;
        let dest = DatagramHub::resolve(host, port).await?;

        if !self.pending_gets.register(filename) {
            return logged_err!(self.me; "a get of '{}' is already in flight", filename);
        }
        let msg = FileMessage::GetRequest(GetRequest {
            filename: filename.to_string(),
            client_id: self.client_id.clone(),
        });
        let send = async {
            self.hub.send_bytes(&msg.encode()?, dest).await?;
            Ok::<(), ShoalError>(())
        };
        if let Err(e) = send.await {
            self.pending_gets.cancel(filename);
            return Err(e);
        }

        self.pending_gets
            .wait(filename, self.config.get_timeout)
            .await
    }

    /// Appends `data` to `filename` via the file's coordinator (the first
    /// successor). The coordinator builds the block, applies it, and fans it
    /// out; this side returns once the request is on the wire.
    pub async fn append_file(&self, filename: &str, data: Vec<u8>) -> Result<(), ShoalError> {
        let replicas = self.replicas_of(filename);
        let Some(coordinator) = replicas.first() else {
            return logged_err!(self.me; "no replicas available for '{}'", filename);
        };

        let sequence_num = self.next_seq(filename);
        let msg = FileMessage::AppendRequest(AppendRequest {
            filename: filename.to_string(),
            client_id: self.client_id.clone(),
            sequence_num,
            data,
        });
        self.hub.send_to_node(&msg.encode()?, coordinator).await?;
        pf_info!(self.me; "append #{} for '{}' sent to coordinator {}",
                 sequence_num, filename, coordinator.endpoint());
        Ok(())
    }

    /// Kicks off a merge round at the file's coordinator. Merge is
    /// best-effort by design: the initiator never learns of partial replica
    /// participation, the next round reconciles further.
    pub async fn merge_file(&self, filename: &str) -> Result<(), ShoalError> {
        let replicas = self.replicas_of(filename);
        let Some(coordinator) = replicas.first() else {
            return logged_err!(self.me; "no replicas available for '{}'", filename);
        };
        let msg = FileMessage::MergeRequest(MergeRequest {
            filename: filename.to_string(),
        });
        self.hub.send_to_node(&msg.encode()?, coordinator).await?;
        pf_info!(self.me; "merge of '{}' requested at coordinator {}", filename, coordinator.endpoint());
        Ok(())
    }

    /// Asks every expected replica whether it holds `filename` and reports
    /// per-replica presence with ring positions.
    pub async fn ls(&self, filename: &str) -> Result<LsReport, ShoalError> {
        let replicas = self.replicas_of(filename);
        if replicas.is_empty() {
            return logged_err!(self.me; "no replicas available for '{}'", filename);
        }

        let mut resolved: Vec<(NodeId, SocketAddr)> = Vec::with_capacity(replicas.len());
        for replica in replicas {
            match DatagramHub::resolve(replica.host(), replica.port()).await {
                Ok(addr) => resolved.push((replica, addr)),
                Err(e) => {
                    pf_warn!(self.me; "cannot resolve replica {}: {}", replica.endpoint(), e);
                }
            }
        }
        if resolved.is_empty() {
            return logged_err!(self.me; "no replica resolvable for ls of '{}'", filename);
        }

        if !self.exists_gather.open(filename, resolved.len()) {
            return logged_err!(self.me; "an ls of '{}' is already in flight", filename);
        }
        let msg = FileMessage::FileExistsRequest(FileExistsRequest {
            filename: filename.to_string(),
        });
        let bytes = msg.encode()?;
        for (_, addr) in &resolved {
            if let Err(e) = self.hub.send_bytes(&bytes, *addr).await {
                pf_warn!(self.me; "exists request to {} failed: {}", addr, e);
            }
        }

        let responses = self
            .exists_gather
            .wait(filename, self.config.ls_timeout)
            .await;

        let replicas = resolved
            .into_iter()
            .map(|(node, addr)| LsReplicaStatus {
                ring_id: node_position(&node),
                response: responses.get(&addr).cloned(),
                node,
            })
            .collect();
        Ok(LsReport {
            filename: filename.to_string(),
            file_id: FileMetadata::file_id_for(filename),
            replicas,
        })
    }

    /// Lists the files stored on this node (local-only query), flagging any
    /// file a merge round left in flight.
    pub async fn liststore(&self) -> Vec<StoreEntry> {
        let mut entries = Vec::new();
        for filename in self.store().list_files().await {
            if let Some(meta) = self.store().metadata(&filename).await {
                let merging = self.store().is_merging(&filename).await;
                entries.push(StoreEntry {
                    filename,
                    file_id: meta.file_id,
                    total_size: meta.total_size,
                    merging,
                });
            }
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        entries
    }

    pub(crate) fn replicas_of(&self, filename: &str) -> Vec<NodeId> {
        self.ring.file_replicas(filename, self.config.replication)
    }

    /// Issues the next append sequence number for this (node, file) pair.
    fn next_seq(&self, filename: &str) -> u32 {
        let mut seq_nums = self.seq_nums.lock().unwrap();
        let counter = seq_nums.entry(filename.to_string()).or_insert(0);
        let issued = *counter;
        *counter += 1;
        issued
    }
}

#[cfg(test)]
mod client_tests {
    use super::*;

    #[test]
    fn ls_report_rollup() {
        let node = NodeId::new("localhost", "9000", 1).unwrap();
        let absent = LsReport {
            filename: "f".into(),
            file_id: 1,
            replicas: vec![LsReplicaStatus {
                node: node.clone(),
                ring_id: 5,
                response: Some(FileExistsResponse {
                    filename: "f".into(),
                    exists: false,
                    file_id: 0,
                    total_size: 0,
                    version: 0,
                }),
            }],
        };
        assert!(!absent.exists_somewhere());

        let silent = LsReport {
            filename: "f".into(),
            file_id: 1,
            replicas: vec![LsReplicaStatus {
                node,
                ring_id: 5,
                response: None,
            }],
        };
        assert!(!silent.exists_somewhere());
        let rendered = format!("{}", silent);
        assert!(rendered.contains("no response"));
        assert!(rendered.contains("DOES NOT EXIST"));
    }
}
