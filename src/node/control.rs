//! Cluster control operations (join/leave/switch) and the membership query
//! surface consumed by the command shell.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::membership::{ClusterMessage, ClusterMsgKind, DetectorMode, MemberInfo, MemberStatus};
use crate::node::ShoalNode;
use crate::ring::node_position;
use crate::transport::DatagramHub;
use crate::utils::ShoalError;

use tokio::time;

impl ShoalNode {
    /// True if this process is the cluster's bootstrap node.
    pub fn is_introducer(&self) -> bool {
        self.id.host() == self.introducer.0 && self.id.port() == self.introducer.1
    }

    /// Joins the cluster through the introducer: confirm it is reachable
    /// with a ping, then announce ourselves with a JOIN. Requires `run` to
    /// be driving the receive loop already (the ack arrives there). The
    /// block store is cleared first -- while this node was out, the cluster
    /// re-replicated its files, so stale local replicas must not resurrect.
    pub async fn join_network(&self) -> Result<(), ShoalError> {
        if self.is_introducer() {
            return logged_err!(self.me; "the introducer cannot join itself");
        }

        self.store.clear_all().await;
        self.fileops.tracker().clear_all();
        self.introducer_alive.store(false, Ordering::SeqCst);

        let dest = DatagramHub::resolve(&self.introducer.0, &self.introducer.1).await?;
        let Some(self_info) = self.members.get_info(&self.id) else {
            return logged_err!(self.me; "own membership record missing");
        };

        let ping = ClusterMessage::new(ClusterMsgKind::Ping, vec![self_info.clone()]);
        self.hub.send_bytes(&ping.encode()?, dest).await?;

        time::sleep(Duration::from_millis(self.config.join_timeout_ms)).await;
        if !self.introducer_alive.load(Ordering::SeqCst) {
            return logged_err!(self.me; "introducer {}:{} unreachable, join failed",
                               self.introducer.0, self.introducer.1);
        }

        // the ack may have re-moded us; send the current record
        let record = self.members.get_info(&self.id).unwrap_or(self_info);
        let join = ClusterMessage::new(ClusterMsgKind::Join, vec![record]);
        self.hub.send_bytes(&join.encode()?, dest).await?;
        pf_info!(self.me; "joined the cluster via introducer {}:{}",
                 self.introducer.0, self.introducer.1);
        Ok(())
    }

    /// Leaves the cluster: mark self LEFT, bump the incarnation so the
    /// departure outranks every ALIVE record in flight, tell every known
    /// peer, and stop both loops.
    pub async fn leave_network(&self) {
        self.members.update_status(&self.id, MemberStatus::Left);
        self.members.bump_incarnation(&self.id);

        if let Some(self_info) = self.members.get_info(&self.id) {
            let msg = ClusterMessage::new(ClusterMsgKind::Leave, vec![self_info]);
            match msg.encode() {
                Ok(bytes) => {
                    for peer in self.members.snapshot() {
                        if peer.node_id == self.id {
                            continue;
                        }
                        if let Err(e) = self.hub.send_to_node(&bytes, &peer.node_id).await {
                            pf_warn!(self.me; "leave notice to {} failed: {}",
                                     peer.node_id.endpoint(), e);
                        }
                    }
                }
                Err(e) => pf_error!(self.me; "cannot encode leave notice: {}", e),
            }
        }

        self.left.store(true, Ordering::SeqCst);
        pf_info!(self.me; "left the cluster");
    }

    /// Initiates a cluster-wide detector mode switch: every known peer gets
    /// a SWITCH carrying the target mode, then the local view flips.
    pub async fn switch_mode(&self, mode: DetectorMode) -> Result<(), ShoalError> {
        if self.current_mode() == mode {
            return Ok(());
        }
        pf_info!(self.me; "switching cluster from {} to {}", self.current_mode(), mode);

        let Some(mut carrier) = self.members.get_info(&self.id) else {
            return logged_err!(self.me; "own membership record missing");
        };
        carrier.mode = mode;
        let msg = ClusterMessage::new(ClusterMsgKind::Switch, vec![carrier]);
        let bytes = msg.encode()?;
        for peer in self.members.snapshot() {
            if peer.node_id == self.id {
                continue;
            }
            if let Err(e) = self.hub.send_to_node(&bytes, &peer.node_id).await {
                pf_warn!(self.me; "switch notice to {} failed: {}", peer.node_id.endpoint(), e);
            }
        }

        self.members.set_all_modes(mode);
        self.set_mode(mode);
        Ok(())
    }

    /// Every membership record, unordered.
    pub fn members_snapshot(&self) -> Vec<MemberInfo> {
        self.members.snapshot()
    }

    /// Membership records paired with ring positions, ascending by
    /// position.
    pub fn members_with_ring_ids(&self) -> Vec<(u64, MemberInfo)> {
        let mut rows: Vec<(u64, MemberInfo)> = self
            .members
            .snapshot()
            .into_iter()
            .map(|info| (node_position(&info.node_id), info))
            .collect();
        rows.sort_by_key(|(position, _)| *position);
        rows
    }

    /// This node's own membership record.
    pub fn self_record(&self) -> Option<MemberInfo> {
        self.members.get_info(&self.id)
    }

    /// Currently suspected peers.
    pub fn suspects(&self) -> Vec<MemberInfo> {
        self.members
            .snapshot()
            .into_iter()
            .filter(|info| info.status == MemberStatus::Suspect)
            .collect()
    }

    /// This node's ring position.
    pub fn ring_id(&self) -> u64 {
        node_position(&self.id)
    }
}
