//! Membership message handlers: PING/ACK, gossip reconciliation with
//! self-refutation, JOIN, LEAVE, and cluster-wide mode SWITCH.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use crate::membership::{ClusterMessage, ClusterMsgKind, MemberInfo, MemberStatus};
use crate::node::ShoalNode;

impl ShoalNode {
    pub(crate) async fn handle_cluster_message(&self, sender: SocketAddr, msg: ClusterMessage) {
        match msg.kind {
            ClusterMsgKind::Ping => {
                let Some(info) = msg.records.into_iter().next() else {
                    pf_warn!(self.me; "ping without a sender record");
                    return;
                };
                self.handle_ping(sender, info).await;
            }
            ClusterMsgKind::Ack => {
                let Some(info) = msg.records.into_iter().next() else {
                    pf_warn!(self.me; "ack without a sender record");
                    return;
                };
                self.handle_ack(info);
            }
            ClusterMsgKind::Gossip => {
                let updates = self.reconcile_gossip(msg.records);
                // refutations and newly learned departures spread right away
                self.send_records(ClusterMsgKind::Gossip, updates).await;
            }
            ClusterMsgKind::Join => {
                let Some(info) = msg.records.into_iter().next() else {
                    pf_warn!(self.me; "join without a member record");
                    return;
                };
                self.handle_join(sender, info).await;
            }
            ClusterMsgKind::Leave => {
                let Some(info) = msg.records.into_iter().next() else {
                    pf_warn!(self.me; "leave without a member record");
                    return;
                };
                self.handle_leave(info);
            }
            ClusterMsgKind::Switch => {
                let Some(carrier) = msg.records.first() else {
                    pf_warn!(self.me; "switch without a mode carrier");
                    return;
                };
                pf_info!(self.me; "switch request received, moving every node to {}", carrier.mode);
                self.members.set_all_modes(carrier.mode);
                self.set_mode(carrier.mode);
            }
        }
    }

    async fn handle_ping(&self, sender: SocketAddr, info: MemberInfo) {
        match self.members.get_info(&info.node_id) {
            Some(local) => {
                if info.incarnation > local.incarnation {
                    self.members
                        .update_incarnation(&info.node_id, info.incarnation);
                }
                if info.status != local.status {
                    // the peer pinged us with a new view of itself
                    self.members.update_status(&info.node_id, info.status);
                }
            }
            None => self.learn_node(info),
        }

        let Some(self_info) = self.members.get_info(self.id()) else {
            return;
        };
        let ack = ClusterMessage::new(ClusterMsgKind::Ack, vec![self_info]);
        match ack.encode() {
            Ok(bytes) => {
                if let Err(e) = self.hub.send_bytes(&bytes, sender).await {
                    pf_warn!(self.me; "ack to {} failed: {}", sender, e);
                }
            }
            Err(e) => pf_error!(self.me; "cannot encode ack: {}", e),
        }
    }

    fn handle_ack(&self, info: MemberInfo) {
        if !self.introducer_alive.load(Ordering::SeqCst) {
            // first ack during join: the introducer is reachable, and its
            // record carries the cluster's current detector mode
            let mode = info.mode;
            self.learn_node(info);
            if mode != self.current_mode() {
                pf_info!(self.me; "adopting cluster detector mode {}", mode);
                self.set_mode(mode);
            }
            self.introducer_alive.store(true, Ordering::SeqCst);
            return;
        }

        if self.members.contains(&info.node_id) {
            self.members.update_local_time(&info.node_id);
        } else {
            self.learn_node(info);
        }
    }

    /// Applies a batch of gossiped records against the local view and
    /// returns the records worth re-gossiping (self-refutations and
    /// departures learned here first).
    pub(crate) fn reconcile_gossip(&self, records: Vec<MemberInfo>) -> Vec<MemberInfo> {
        let mut updates = Vec::new();
        for incoming in records {
            if incoming.node_id == *self.id() {
                if let Some(refuted) = self.refute_rumor(&incoming) {
                    updates.push(refuted);
                }
                continue;
            }

            let Some(local) = self.members.get_info(&incoming.node_id) else {
                self.learn_node(incoming);
                continue;
            };
            if incoming.mode != local.mode {
                continue; // a mode switch is in flight, views not comparable
            }

            if incoming.incarnation > local.incarnation {
                // higher incarnation wins outright
                self.members
                    .update_status(&incoming.node_id, incoming.status);
                self.members
                    .update_heartbeat(&incoming.node_id, incoming.heartbeat);
                self.members
                    .update_incarnation(&incoming.node_id, incoming.incarnation);
                continue;
            }
            if incoming.incarnation != local.incarnation
                || incoming.heartbeat <= local.heartbeat
            {
                continue; // stale news
            }

            if incoming.status == local.status {
                self.members
                    .update_heartbeat(&incoming.node_id, incoming.heartbeat);
            } else if incoming.status == MemberStatus::Suspect
                && local.status == MemberStatus::Alive
            {
                self.members
                    .update_status(&incoming.node_id, MemberStatus::Suspect);
                self.members
                    .update_heartbeat(&incoming.node_id, incoming.heartbeat);
            } else if incoming.status == MemberStatus::Dead
                && local.status == MemberStatus::Suspect
            {
                self.members
                    .update_status(&incoming.node_id, MemberStatus::Dead);
                self.members
                    .update_heartbeat(&incoming.node_id, incoming.heartbeat);
            } else if incoming.status == MemberStatus::Left
                && local.status != MemberStatus::Left
            {
                // a departure we had not heard of: drop it and spread the word
                self.drop_member(&incoming.node_id, true);
                updates.push(incoming);
            } else if incoming.status == MemberStatus::Alive
                && matches!(local.status, MemberStatus::Suspect | MemberStatus::Dead)
            {
                self.members
                    .update_status(&incoming.node_id, MemberStatus::Alive);
                self.members
                    .update_heartbeat(&incoming.node_id, incoming.heartbeat);
            }
        }
        updates
    }

    /// A rumor about self that is worse than our own view gets refuted: we
    /// own our incarnation, so bumping it and re-asserting ALIVE outranks
    /// the rumor everywhere it has spread. Heartbeat comparison does not
    /// gate this -- nobody's view of our heartbeat is fresher than ours.
    fn refute_rumor(&self, rumor: &MemberInfo) -> Option<MemberInfo> {
        let local = self.members.get_info(self.id())?;
        if local.status != MemberStatus::Alive {
            return None; // leaving: let the LEFT record spread instead
        }
        if rumor.incarnation < local.incarnation {
            return None; // already outranked
        }
        if !matches!(rumor.status, MemberStatus::Suspect | MemberStatus::Dead) {
            return None;
        }

        self.members.update_status(self.id(), MemberStatus::Alive);
        if rumor.incarnation > local.incarnation {
            // outrank even a forged-ahead rumor
            self.members.update_incarnation(self.id(), rumor.incarnation);
        }
        self.members.bump_incarnation(self.id());
        let refuted = self.members.get_info(self.id())?;
        pf_info!(self.me; "refuting {} rumor about self, incarnation now {}",
                 rumor.status, refuted.incarnation);
        Some(refuted)
    }

    async fn handle_join(&self, sender: SocketAddr, info: MemberInfo) {
        pf_info!(self.me; "join request from {}", info.node_id);
        let joiner = info.node_id.clone();
        self.learn_node(info);
        // the joiner runs whatever mode the cluster runs
        self.members.update_mode(&joiner, self.current_mode());

        // hand the newcomer our full view
        let reply = ClusterMessage::new(ClusterMsgKind::Gossip, self.members.snapshot());
        match reply.encode() {
            Ok(bytes) => {
                if let Err(e) = self.hub.send_bytes(&bytes, sender).await {
                    pf_warn!(self.me; "membership reply to joiner failed: {}", e);
                }
            }
            Err(e) => pf_error!(self.me; "cannot encode membership reply: {}", e),
        }

        // and spread the newcomer
        if let Some(record) = self.members.get_info(&joiner) {
            self.send_records(ClusterMsgKind::Gossip, vec![record]).await;
        }
    }

    fn handle_leave(&self, info: MemberInfo) {
        if self.members.contains(&info.node_id) {
            pf_info!(self.me; "{} announced leave", info.node_id);
            self.members.update_status(&info.node_id, MemberStatus::Left);
            self.members
                .update_incarnation(&info.node_id, info.incarnation);
        }
    }

    /// Encodes the records once and gossips them to K random peers.
    pub(crate) async fn send_records(&self, kind: ClusterMsgKind, records: Vec<MemberInfo>) {
        if records.is_empty() {
            return;
        }
        let msg = ClusterMessage::new(kind, records);
        let bytes = match msg.encode() {
            Ok(b) => b,
            Err(e) => {
                pf_error!(self.me; "cannot encode {:?} message: {}", kind, e);
                return;
            }
        };
        for peer in self.members.select_k_random(self.config.fanout, self.id()) {
            if let Err(e) = self.hub.send_to_node(&bytes, &peer.node_id).await {
                pf_warn!(self.me; "gossip to {} failed: {}", peer.node_id.endpoint(), e);
            }
        }
    }
}
