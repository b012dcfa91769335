//! Failure detector ticks.
//!
//! One tick per cadence interval, in whichever of the four modes the
//! cluster currently runs. Gossip mode bumps the self heartbeat, ages every
//! peer record, and spreads the full table; ping-ack mode judges probes
//! whose answer window has closed and fires a fresh round of pings. Probes
//! carry their own deadlines in a queue instead of sleeping in the tick, so
//! the event loop never stalls while a probe matures.

use std::time::Duration;

use crate::membership::{ClusterMessage, ClusterMsgKind, MemberInfo, MemberStatus};
use crate::node::ShoalNode;
use crate::utils::unix_secs;

use tokio::time::Instant;

/// An outstanding ping: the target's record as it looked when pinged, and
/// when the answer window closes.
pub(crate) struct Probe {
    pub(crate) target: MemberInfo,
    pub(crate) deadline: Instant,
}

impl ShoalNode {
    pub(crate) async fn detector_tick(&self) {
        let mode = self.current_mode();
        if mode.gossiping() {
            self.gossip_tick(mode.suspicion()).await;
        } else {
            self.ping_ack_tick(mode.suspicion()).await;
        }
    }

    async fn gossip_tick(&self, suspicion: bool) {
        let now = unix_secs();
        for info in self.members.snapshot() {
            if info.node_id == *self.id() {
                self.members.bump_heartbeat(self.id());
                continue;
            }
            let delta = u64::from(now.saturating_sub(info.local_time));
            self.age_record(&info, delta, suspicion);
        }

        let snapshot = self.members.snapshot();
        self.send_records(ClusterMsgKind::Gossip, snapshot).await;
    }

    async fn ping_ack_tick(&self, suspicion: bool) {
        // judge probes whose answer window has closed
        let now = Instant::now();
        let due: Vec<MemberInfo> = {
            let mut probes = self.probes.lock().unwrap();
            let (ripe, waiting): (Vec<_>, Vec<_>) =
                probes.drain(..).partition(|p| p.deadline <= now);
            *probes = waiting;
            ripe.into_iter().map(|p| p.target).collect()
        };

        let now_secs = unix_secs();
        let mut updates = Vec::new();
        for old in due {
            let Some(latest) = self.members.get_info(&old.node_id) else {
                continue; // removed while the probe was in flight
            };
            if latest.mode != old.mode {
                continue; // mode switched in the middle
            }
            let delta = u64::from(now_secs.saturating_sub(latest.local_time));
            let changed = if latest.incarnation > old.incarnation || latest.status != old.status {
                true // record moved on its own (ack or gossip); spread it
            } else {
                self.age_record(&latest, delta, suspicion)
            };
            if changed {
                if let Some(current) = self.members.get_info(&old.node_id) {
                    updates.push(current);
                }
            }
        }
        self.send_records(ClusterMsgKind::Gossip, updates).await;

        // fire a fresh round of pings at K random peers
        let Some(self_info) = self.members.get_info(self.id()) else {
            return;
        };
        let ping = ClusterMessage::new(ClusterMsgKind::Ping, vec![self_info]);
        let bytes = match ping.encode() {
            Ok(b) => b,
            Err(e) => {
                pf_error!(self.me; "cannot encode ping: {}", e);
                return;
            }
        };
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_s);
        for target in self.members.select_k_random(self.config.fanout, self.id()) {
            if let Err(e) = self.hub.send_to_node(&bytes, &target.node_id).await {
                pf_warn!(self.me; "ping to {} failed: {}", target.node_id.endpoint(), e);
            }
            self.probes.lock().unwrap().push(Probe { target, deadline });
        }
    }

    /// Applies the silence-based status transitions to one peer record.
    /// Returns true if the record changed (worth gossiping). Status
    /// downgrades also bump the record's heartbeat: peers gate incoming
    /// gossip on heartbeat freshness, so an aged record must outrank the
    /// copies they hold or the transition would be discarded as stale news.
    pub(crate) fn age_record(&self, info: &MemberInfo, delta_s: u64, suspicion: bool) -> bool {
        match info.status {
            MemberStatus::Alive if delta_s > self.config.timeout_s => {
                let next = if suspicion {
                    MemberStatus::Suspect
                } else {
                    MemberStatus::Dead
                };
                pf_info!(self.me; "{} silent for {}s, marking {}",
                         info.node_id, delta_s, next);
                self.members.update_status(&info.node_id, next);
                self.members.bump_heartbeat(&info.node_id);
                true
            }
            MemberStatus::Suspect if delta_s > self.config.fail_s => {
                pf_info!(self.me; "{} stayed suspect for {}s, marking DEAD", info.node_id, delta_s);
                self.members.update_status(&info.node_id, MemberStatus::Dead);
                self.members.bump_heartbeat(&info.node_id);
                true
            }
            MemberStatus::Dead if delta_s > self.config.cleanup_s => {
                self.drop_member(&info.node_id, false);
                true
            }
            MemberStatus::Left if delta_s > self.config.cleanup_s => {
                self.drop_member(&info.node_id, true);
                true
            }
            _ => false,
        }
    }
}
