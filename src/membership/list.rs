//! Thread-safe membership table.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::membership::{DetectorMode, MemberInfo, MemberStatus, NodeId};
use crate::utils::unix_secs;

use rand::Rng;

/// Table of peers keyed by `NodeId`, guarded by a single readers-writer
/// lock held only for the duration of one operation (no I/O under it).
/// Every mutating operation refreshes the entry's `local_time`.
pub struct MembershipList {
    /// My log line prefix.
    me: String,

    table: RwLock<HashMap<NodeId, MemberInfo>>,
}

impl MembershipList {
    pub fn new(me: String) -> Self {
        MembershipList {
            me,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a newly learned peer. No-op (returning false) if the peer is
    /// already known, or if the record says DEAD/LEFT about a peer we never
    /// knew -- we do not resurrect nodes on rumors about their demise.
    pub fn add(&self, mut info: MemberInfo) -> bool {
        let mut table = self.table.write().unwrap();
        if table.contains_key(&info.node_id) {
            return false;
        }
        if matches!(info.status, MemberStatus::Dead | MemberStatus::Left) {
            return false;
        }
        info.local_time = unix_secs();
        pf_info!(self.me; "added node {} in mode {}", info.node_id, info.mode);
        table.insert(info.node_id.clone(), info);
        true
    }

    /// Drops a peer from the table. `left` only changes the log wording.
    pub fn remove(&self, id: &NodeId, left: bool) -> bool {
        let mut table = self.table.write().unwrap();
        if table.remove(id).is_some() {
            if left {
                pf_info!(self.me; "node left: {}", id);
            } else {
                pf_info!(self.me; "removed node: {}", id);
            }
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.table.read().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().unwrap().is_empty()
    }

    /// Owned copy of one peer's record.
    pub fn get_info(&self, id: &NodeId) -> Option<MemberInfo> {
        self.table.read().unwrap().get(id).cloned()
    }

    /// Owned copy of the whole table.
    pub fn snapshot(&self) -> Vec<MemberInfo> {
        self.table.read().unwrap().values().cloned().collect()
    }

    pub fn update_status(&self, id: &NodeId, status: MemberStatus) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.status = status;
            info.local_time = unix_secs();
            pf_debug!(self.me; "updated node {} status to {}", id, status);
        }
    }

    pub fn update_incarnation(&self, id: &NodeId, incarnation: u32) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.incarnation = incarnation;
            info.local_time = unix_secs();
        }
    }

    /// Bumps a node's incarnation by one, returning the new value. Only ever
    /// meaningful for self (a node owns its own incarnation).
    pub fn bump_incarnation(&self, id: &NodeId) -> Option<u32> {
        let mut table = self.table.write().unwrap();
        table.get_mut(id).map(|info| {
            info.incarnation += 1;
            info.local_time = unix_secs();
            info.incarnation
        })
    }

    pub fn update_heartbeat(&self, id: &NodeId, heartbeat: u32) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.heartbeat = heartbeat;
            info.local_time = unix_secs();
        }
    }

    /// Bumps a node's heartbeat counter by one (self, each gossip tick).
    pub fn bump_heartbeat(&self, id: &NodeId) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.heartbeat += 1;
            info.local_time = unix_secs();
        }
    }

    pub fn update_mode(&self, id: &NodeId, mode: DetectorMode) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.mode = mode;
            info.local_time = unix_secs();
        }
    }

    /// Re-modes every entry (SWITCH handling).
    pub fn set_all_modes(&self, mode: DetectorMode) {
        let mut table = self.table.write().unwrap();
        let now = unix_secs();
        for info in table.values_mut() {
            info.mode = mode;
            info.local_time = now;
        }
    }

    pub fn update_local_time(&self, id: &NodeId) {
        let mut table = self.table.write().unwrap();
        if let Some(info) = table.get_mut(id) {
            info.local_time = unix_secs();
        }
    }

    /// Picks up to `k` random peers excluding `exclude` (normally self) by
    /// reservoir sampling, returning owned copies.
    pub fn select_k_random(&self, k: usize, exclude: &NodeId) -> Vec<MemberInfo> {
        let table = self.table.read().unwrap();
        let mut rng = rand::thread_rng();
        let mut reservoir: Vec<MemberInfo> = Vec::with_capacity(k);
        let mut seen = 0usize;
        for (id, info) in table.iter() {
            if id == exclude {
                continue;
            }
            if reservoir.len() < k {
                reservoir.push(info.clone());
            } else {
                let j = rng.gen_range(0..=seen);
                if j < k {
                    reservoir[j] = info.clone();
                }
            }
            seen += 1;
        }
        reservoir
    }
}

#[cfg(test)]
mod list_tests {
    use super::*;

    fn id(port: &str) -> NodeId {
        NodeId::new("localhost", port, 1).unwrap()
    }

    fn alive(port: &str) -> MemberInfo {
        MemberInfo::alive(id(port), DetectorMode::PingAck)
    }

    fn list_with(ports: &[&str]) -> MembershipList {
        let list = MembershipList::new("test".into());
        for p in ports {
            assert!(list.add(alive(p)));
        }
        list
    }

    #[test]
    fn add_is_idempotent() {
        let list = list_with(&["9000"]);
        assert!(!list.add(alive("9000")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn no_resurrection_of_unknown_dead() {
        let list = MembershipList::new("test".into());
        let mut info = alive("9000");
        info.status = MemberStatus::Dead;
        assert!(!list.add(info));
        let mut info = alive("9001");
        info.status = MemberStatus::Left;
        assert!(!list.add(info));
        assert!(list.is_empty());
    }

    #[test]
    fn mutations_refresh_local_time() {
        let list = list_with(&["9000"]);
        let before = {
            let mut table = list.table.write().unwrap();
            let info = table.get_mut(&id("9000")).unwrap();
            info.local_time = 1; // age the record artificially
            info.local_time
        };
        list.update_status(&id("9000"), MemberStatus::Suspect);
        let after = list.get_info(&id("9000")).unwrap().local_time;
        assert!(after > before);
    }

    #[test]
    fn incarnation_bump_is_monotone() {
        let list = list_with(&["9000"]);
        let n = id("9000");
        let mut prev = list.get_info(&n).unwrap().incarnation;
        for _ in 0..5 {
            let next = list.bump_incarnation(&n).unwrap();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn select_k_random_excludes_self() {
        let list = list_with(&["9000", "9001", "9002", "9003"]);
        let me = id("9000");
        for _ in 0..50 {
            let picked = list.select_k_random(3, &me);
            assert_eq!(picked.len(), 3);
            assert!(picked.iter().all(|m| m.node_id != me));
        }
    }

    #[test]
    fn select_k_random_caps_at_eligible() {
        let list = list_with(&["9000", "9001"]);
        let picked = list.select_k_random(5, &id("9000"));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].node_id, id("9001"));

        let lone = list_with(&["9000"]);
        assert!(lone.select_k_random(3, &id("9000")).is_empty());
    }

    #[test]
    fn set_all_modes_applies_everywhere() {
        let list = list_with(&["9000", "9001", "9002"]);
        list.set_all_modes(DetectorMode::GossipSuspect);
        for info in list.snapshot() {
            assert_eq!(info.mode, DetectorMode::GossipSuspect);
        }
    }
}
