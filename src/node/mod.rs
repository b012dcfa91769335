//! The Shoal node: composes the membership list, failure detector, hash
//! ring, block store, and file operation coordinator over one shared
//! datagram socket, and drives them from a single event loop.

mod control;
mod failure;
mod messages;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::fileops::{FileOps, FileOpsConfig, FILE_KIND_BASE};
use crate::membership::{
    ClusterMessage, DetectorMode, MemberInfo, MembershipList, NodeId, CLUSTER_KIND_MAX,
};
use crate::ring::HashRing;
use crate::store::BlockStore;
use crate::transport::DatagramHub;
use crate::utils::ShoalError;

use bytes::Bytes;

use serde::Deserialize;

use std::net::SocketAddr;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use failure::Probe;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Directory holding this node's persisted metadata and blocks.
    pub storage_root: String,

    /// Gossip tick interval in seconds.
    pub heartbeat_freq_s: u64,

    /// Ping-ack tick interval in seconds.
    pub ping_freq_s: u64,

    /// Seconds of silence before an ALIVE peer is suspected (or declared
    /// dead with suspicion off).
    pub timeout_s: u64,

    /// Seconds of further silence before a SUSPECT peer is declared dead.
    pub fail_s: u64,

    /// Seconds a DEAD/LEFT record lingers before being dropped from the
    /// membership list and the ring.
    pub cleanup_s: u64,

    /// How many random peers each tick's pings/gossip reach.
    pub fanout: usize,

    /// Replication degree: files live on this many ring successors.
    pub replication: usize,

    /// Fraction of incoming datagrams to drop (testing hook).
    pub drop_rate: f64,

    /// Seconds a get waits for its response.
    pub get_timeout_s: u64,

    /// Seconds an ls waits for per-replica responses.
    pub ls_timeout_s: u64,

    /// Seconds a merge coordinator waits for collected blocks.
    pub collect_timeout_s: u64,

    /// Milliseconds to wait for the introducer's ack during join.
    pub join_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            storage_root: "/tmp/shoal".into(),
            heartbeat_freq_s: 1,
            ping_freq_s: 1,
            timeout_s: 2,
            fail_s: 2,
            cleanup_s: 2,
            fanout: 3,
            replication: 3,
            drop_rate: 0.0,
            get_timeout_s: 5,
            ls_timeout_s: 3,
            collect_timeout_s: 3,
            join_timeout_ms: 500,
        }
    }
}

/// One Shoal node. All cross-task state lives behind its own lock, so every
/// entry point takes `&self`; the receive loop, the detector tick, and
/// client commands run concurrently against one instance.
pub struct ShoalNode {
    /// My log line prefix (`host:port`).
    me: String,

    config: NodeConfig,

    id: NodeId,

    /// The introducer's (host, port). Plays no privileged role after join.
    introducer: (String, String),

    members: MembershipList,
    ring: Arc<HashRing>,
    store: Arc<BlockStore>,
    fileops: Arc<FileOps>,
    hub: Arc<DatagramHub>,

    /// Current failure detection mode (cluster-global).
    fd_mode: RwLock<DetectorMode>,

    /// Set by LEAVE; both loops exit at their next suspension point.
    left: AtomicBool,

    /// Whether the introducer has acked our join ping yet. Pre-set for the
    /// bootstrap node itself.
    introducer_alive: AtomicBool,

    /// Outstanding ping probes awaiting their verdict.
    probes: Mutex<Vec<Probe>>,
}

impl ShoalNode {
    /// Creates a node listening on `host:port`, with its storage opened and
    /// recovered, ready for `run`. Joining the cluster is a separate step.
    pub async fn new_and_setup(
        host: &str,
        port: &str,
        introducer_host: &str,
        introducer_port: &str,
        config_str: Option<&str>,
    ) -> Result<Arc<Self>, ShoalError> {
        let config = parsed_config!(config_str => NodeConfig;
                                    storage_root, heartbeat_freq_s, ping_freq_s,
                                    timeout_s, fail_s, cleanup_s, fanout,
                                    replication, drop_rate, get_timeout_s,
                                    ls_timeout_s, collect_timeout_s,
                                    join_timeout_ms)?;

        let id = NodeId::fresh(host, port)?;
        let me = id.endpoint();
        if config.replication == 0 || config.fanout == 0 {
            return logged_err!(me; "replication and fanout must be at least 1");
        }
        if !(0.0..=1.0).contains(&config.drop_rate) {
            return logged_err!(me; "invalid drop_rate {}", config.drop_rate);
        }

        let hub = Arc::new(
            DatagramHub::new_and_setup(me.clone(), host, port, config.drop_rate).await?,
        );
        let store = Arc::new(
            BlockStore::new_and_setup(me.clone(), Path::new(&config.storage_root)).await?,
        );
        let ring = Arc::new(HashRing::new());
        let members = MembershipList::new(me.clone());

        // every node starts in plain ping-ack; joiners adopt the cluster's
        // mode from the introducer's ack
        members.add(MemberInfo::alive(id.clone(), DetectorMode::PingAck));
        ring.add_node(&id);

        let fileops = FileOps::new(
            me.clone(),
            id.clone(),
            FileOpsConfig {
                replication: config.replication,
                get_timeout: Duration::from_secs(config.get_timeout_s),
                ls_timeout: Duration::from_secs(config.ls_timeout_s),
                collect_timeout: Duration::from_secs(config.collect_timeout_s),
            },
            hub.clone(),
            ring.clone(),
            store.clone(),
        );

        let is_introducer = host == introducer_host && port == introducer_port;
        Ok(Arc::new(ShoalNode {
            me,
            config,
            id,
            introducer: (introducer_host.to_string(), introducer_port.to_string()),
            members,
            ring,
            store,
            fileops,
            hub,
            fd_mode: RwLock::new(DetectorMode::PingAck),
            left: AtomicBool::new(false),
            introducer_alive: AtomicBool::new(is_introducer),
            probes: Mutex::new(Vec::new()),
        }))
    }

    /// Main event loop: demultiplexes incoming datagrams, drives the
    /// failure detector on its tick cadence, and exits on LEAVE or on the
    /// termination signal.
    pub async fn run(self: Arc<Self>, mut rx_term: watch::Receiver<bool>) {
        let cadence = self
            .config
            .heartbeat_freq_s
            .min(self.config.ping_freq_s)
            .max(1);
        let mut tick = time::interval(Duration::from_secs(cadence));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = self.hub.recv_msg() => {
                    match msg {
                        Ok((sender, bytes)) => self.dispatch(sender, bytes).await,
                        Err(e) => {
                            pf_error!(self.me; "receive path closed: {}", e);
                            break;
                        }
                    }
                },

                _ = tick.tick() => {
                    if !self.has_left() {
                        self.detector_tick().await;
                    }
                },

                _ = rx_term.changed() => {
                    pf_warn!(self.me; "caught termination signal");
                    break;
                },
            }

            if self.has_left() {
                break;
            }
        }

        self.hub.shutdown();
        pf_info!(self.me; "node event loop exited");
    }

    /// Routes one datagram by its leading discriminant byte: 0..=5 is
    /// membership traffic, 100+ is file traffic, anything else (or any
    /// malformed body) is logged and dropped.
    async fn dispatch(&self, sender: SocketAddr, bytes: Bytes) {
        let Some(&kind) = bytes.first() else {
            return;
        };
        if kind <= CLUSTER_KIND_MAX {
            match ClusterMessage::decode(&bytes) {
                Ok(msg) => self.handle_cluster_message(sender, msg).await,
                Err(e) => {
                    pf_warn!(self.me; "discarding malformed membership datagram from {}: {}",
                             sender, e);
                }
            }
        } else if kind >= FILE_KIND_BASE {
            match crate::fileops::FileMessage::decode(&bytes) {
                Ok(msg) => self.fileops.handle_message(sender, msg).await,
                Err(e) => {
                    pf_warn!(self.me; "discarding malformed file datagram from {}: {}", sender, e);
                }
            }
        } else {
            pf_warn!(self.me; "unknown discriminant byte {} from {}", kind, sender);
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// `host:port` of this node.
    pub fn endpoint(&self) -> String {
        self.me.clone()
    }

    pub fn fileops(&self) -> &Arc<FileOps> {
        &self.fileops
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn members(&self) -> &MembershipList {
        &self.members
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    pub fn current_mode(&self) -> DetectorMode {
        *self.fd_mode.read().unwrap()
    }

    pub(crate) fn set_mode(&self, mode: DetectorMode) {
        *self.fd_mode.write().unwrap() = mode;
        self.members.update_mode(&self.id, mode);
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }

    /// Learns a previously unknown peer: membership, ring, and a rebalance
    /// pass since replica sets may have shifted.
    pub(crate) fn learn_node(&self, info: MemberInfo) {
        if self.members.add(info.clone()) {
            self.ring.add_node(&info.node_id);
            self.fileops.schedule_rebalance();
        }
    }

    /// Forgets a peer: membership, ring, and a rebalance pass.
    pub(crate) fn drop_member(&self, id: &NodeId, left: bool) {
        if self.members.remove(id, left) {
            self.ring.remove_node(id);
            self.fileops.schedule_rebalance();
        }
    }
}

#[cfg(test)]
mod node_tests;
