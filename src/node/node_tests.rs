//! Multi-node scenarios over real loopback sockets. Each test uses its own
//! port range and storage roots, so they can run in parallel.

use std::sync::Arc;
use std::time::Duration;

use crate::membership::{DetectorMode, MemberInfo, MemberStatus};
use crate::node::ShoalNode;
use crate::store::FileBlock;
use crate::utils::unix_secs;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Polls `$cond` (an expression, awaits allowed) every 200 ms until it holds
/// or `$limit_ms` passes; yields whether it ever held.
macro_rules! eventually {
    ($limit_ms:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + Duration::from_millis($limit_ms);
        loop {
            if $cond {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                break false;
            }
            sleep(Duration::from_millis(200)).await;
        }
    }};
}

struct TestNode {
    node: Arc<ShoalNode>,
    handle: JoinHandle<()>,
    _tx_term: watch::Sender<bool>,
}

impl TestNode {
    /// Simulates a crash: the event loop dies mid-flight and the socket
    /// goes silent, with no LEAVE announced.
    fn kill(&self) {
        self.handle.abort();
        self.node.hub.shutdown();
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn launch(tag: &str, port: u16, introducer_port: u16) -> TestNode {
    let root = std::env::temp_dir().join(format!(
        "shoal-node-{}-{}-{}",
        tag,
        port,
        std::process::id()
    ));
    let _ = tokio::fs::remove_dir_all(&root).await;
    let config = format!("storage_root = '{}'", root.display());

    let node = ShoalNode::new_and_setup(
        "127.0.0.1",
        &port.to_string(),
        "127.0.0.1",
        &introducer_port.to_string(),
        Some(&config),
    )
    .await
    .unwrap();

    let (tx_term, rx_term) = watch::channel(false);
    let handle = tokio::spawn(node.clone().run(rx_term));
    TestNode {
        node,
        handle,
        _tx_term: tx_term,
    }
}

/// Waits until every node's membership list reaches `count` entries.
async fn wait_members(nodes: &[&TestNode], count: usize) -> bool {
    eventually!(
        8_000,
        nodes.iter().all(|n| n.node.members().len() == count)
    )
}

/// Waits until every node's store holds `filename`.
async fn wait_stored(nodes: &[&TestNode], filename: &str) -> bool {
    eventually!(4_000, {
        let mut all = true;
        for n in nodes {
            all &= n.node.store().has_file(filename).await;
        }
        all
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn single_node_create_and_get() {
    let a = launch("single", 31000, 31000).await;
    assert!(a.node.is_introducer());

    let ops = a.node.fileops();
    ops.create_file("hello.txt", b"hi".to_vec()).await.unwrap();

    let meta = a.node.store().metadata("hello.txt").await.unwrap();
    assert_eq!(meta.block_ids.len(), 1);
    assert_eq!(meta.total_size, 2);

    let fetched = ops.get_file("hello.txt").await.unwrap();
    assert_eq!(fetched, b"hi".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn join_builds_shared_view() {
    let a = launch("join", 31010, 31010).await;
    let b = launch("join", 31011, 31010).await;

    assert!(b.node.join_network().await.is_ok());
    assert!(wait_members(&[&a, &b], 2).await);
    assert_eq!(a.node.ring().len(), 2);
    assert_eq!(b.node.ring().len(), 2);

    // the introducer cannot join itself
    assert!(a.node.join_network().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn join_fails_without_introducer() {
    // 31019 has nobody listening
    let lone = launch("nojoin", 31015, 31019).await;
    assert!(lone.node.join_network().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn three_node_create_replicates() {
    let a = launch("create3", 31020, 31020).await;
    let b = launch("create3", 31021, 31020).await;
    let c = launch("create3", 31022, 31020).await;
    b.node.join_network().await.unwrap();
    c.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b, &c], 3).await);

    a.node
        .fileops()
        .create_file("rep.txt", b"abc".to_vec())
        .await
        .unwrap();
    assert!(wait_stored(&[&a, &b, &c], "rep.txt").await);

    for n in [&a, &b, &c] {
        let meta = n.node.store().metadata("rep.txt").await.unwrap();
        assert_eq!(meta.block_ids.len(), 1);
        assert_eq!(meta.total_size, 3);
        assert_eq!(
            n.node.store().get("rep.txt").await.unwrap(),
            b"abc".to_vec()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn append_ordering_at_coordinator() {
    let a = launch("append3", 31030, 31030).await;
    let b = launch("append3", 31031, 31030).await;
    let c = launch("append3", 31032, 31030).await;
    b.node.join_network().await.unwrap();
    c.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b, &c], 3).await);

    let ops = a.node.fileops();
    ops.create_file("log.txt", b"abc".to_vec()).await.unwrap();
    assert!(wait_stored(&[&a, &b, &c], "log.txt").await);

    ops.append_file("log.txt", b"X".to_vec()).await.unwrap();
    ops.append_file("log.txt", b"Y".to_vec()).await.unwrap();

    // every replica settles on the same three blocks in the same order
    let converged = eventually!(6_000, {
        let ma = a.node.store().metadata("log.txt").await;
        let mb = b.node.store().metadata("log.txt").await;
        let mc = c.node.store().metadata("log.txt").await;
        match (ma, mb, mc) {
            (Some(ma), Some(mb), Some(mc)) => {
                ma.block_ids.len() == 3
                    && ma.block_ids == mb.block_ids
                    && mb.block_ids == mc.block_ids
            }
            _ => false,
        }
    });
    assert!(converged, "replicas never agreed on the append order");

    // the coordinator's tracker lists both appends for this client
    let replicas = a.node.ring().file_replicas("log.txt", 3);
    let coordinator = [&a, &b, &c]
        .into_iter()
        .find(|n| n.node.id() == &replicas[0])
        .unwrap();
    assert!(coordinator.node.fileops().is_coordinator("log.txt"));
    assert_eq!(
        [&a, &b, &c]
            .iter()
            .filter(|n| n.node.fileops().is_coordinator("log.txt"))
            .count(),
        1
    );
    let recorded = coordinator
        .node
        .fileops()
        .tracker()
        .recorded(ops.client_id(), "log.txt");
    assert_eq!(recorded.len(), 2);

    let meta = a.node.store().metadata("log.txt").await.unwrap();
    assert_eq!(&meta.block_ids[1..], &recorded[..]);
    assert_eq!(ops.get_file("log.txt").await.unwrap(), b"abcXY".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn crashed_node_is_detected_and_removed() {
    let a = launch("fail4", 31040, 31040).await;
    let b = launch("fail4", 31041, 31040).await;
    let c = launch("fail4", 31042, 31040).await;
    let d = launch("fail4", 31043, 31040).await;
    b.node.join_network().await.unwrap();
    c.node.join_network().await.unwrap();
    d.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b, &c, &d], 4).await);

    let d_id = d.node.id().clone();
    d.kill();

    // within T_TIMEOUT + T_FAIL + T_CLEANUP (plus probe latency) every
    // survivor forgets the crashed node, in membership and on the ring
    let purged = eventually!(14_000, {
        [&a, &b, &c].iter().all(|n| {
            !n.node.members().contains(&d_id) && !n.node.ring().contains(&d_id)
        })
    });
    assert!(purged, "a survivor still remembers the crashed node");
    assert!(wait_members(&[&a, &b, &c], 3).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn suspect_rumor_about_self_is_refuted() {
    let a = launch("refute", 31050, 31050).await;
    a.node
        .switch_mode(DetectorMode::GossipSuspect)
        .await
        .unwrap();

    let before = a.node.self_record().unwrap();
    assert_eq!(before.status, MemberStatus::Alive);

    let rumor = MemberInfo {
        node_id: a.node.id().clone(),
        status: MemberStatus::Suspect,
        mode: DetectorMode::GossipSuspect,
        local_time: unix_secs(),
        incarnation: before.incarnation,
        heartbeat: before.heartbeat,
    };
    let updates = a.node.reconcile_gossip(vec![rumor.clone()]);

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, MemberStatus::Alive);
    assert_eq!(updates[0].incarnation, before.incarnation + 1);

    let after = a.node.self_record().unwrap();
    assert_eq!(after.status, MemberStatus::Alive);
    assert_eq!(after.incarnation, before.incarnation + 1);

    // the same rumor is now outranked and changes nothing
    assert!(a.node.reconcile_gossip(vec![rumor]).is_empty());
    assert_eq!(
        a.node.self_record().unwrap().incarnation,
        before.incarnation + 1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn merge_converges_diverged_replicas() {
    let a = launch("merge3", 31060, 31060).await;
    let b = launch("merge3", 31061, 31060).await;
    let c = launch("merge3", 31062, 31060).await;
    b.node.join_network().await.unwrap();
    c.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b, &c], 3).await);

    a.node
        .fileops()
        .create_file("m.txt", b"0".to_vec())
        .await
        .unwrap();
    assert!(wait_stored(&[&a, &b, &c], "m.txt").await);

    // diverge the replicas behind the protocol's back
    let x = FileBlock::build("writer-x", 0, 5_000, b"X".to_vec());
    let y = FileBlock::build("writer-y", 0, 6_000, b"Y".to_vec());
    assert!(a.node.store().append_block("m.txt", x.clone()).await);
    assert!(b.node.store().append_block("m.txt", y.clone()).await);

    a.node.fileops().merge_file("m.txt").await.unwrap();

    // deterministic order: (timestamp, client, seq) ascending puts the two
    // injected blocks before the created block's wall-clock timestamp
    let converged = eventually!(6_000, {
        let ma = a.node.store().metadata("m.txt").await;
        let mb = b.node.store().metadata("m.txt").await;
        let mc = c.node.store().metadata("m.txt").await;
        match (ma, mb, mc) {
            (Some(ma), Some(mb), Some(mc)) => {
                ma.block_ids.len() == 3
                    && ma.block_ids == mb.block_ids
                    && mb.block_ids == mc.block_ids
                    && ma.block_ids[0] == x.block_id
                    && ma.block_ids[1] == y.block_id
            }
            _ => false,
        }
    });
    assert!(converged, "replicas never converged after merge");

    for n in [&a, &b, &c] {
        let content = eventually!(4_000, {
            n.node.store().get("m.txt").await == Some(b"XY0".to_vec())
        });
        assert!(content, "replica {} missing merged bytes", n.node.endpoint());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leaver_is_marked_and_cleaned_up() {
    let a = launch("leave", 31070, 31070).await;
    let b = launch("leave", 31071, 31070).await;
    b.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b], 2).await);

    let b_id = b.node.id().clone();
    b.node.leave_network().await;
    assert!(b.node.has_left());

    // A first marks B LEFT, then cleanup drops it entirely
    let gone = eventually!(10_000, {
        !a.node.members().contains(&b_id) && !a.node.ring().contains(&b_id)
    });
    assert!(gone, "the leaver was never cleaned up");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mode_switch_reaches_peers() {
    let a = launch("switch", 31080, 31080).await;
    let b = launch("switch", 31081, 31080).await;
    b.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b], 2).await);

    a.node
        .switch_mode(DetectorMode::GossipSuspect)
        .await
        .unwrap();
    let switched = eventually!(4_000, {
        b.node.current_mode() == DetectorMode::GossipSuspect
            && b.node
                .members_snapshot()
                .iter()
                .all(|m| m.mode == DetectorMode::GossipSuspect)
    });
    assert!(switched, "peer never adopted the new mode");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn directed_get_and_missing_file_errors() {
    let a = launch("directed", 31090, 31090).await;
    let b = launch("directed", 31091, 31090).await;
    b.node.join_network().await.unwrap();
    assert!(wait_members(&[&a, &b], 2).await);

    a.node
        .fileops()
        .create_file("d.txt", b"direct".to_vec())
        .await
        .unwrap();
    assert!(wait_stored(&[&b], "d.txt").await);

    let fetched = b
        .node
        .fileops()
        .get_from_replica("127.0.0.1:31090", "d.txt")
        .await
        .unwrap();
    assert_eq!(fetched, b"direct".to_vec());

    // a get for a file nobody holds fails with the peer's error notice
    let missing = b.node.fileops().get_file("ghost.txt").await;
    assert!(missing.is_err());

    // ls sees the file on both replicas
    let report = a.node.fileops().ls("d.txt").await.unwrap();
    assert!(report.exists_somewhere());
    assert_eq!(report.replicas.len(), 2);
    assert!(report
        .replicas
        .iter()
        .all(|r| r.response.as_ref().is_some_and(|resp| resp.exists)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn liststore_reports_local_files() {
    let a = launch("liststore", 31095, 31095).await;
    let ops = a.node.fileops();
    ops.create_file("one.txt", b"1".to_vec()).await.unwrap();
    ops.create_file("two.txt", b"22".to_vec()).await.unwrap();

    let entries = ops.liststore().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].filename, "one.txt");
    assert_eq!(entries[0].total_size, 1);
    assert_eq!(entries[1].filename, "two.txt");
    assert_eq!(entries[1].total_size, 2);
    assert!(entries.iter().all(|e| !e.merging));

    // a merge round left hanging shows up in the report until the next
    // round settles it
    assert!(a.node.store().set_merging("one.txt", true).await);
    let entries = ops.liststore().await;
    assert!(entries[0].merging);
    assert!(!entries[1].merging);

    ops.merge_file("one.txt").await.unwrap();
    let cleared = eventually!(4_000, {
        !ops.liststore().await.iter().any(|e| e.merging)
    });
    assert!(cleared, "merge never cleared the in-flight flag");
}
