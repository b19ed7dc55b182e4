// Gossip convergence across gossiper actors on an in-memory network.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use keel_p2p::{
    ClusterConfiguration, GossipConfig, GossipState, GossiperHandle, InMemoryNetwork, MemberId, PartitionState,
};
use keel_scheduler::{ActorScheduler, SchedulerConfig};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

struct Cluster {
    // keeps the workers alive for the duration of the test
    _scheduler: ActorScheduler,
    network: Arc<InMemoryNetwork>,
    nodes: Vec<GossiperHandle>,
}

impl Cluster {
    fn start(ids: &[&str], config: GossipConfig, network: Arc<InMemoryNetwork>) -> Self {
        let scheduler = ActorScheduler::start(SchedulerConfig::with_workers(2)).unwrap();
        let genesis = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let initial = ClusterConfiguration::initial(ids.iter().map(|id| MemberId::from(*id)), genesis);
        let nodes = ids
            .iter()
            .map(|id| {
                let member = MemberId::from(*id);
                let handle = GossiperHandle::start(
                    &scheduler,
                    member.clone(),
                    initial.clone(),
                    config.clone(),
                    network.endpoint(member),
                )
                .unwrap();
                network.register(handle.clone());
                handle
            })
            .collect();
        let cluster = Cluster {
            _scheduler: scheduler,
            network,
            nodes,
        };
        // every node starts out dirty with the same genesis document
        cluster.push_round();
        cluster
    }

    fn node(&self, id: &str) -> &GossiperHandle {
        self.nodes
            .iter()
            .find(|n| n.local_member().as_str() == id)
            .unwrap()
    }

    fn configuration(&self, id: &str) -> ClusterConfiguration {
        self.node(id).configuration().join(WAIT).unwrap().unwrap()
    }

    fn push_round(&self) {
        for node in &self.nodes {
            node.gossip_round().join(WAIT).unwrap().unwrap();
        }
    }

    fn sync_round(&self) {
        for node in &self.nodes {
            node.sync_round().join(WAIT).unwrap().unwrap();
        }
    }

    fn converged(&self) -> bool {
        let first = self.configuration(self.nodes[0].local_member().as_str());
        self.nodes
            .iter()
            .all(|n| self.configuration(n.local_member().as_str()) == first)
    }
}

fn assign_partition_one(node: &GossiperHandle) -> ClusterConfiguration {
    node.update_local_member(|state| state.assign(1, PartitionState::active(1)))
        .join(WAIT)
        .unwrap()
        .unwrap()
}

#[test_log::test]
fn test_three_nodes_converge_on_partition_assignment() {
    let cluster = Cluster::start(&["a", "b", "c"], GossipConfig::manual(2), InMemoryNetwork::new());
    let updated = assign_partition_one(cluster.node("a"));
    assert_eq!(updated.version, 2);

    let mut rounds = 0;
    while !cluster.converged() {
        rounds += 1;
        assert!(rounds <= 5, "no convergence after 5 rounds");
        cluster.push_round();
    }

    let a = MemberId::from("a");
    for id in ["b", "c"] {
        let seen = cluster.configuration(id);
        assert_eq!(seen, updated);
        assert_eq!(seen.version, 2);
        assert_eq!(seen.partition_owners(1), vec![&a]);
        assert_eq!(seen.member(&a).unwrap().version, 2);
    }
}

#[test]
fn test_received_update_is_not_forwarded_in_the_same_step() {
    let cluster = Cluster::start(&["a", "b", "c"], GossipConfig::manual(1), InMemoryNetwork::new());
    assign_partition_one(cluster.node("a"));

    let delivered = cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(delivered, 1);
    let informed = ["b", "c"]
        .iter()
        .filter(|id| cluster.configuration(id).version == 2)
        .count();
    assert_eq!(informed, 1);

    // everyone but the uninformed peer has the update, so one pull fixes it
    cluster.sync_round();
    assert!(cluster.converged());
}

#[test]
fn test_unreachable_peer_is_skipped_and_caught_up_later() {
    let cluster = Cluster::start(&["a", "b", "c"], GossipConfig::manual(2), InMemoryNetwork::new());
    let (a, b) = (MemberId::from("a"), MemberId::from("b"));
    cluster.network.disconnect(&a, &b);
    assign_partition_one(cluster.node("a"));

    let delivered = cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(cluster.configuration("b").version, 1);
    assert_eq!(cluster.configuration("c").version, 2);

    cluster.node("c").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(cluster.configuration("b").version, 2);
    assert!(cluster.converged());
}

#[test]
fn test_round_nobody_accepted_is_retried_by_next_push() {
    let cluster = Cluster::start(&["a", "b"], GossipConfig::manual(1), InMemoryNetwork::new());
    let (a, b) = (MemberId::from("a"), MemberId::from("b"));
    cluster.network.disconnect(&a, &b);
    let updated = assign_partition_one(cluster.node("a"));

    let delivered = cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(delivered, 0);
    assert_eq!(cluster.configuration("b").version, 1);

    cluster.network.reconnect(&a, &b);
    let delivered = cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(cluster.configuration("b"), updated);

    // accepted once, so the document is clean again
    let delivered = cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();
    assert_eq!(delivered, 0);
}

#[test_log::test]
fn test_lossy_network_converges_with_sync() {
    let ids = ["a", "b", "c", "d", "e"];
    let cluster = Cluster::start(&ids, GossipConfig::manual(2), InMemoryNetwork::with_drop_rate(0.3, 7));
    assign_partition_one(cluster.node("a"));
    cluster
        .node("d")
        .update_local_member(|state| state.assign(2, PartitionState::joining(3)))
        .join(WAIT)
        .unwrap()
        .unwrap();

    let mut rounds = 0;
    while !cluster.converged() {
        rounds += 1;
        assert!(rounds <= 100, "no convergence after 100 rounds");
        cluster.push_round();
        cluster.sync_round();
    }

    let merged = cluster.configuration("e");
    // both changes were made against version 1
    assert_eq!(merged.version, 2);
    assert_eq!(merged.partition_owners(1), vec![&MemberId::from("a")]);
    assert_eq!(merged.partition_owners(2), vec![&MemberId::from("d")]);
}

#[test]
fn test_sync_pulls_missing_update() {
    let cluster = Cluster::start(&["a", "b"], GossipConfig::manual(1), InMemoryNetwork::new());
    let updated = assign_partition_one(cluster.node("a"));

    let changed = cluster.node("b").sync_round().join(WAIT).unwrap().unwrap();
    assert!(changed);
    assert_eq!(cluster.configuration("b"), updated);
    let changed = cluster.node("b").sync_round().join(WAIT).unwrap().unwrap();
    assert!(!changed);
}

#[test]
fn test_listener_sees_every_change() {
    let cluster = Cluster::start(&["a", "b"], GossipConfig::manual(1), InMemoryNetwork::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cluster
        .node("b")
        .subscribe(move |configuration| sink.lock().push(configuration.version));

    let updated = assign_partition_one(cluster.node("a"));
    cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();

    // a duplicate delivery changes nothing and notifies nobody
    let duplicate = GossipState::of(&updated).encode().unwrap();
    cluster.node("b").receive_push(duplicate).join(WAIT).unwrap().unwrap();

    cluster.node("a").update_local_member(|_| {}).join(WAIT).unwrap().unwrap();
    cluster.node("a").gossip_round().join(WAIT).unwrap().unwrap();

    assert_eq!(*seen.lock(), vec![2, 3]);
}

#[test]
fn test_garbage_payload_is_dropped() {
    let cluster = Cluster::start(&["a"], GossipConfig::manual(1), InMemoryNetwork::new());
    let before = cluster.configuration("a");
    assert_eq!(cluster.node("a").receive_push(vec![0xde, 0xad]).join(WAIT), Some(Ok(())));
    assert_eq!(cluster.configuration("a"), before);
}

#[test]
fn test_periodic_timers_spread_updates() {
    let config = GossipConfig {
        gossip_interval_ms: 10,
        sync_interval_ms: 40,
        gossip_fanout: 2,
    };
    let cluster = Cluster::start(&["a", "b", "c"], config, InMemoryNetwork::new());
    let updated = assign_partition_one(cluster.node("a"));

    let deadline = Instant::now() + WAIT;
    while cluster.configuration("c") != updated || cluster.configuration("b") != updated {
        assert!(Instant::now() < deadline, "timers never spread the update");
        thread::sleep(Duration::from_millis(10));
    }
    for node in &cluster.nodes {
        assert!(node.close().join(WAIT).is_some());
    }
}
