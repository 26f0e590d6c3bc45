//! Integration tests for topology change notification.
//!
//! Listeners fire exactly once per membership transition on the node that
//! installs the view: the initial join, every join and leave observed
//! afterwards, and a coordinator handover with the changed flag set.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conclave::prelude::*;

fn test_config(name: &str, seeds: Vec<std::net::SocketAddr>) -> RpcConfig {
    RpcConfig {
        cluster_name: name.to_string(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        seeds,
        default_timeout: Duration::from_secs(5),
        retry_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(100),
        failure_threshold: 3,
        startup_grace_period: Duration::from_millis(200),
        ..RpcConfig::default()
    }
}

#[derive(Default)]
struct Recording {
    events: Mutex<Vec<TopologyChangeEvent>>,
}

impl Recording {
    fn snapshot(&self) -> Vec<TopologyChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl TopologyChangeListener for Recording {
    fn on_change(&self, event: &TopologyChangeEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

async fn wait_for_count(recording: &Recording, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while recording.count() < count {
        assert!(
            Instant::now() < deadline,
            "expected {count} events, got {} in time",
            recording.count()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Initial join
// ============================================================================

#[tokio::test]
async fn test_first_node_alone_gets_coordinator_event() {
    let recording = Arc::new(Recording::default());
    let service = RpcService::new(test_config("topo-first", vec![])).unwrap();
    service.add_topology_listener(recording.clone());

    service.start().await.unwrap();

    let events = recording.snapshot();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_coordinator());
    assert!(!events[0].coordinator_has_changed());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_joiner_gets_initial_event_without_coordinator_flag() {
    let founder = RpcService::new(test_config("topo-join", vec![])).unwrap();
    founder.start().await.unwrap();
    let seed = founder.local_member().unwrap().addr;

    let recording = Arc::new(Recording::default());
    let joiner = RpcService::new(test_config("topo-join", vec![seed])).unwrap();
    joiner.add_topology_listener(recording.clone());
    joiner.start().await.unwrap();

    let events = recording.snapshot();
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_coordinator());
    assert!(!events[0].coordinator_has_changed());

    joiner.stop().await.unwrap();
    founder.stop().await.unwrap();
}

// ============================================================================
// One event per transition, in order
// ============================================================================

#[tokio::test]
async fn test_every_transition_fires_exactly_once() {
    let recording = Arc::new(Recording::default());
    let founder = RpcService::new(test_config("topo-seq", vec![])).unwrap();
    founder.add_topology_listener(recording.clone());
    founder.start().await.unwrap();
    let seed = founder.local_member().unwrap().addr;

    // The coordinator installs the join synchronously while admitting the
    // member, so the second event exists once start() returns.
    let joiner = RpcService::new(test_config("topo-seq", vec![seed])).unwrap();
    joiner.start().await.unwrap();
    assert_eq!(recording.count(), 2);

    joiner.stop().await.unwrap();
    wait_for_count(&recording, 3).await;

    let events = recording.snapshot();
    assert_eq!(events.len(), 3);
    // The founder coordinates throughout; the coordinator never changed.
    for event in &events {
        assert!(event.is_coordinator());
        assert!(!event.coordinator_has_changed());
    }

    founder.stop().await.unwrap();
}

#[tokio::test]
async fn test_coordinator_leave_sets_changed_flag_on_survivor() {
    let founder = RpcService::new(test_config("topo-handover", vec![])).unwrap();
    founder.start().await.unwrap();
    let seed = founder.local_member().unwrap().addr;

    let recording = Arc::new(Recording::default());
    let survivor = RpcService::new(test_config("topo-handover", vec![seed])).unwrap();
    survivor.add_topology_listener(recording.clone());
    survivor.start().await.unwrap();
    assert_eq!(recording.count(), 1);

    founder.stop().await.unwrap();
    wait_for_count(&recording, 2).await;

    let events = recording.snapshot();
    assert!(events[1].coordinator_has_changed());
    assert!(events[1].is_coordinator());
    assert!(survivor.is_coordinator().unwrap());

    survivor.stop().await.unwrap();
}

// ============================================================================
// Registration semantics
// ============================================================================

#[tokio::test]
async fn test_late_listener_sees_no_replay() {
    let founder = RpcService::new(test_config("topo-late", vec![])).unwrap();
    founder.start().await.unwrap();

    let recording = Arc::new(Recording::default());
    founder.add_topology_listener(recording.clone());
    assert_eq!(recording.count(), 0);

    let seed = founder.local_member().unwrap().addr;
    let joiner = RpcService::new(test_config("topo-late", vec![seed])).unwrap();
    joiner.start().await.unwrap();
    assert_eq!(recording.count(), 1);

    joiner.stop().await.unwrap();
    founder.stop().await.unwrap();
}

#[tokio::test]
async fn test_removed_listener_stops_receiving() {
    let recording = Arc::new(Recording::default());
    let listener: Arc<dyn TopologyChangeListener> = recording.clone();

    let founder = RpcService::new(test_config("topo-remove", vec![])).unwrap();
    founder.add_topology_listener(listener.clone());
    founder.start().await.unwrap();
    assert_eq!(recording.count(), 1);

    founder.remove_topology_listener(&listener);

    let seed = founder.local_member().unwrap().addr;
    let joiner = RpcService::new(test_config("topo-remove", vec![seed])).unwrap();
    joiner.start().await.unwrap();
    assert_eq!(recording.count(), 1);

    joiner.stop().await.unwrap();
    founder.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
    struct Panicking;
    impl TopologyChangeListener for Panicking {
        fn on_change(&self, _event: &TopologyChangeEvent) {
            panic!("listener bug");
        }
    }

    let recording = Arc::new(Recording::default());
    let service = RpcService::new(test_config("topo-panic", vec![])).unwrap();
    service.add_topology_listener(Arc::new(Panicking));
    service.add_topology_listener(recording.clone());

    service.start().await.unwrap();
    assert_eq!(recording.count(), 1);
    // The view survived the listener panic.
    assert!(service.is_coordinator().unwrap());

    service.stop().await.unwrap();
}
