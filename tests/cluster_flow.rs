// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end coordination tests over real TCP connections.

use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use chunkfleet::engine::{EngineEvent, EngineResult, GenerationEngine, GenerationRequest};
use chunkfleet::network::{Agent, AgentConfig, AgentEvent, Coordinator, CoordinatorConfig};
use chunkfleet::partition::{Assignment, ChunkPlan, Selection};
use chunkfleet::transfer::RegionCoord;
use chunkfleet::{Node, NodeSettings, Role};

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

async fn start_coordinator(host_participates: bool) -> (Coordinator, SocketAddr) {
    let coordinator = Coordinator::new(CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        host_participates,
        ..CoordinatorConfig::default()
    });
    let addr = coordinator.start().await.unwrap();
    (coordinator, addr)
}

async fn connect_agent(addr: SocketAddr, name: &str) -> (Agent, mpsc::UnboundedReceiver<AgentEvent>) {
    let agent = Agent::new(
        AgentConfig::new("127.0.0.1", addr.port())
            .with_hostname(name)
            .with_reconnect_delay(Duration::from_millis(200)),
    );
    let mut events = agent.take_events().unwrap();
    agent.start().await.unwrap();
    loop {
        match next_event(&mut events).await {
            AgentEvent::Registered { .. } => break,
            _ => continue,
        }
    }
    (agent, events)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> AgentEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for agent event")
        .expect("agent event channel closed")
}

/// Skip events until an assignment arrives.
async fn next_assignment(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> (Assignment, bool) {
    loop {
        if let AgentEvent::Assigned { assignment, first } = next_event(events).await {
            return (assignment, first);
        }
    }
}

async fn next_start(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Option<Assignment> {
    loop {
        if let AgentEvent::Start(assignment) = next_event(events).await {
            return assignment;
        }
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached");
}

/// Every region is owned by exactly one of the assignments.
fn assert_exact_cover(selection: &Selection, assignments: &[Assignment]) {
    let full = ChunkPlan::build(selection, 0, 1).regions;
    let mut seen: BTreeSet<RegionCoord> = BTreeSet::new();
    for assignment in assignments {
        let plan = ChunkPlan::build(selection, assignment.instance_index, assignment.total_instances());
        for region in plan.regions {
            assert!(seen.insert(region), "region {} owned twice", region);
        }
    }
    assert_eq!(seen, full);
}

// ============================================================================
// Coordinator + agents
// ============================================================================

#[tokio::test]
async fn test_late_joiner_triggers_redistribution() {
    let (coordinator, addr) = start_coordinator(false).await;
    let (_a, mut a_events) = connect_agent(addr, "alpha").await;
    let (_b, mut b_events) = connect_agent(addr, "beta").await;

    let selection = Selection::new("world", 0.0, 0.0, 1024.0);
    assert!(coordinator.broadcast_start(selection.clone()).await.is_none());

    let (a1, first) = next_assignment(&mut a_events).await;
    assert!(first);
    let (b1, _) = next_assignment(&mut b_events).await;
    assert_eq!(a1.total_instances(), 2);
    assert_eq!(next_start(&mut a_events).await, Some(a1.clone()));
    assert_eq!(next_start(&mut b_events).await, Some(b1.clone()));
    assert_exact_cover(&selection, &[a1.clone(), b1.clone()]);

    let (_c, mut c_events) = connect_agent(addr, "gamma").await;

    let (a2, first) = next_assignment(&mut a_events).await;
    assert!(!first);
    let (b2, _) = next_assignment(&mut b_events).await;
    let (c2, _) = next_assignment(&mut c_events).await;
    for assignment in [&a2, &b2, &c2] {
        assert_eq!(assignment.total_instances(), 3);
    }
    let indices: HashSet<u32> = [&a2, &b2, &c2].iter().map(|a| a.instance_index).collect();
    assert_eq!(indices, HashSet::from([0, 1, 2]));
    assert!(a2.partition.version > a1.partition.version);

    // The late joiner is told to start because the workload is active.
    assert_eq!(next_start(&mut c_events).await, Some(c2.clone()));

    // Each running instance's share shrinks.
    let before = ChunkPlan::build(&selection, a1.instance_index, 2).regions.len();
    let after = ChunkPlan::build(&selection, a2.instance_index, 3).regions.len();
    assert!(after < before);
    assert_exact_cover(&selection, &[a2, b2, c2]);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_participating_host_reserves_index_zero() {
    let (coordinator, addr) = start_coordinator(true).await;
    let (_a, mut a_events) = connect_agent(addr, "alpha").await;
    let (_b, mut b_events) = connect_agent(addr, "beta").await;

    let selection = Selection::new("world", 0.0, 0.0, 512.0);
    let host = coordinator.broadcast_start(selection.clone()).await.unwrap();
    assert_eq!(host.instance_index, 0);
    assert_eq!(host.total_instances(), 3);

    let (a1, _) = next_assignment(&mut a_events).await;
    let (b1, _) = next_assignment(&mut b_events).await;
    assert_ne!(a1.instance_index, 0);
    assert_ne!(b1.instance_index, 0);

    let (_c, mut c_events) = connect_agent(addr, "gamma").await;
    let (a2, _) = next_assignment(&mut a_events).await;
    let (b2, _) = next_assignment(&mut b_events).await;
    let (c2, _) = next_assignment(&mut c_events).await;
    assert_eq!(c2.total_instances(), 4);

    let host = coordinator.host_assignment().await.unwrap();
    assert_eq!(host.total_instances(), 4);
    assert_exact_cover(&selection, &[host, a2, b2, c2]);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_disconnect_reassigns_remaining_peers() {
    let (coordinator, addr) = start_coordinator(false).await;
    let (a, mut a_events) = connect_agent(addr, "alpha").await;
    let (_b, mut b_events) = connect_agent(addr, "beta").await;

    coordinator
        .broadcast_start(Selection::new("world", 0.0, 0.0, 256.0))
        .await;
    next_assignment(&mut a_events).await;
    next_assignment(&mut b_events).await;

    a.stop();
    let (b2, first) = next_assignment(&mut b_events).await;
    assert!(!first);
    assert_eq!(b2.total_instances(), 1);
    assert_eq!(b2.instance_index, 0);

    let watched = coordinator.clone();
    eventually(|| {
        let watched = watched.clone();
        async move { watched.peer_count().await == 1 }
    })
    .await;

    coordinator.stop().await;
}

#[tokio::test]
async fn test_worker_reports_reach_aggregate() {
    let (coordinator, addr) = start_coordinator(false).await;
    let (agent, mut events) = connect_agent(addr, "alpha").await;

    coordinator
        .broadcast_start(Selection::new("world", 0.0, 0.0, 256.0))
        .await;
    next_assignment(&mut events).await;

    assert!(agent.send_progress(50, 200, 12.5));
    assert!(agent.send_transfer_progress(1, 4, 1024, 4096));

    let watched = coordinator.clone();
    eventually(|| {
        let watched = watched.clone();
        async move { watched.aggregate().await.chunks_generated == 50 }
    })
    .await;

    let aggregate = coordinator.aggregate().await;
    assert_eq!(aggregate.total_chunks, 200);
    assert_eq!(aggregate.active_peers, 1);
    assert_eq!(aggregate.instances[0].hostname, "alpha");
    assert!(aggregate.render().contains("alpha"));

    let peers = coordinator.peers().await;
    assert_eq!(peers[0].transfer_total, 4);
    assert_eq!(peers[0].bytes_transferred, 1024);

    coordinator.stop().await;
}

// ============================================================================
// Nodes
// ============================================================================

/// Engine double that records requests and runs until cancelled.
struct RecordingEngine {
    running: tokio::sync::Mutex<HashSet<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
    events: broadcast::Sender<EngineEvent>,
}

impl RecordingEngine {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            running: tokio::sync::Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            events,
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationEngine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self, request: GenerationRequest) -> EngineResult<()> {
        self.running.lock().await.insert(request.world.clone());
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    async fn is_running(&self, world: &str) -> bool {
        self.running.lock().await.contains(world)
    }

    async fn cancel(&self, world: &str) -> bool {
        let removed = self.running.lock().await.remove(world);
        if removed {
            let _ = self.events.send(EngineEvent::Cancelled { world: world.to_string() });
        }
        removed
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

async fn worker_node(addr: SocketAddr, name: &str, temp: &TempDir) -> (Node, Arc<RecordingEngine>) {
    let engine = RecordingEngine::new();
    let config = AgentConfig::new("127.0.0.1", addr.port())
        .with_hostname(name)
        .with_reconnect_delay(Duration::from_millis(200));
    let dyn_engine: Arc<dyn GenerationEngine> = engine.clone();
    let node = Node::initialize(
        Role::Worker(config),
        NodeSettings {
            chunk_list_dir: temp.path().join(name),
        },
        Some(dyn_engine),
        None,
    )
    .unwrap();
    node.start().await.unwrap();
    let agent = node.agent().unwrap().clone();
    eventually(|| {
        let agent = agent.clone();
        async move { agent.assigned_id().is_some() }
    })
    .await;
    (node, engine)
}

#[tokio::test]
async fn test_worker_nodes_restart_on_reassignment() {
    let temp = TempDir::new().unwrap();
    let host_engine: Arc<dyn GenerationEngine> = RecordingEngine::new();
    let host = Node::initialize(
        Role::Host(CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..CoordinatorConfig::default()
        }),
        NodeSettings {
            chunk_list_dir: temp.path().join("host"),
        },
        Some(host_engine),
        None,
    )
    .unwrap();
    host.start().await.unwrap();
    let addr = host.coordinator().unwrap().local_addr().await.unwrap();

    let (w1, e1) = worker_node(addr, "alpha", &temp).await;
    let (w2, e2) = worker_node(addr, "beta", &temp).await;

    host.start_generation(Some(Selection::new("world", 0.0, 0.0, 1024.0)))
        .await
        .unwrap();

    for engine in [&e1, &e2] {
        let engine = engine.clone();
        eventually(|| {
            let engine = engine.clone();
            async move { engine.requests().len() == 1 }
        })
        .await;
    }
    let selectors: HashSet<String> = [&e1, &e2].iter().map(|e| e.requests()[0].selector.clone()).collect();
    assert_eq!(
        selectors,
        HashSet::from(["csv=chunkfleet_0".to_string(), "csv=chunkfleet_1".to_string()])
    );

    let (w3, e3) = worker_node(addr, "gamma", &temp).await;

    for engine in [&e1, &e2] {
        let engine = engine.clone();
        eventually(|| {
            let engine = engine.clone();
            async move { engine.requests().len() == 2 }
        })
        .await;
    }
    let engine = e3.clone();
    eventually(|| {
        let engine = engine.clone();
        async move { engine.requests().len() == 1 }
    })
    .await;

    for node in [&w1, &w2, &w3] {
        let assignment = node.current_assignment().await.unwrap();
        assert_eq!(assignment.total_instances(), 3);
    }
    // Same chunks, now split three ways.
    let before: u64 = [&e1, &e2].iter().map(|e| e.requests()[0].total_chunks).sum();
    let after: u64 = [&e1, &e2, &e3]
        .iter()
        .map(|e| e.requests().last().unwrap().total_chunks)
        .sum();
    assert_eq!(before, after);
    assert!(e1.requests()[1].total_chunks < before);

    host.stop_generation().await;
    for engine in [&e1, &e2, &e3] {
        let engine = engine.clone();
        eventually(|| {
            let engine = engine.clone();
            async move { !engine.is_running("world").await }
        })
        .await;
    }

    for node in [w1, w2, w3, host] {
        node.shutdown().await;
    }
}
