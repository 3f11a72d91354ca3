// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Role wiring for a single process.
//!
//! A [`Node`] ties the generation engine to the coordination layer and the
//! transfer pipeline. It owns the background tasks that forward engine
//! progress to the host, react to assignments and report transfer state.
//!
//! ```text
//!   engine events ──► progress ──► coordinator (host) / agent (worker)
//!                 └─► completed ──► generation_complete + transfer queue
//!
//!   agent events ──► assignment / start / stop ──► engine
//!
//!   transfer summaries ──► transfer_progress ──► transfer_complete | transfer_failed
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, GenerationEngine, GenerationRequest};
use crate::error::{NodeError, NodeResult};
use crate::network::{
    Agent, AgentConfig, AgentEvent, Coordinator, CoordinatorConfig, CoordinatorEvent, LocalProgress,
    NetError,
};
use crate::partition::{chunk_list_pattern, Assignment, ChunkPlan, PartitionDescriptor, Selection};
use crate::transfer::{RegionCoord, TransferManager, TransferSummary, DEFAULT_WORLD};

/// How long a restart waits for the previous engine task to wind down.
const RESTART_TIMEOUT: Duration = Duration::from_secs(30);
const RESTART_POLL: Duration = Duration::from_millis(50);

/// What this process does in the cluster.
#[derive(Debug, Clone)]
pub enum Role {
    /// Runs the coordinator and optionally generates as instance 0.
    Host(CoordinatorConfig),
    /// Connects to a host and generates its assigned share.
    Worker(AgentConfig),
    /// Generates the whole selection alone.
    Standalone,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Host(_) => "host",
            Role::Worker(_) => "worker",
            Role::Standalone => "standalone",
        }
    }
}

/// Node settings that do not depend on the role.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Where chunk lists are written for the engine.
    pub chunk_list_dir: PathBuf,
}

/// The generation task this node is running or last ran.
#[derive(Debug, Clone)]
struct LocalRun {
    assignment: Assignment,
    total_chunks: u64,
    regions: BTreeSet<RegionCoord>,
}

impl LocalRun {
    fn world(&self) -> &str {
        self.assignment.world()
    }
}

struct Shared {
    role: &'static str,
    coordinator: Option<Coordinator>,
    agent: Option<Agent>,
    engine: Arc<dyn GenerationEngine>,
    transfer: Option<TransferManager>,
    settings: NodeSettings,
    current: RwLock<Option<LocalRun>>,
    progress: RwLock<Option<LocalProgress>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// A host, worker or standalone process. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    shared: Arc<Shared>,
}

impl Node {
    /// Build a node. Fails when no generation engine is available.
    ///
    /// The transfer manager is only used by workers and standalone nodes.
    pub fn initialize(
        role: Role,
        settings: NodeSettings,
        engine: Option<Arc<dyn GenerationEngine>>,
        transfer: Option<TransferManager>,
    ) -> NodeResult<Self> {
        let engine = engine.ok_or(NodeError::EngineUnavailable)?;
        let name = role.name();

        let (coordinator, agent) = match role {
            Role::Host(config) => (Some(Coordinator::new(config)), None),
            Role::Worker(config) => (None, Some(Agent::new(config))),
            Role::Standalone => (None, None),
        };

        let transfer = match transfer {
            Some(_) if coordinator.is_some() => {
                info!("Transfers run on workers; ignoring transfer settings on the host");
                None
            }
            other => other,
        };

        info!(role = name, engine = engine.name(), transfers = transfer.is_some(), "Node initialized");
        Ok(Self {
            shared: Arc::new(Shared {
                role: name,
                coordinator,
                agent,
                engine,
                transfer,
                settings,
                current: RwLock::new(None),
                progress: RwLock::new(None),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn role(&self) -> &'static str {
        self.shared.role
    }

    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.shared.coordinator.as_ref()
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.shared.agent.as_ref()
    }

    /// The transfer manager, if transfers are enabled on this node.
    pub fn transfers(&self) -> NodeResult<&TransferManager> {
        self.shared.transfer.as_ref().ok_or(NodeError::TransfersDisabled)
    }

    /// Start networking and the background pumps.
    pub async fn start(&self) -> NodeResult<()> {
        self.spawn(Self::engine_pump(self.clone(), self.shared.engine.subscribe()));

        if let Some(coordinator) = &self.shared.coordinator {
            let events = coordinator.subscribe();
            let addr = coordinator.start().await?;
            info!("Coordinator listening on {}", addr);
            self.spawn(Self::coordinator_pump(self.clone(), events));
        }

        if let Some(agent) = &self.shared.agent {
            if let Some(events) = agent.take_events() {
                self.spawn(Self::agent_pump(self.clone(), events));
            }
            match agent.start().await {
                Ok(()) => {}
                Err(NetError::AlreadyRunning) => return Err(NetError::AlreadyRunning.into()),
                Err(e) => warn!("Initial connection failed, will retry: {}", e),
            }
        }

        if let Some(transfer) = &self.shared.transfer {
            self.spawn(Self::transfer_pump(self.clone(), transfer.subscribe()));
        }
        Ok(())
    }

    /// Stop networking, cancel local work and end the pumps.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        if let Some(coordinator) = &self.shared.coordinator {
            coordinator.stop().await;
        }
        if let Some(agent) = &self.shared.agent {
            agent.stop();
        }
        self.cancel_local().await;
        if let Some(transfer) = &self.shared.transfer {
            transfer.cancel();
            transfer.wait().await;
        }
        let tasks: Vec<_> = lock(&self.shared.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        info!(role = self.shared.role, "Node stopped");
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        lock(&self.shared.tasks).push(tokio::spawn(future));
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Begin a generation run.
    ///
    /// A host broadcasts the selection and generates its own share when it
    /// participates. A worker uses its last assignment and ignores
    /// `selection`. A standalone node generates the whole selection.
    pub async fn start_generation(&self, selection: Option<Selection>) -> NodeResult<()> {
        if let Some(coordinator) = &self.shared.coordinator {
            let selection = selection.ok_or(NodeError::NoSelection)?;
            if let Some(assignment) = coordinator.broadcast_start(selection).await {
                self.run_local(assignment).await?;
            }
            return Ok(());
        }

        if let Some(agent) = &self.shared.agent {
            let assignment = agent.current_assignment().ok_or(NodeError::NoAssignment)?;
            self.run_local(assignment).await?;
            return Ok(());
        }

        let selection = selection.ok_or(NodeError::NoSelection)?;
        let assignment = Assignment::new(0, PartitionDescriptor::new(&selection, 1, 1));
        self.run_local(assignment).await?;
        Ok(())
    }

    /// Abort the run. A host also tells every worker to stop.
    pub async fn stop_generation(&self) {
        if let Some(coordinator) = &self.shared.coordinator {
            coordinator.broadcast_stop().await;
            coordinator.clear_local_progress().await;
        }
        self.cancel_local().await;
    }

    /// Generate one assignment on this machine.
    ///
    /// Returns false when the assignment owns no chunks, in which case the
    /// engine is not started.
    pub async fn run_local(&self, assignment: Assignment) -> NodeResult<bool> {
        let world = assignment.world().to_string();
        if self.shared.engine.is_running(&world).await {
            return Err(NodeError::AlreadyRunning(world));
        }

        let selection = assignment.partition.selection();
        let index = assignment.instance_index;
        let total = assignment.total_instances();
        let dir = self.shared.settings.chunk_list_dir.clone();
        let plan_selection = selection.clone();
        let (plan, chunk_list) = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let plan = ChunkPlan::build(&plan_selection, index, total);
            let path = if plan.chunk_count > 0 {
                Some(plan.write_chunk_list(&dir)?)
            } else {
                None
            };
            Ok((plan, path))
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

        let Some(chunk_list) = chunk_list else {
            info!(world = %world, index, total, "No chunks assigned to this instance");
            *self.shared.current.write().await = None;
            return Ok(false);
        };

        let request = GenerationRequest::new(&selection, &plan, chunk_list_pattern(&chunk_list), chunk_list);
        *self.shared.current.write().await = Some(LocalRun {
            assignment,
            total_chunks: plan.chunk_count,
            regions: plan.regions,
        });
        *self.shared.progress.write().await = None;

        info!(
            world = %world,
            index,
            total,
            chunks = plan.chunk_count,
            "Starting local generation"
        );
        if let Err(e) = self.shared.engine.start(request).await {
            *self.shared.current.write().await = None;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Cancel the local engine task, if one is running.
    pub async fn cancel_local(&self) -> bool {
        let world = match self.shared.current.read().await.as_ref() {
            Some(run) => run.world().to_string(),
            None => return false,
        };
        self.shared.engine.cancel(&world).await
    }

    /// The assignment of the current or last local run.
    pub async fn current_assignment(&self) -> Option<Assignment> {
        self.shared.current.read().await.as_ref().map(|run| run.assignment.clone())
    }

    /// Last progress reported by the local engine.
    pub async fn local_progress(&self) -> Option<LocalProgress> {
        self.shared.progress.read().await.clone()
    }

    /// Restart the local run under a new assignment if it differs from
    /// the one the engine is running.
    async fn reassign(&self, assignment: Assignment) -> NodeResult<()> {
        let current = self.shared.current.read().await.clone();
        let Some(run) = current else {
            return Ok(());
        };
        if !self.shared.engine.is_running(run.world()).await {
            return Ok(());
        }
        if run.assignment.instance_index == assignment.instance_index
            && run.assignment.partition.same_split(&assignment.partition)
        {
            debug!("Assignment unchanged; continuing");
            return Ok(());
        }

        info!(
            world = %run.world(),
            index = assignment.instance_index,
            total = assignment.total_instances(),
            "Partition changed; restarting local generation"
        );
        self.shared.engine.cancel(run.world()).await;
        let deadline = tokio::time::Instant::now() + RESTART_TIMEOUT;
        while self.shared.engine.is_running(run.world()).await {
            if tokio::time::Instant::now() >= deadline {
                warn!(world = %run.world(), "Engine did not stop; keeping old partition");
                return Err(NodeError::AlreadyRunning(run.world().to_string()));
            }
            tokio::time::sleep(RESTART_POLL).await;
        }
        self.run_local(assignment).await.map(|_| ())
    }

    // ========================================================================
    // Pumps
    // ========================================================================

    async fn engine_pump(self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => self.on_engine_event(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Skipped {} engine events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_engine_event(&self, event: EngineEvent) {
        let run = self.shared.current.read().await.clone();
        let Some(run) = run.filter(|run| run.world() == event.world()) else {
            debug!(world = %event.world(), "Ignoring event for another world");
            return;
        };

        match event {
            EngineEvent::Progress {
                world,
                chunks_generated,
                total_chunks,
                percent,
                rate,
            } => {
                let progress = LocalProgress {
                    world,
                    chunks_generated,
                    total_chunks,
                    percent_complete: percent,
                    chunks_per_second: rate,
                };
                *self.shared.progress.write().await = Some(progress.clone());
                if let Some(coordinator) = &self.shared.coordinator {
                    coordinator.update_local_progress(progress).await;
                } else if let Some(agent) = &self.shared.agent {
                    agent.send_progress(chunks_generated, total_chunks, rate);
                }
            }
            EngineEvent::Completed { world } => {
                let region_count = run.regions.len() as u32;
                info!(world = %world, regions = region_count, "Local generation complete");
                if let Some(coordinator) = &self.shared.coordinator {
                    coordinator
                        .update_local_progress(LocalProgress {
                            world: world.clone(),
                            chunks_generated: run.total_chunks,
                            total_chunks: run.total_chunks,
                            percent_complete: 100.0,
                            chunks_per_second: 0.0,
                        })
                        .await;
                }
                if let Some(agent) = &self.shared.agent {
                    agent.send_generation_complete(region_count);
                }
                if let Some(transfer) = &self.shared.transfer {
                    if let Err(e) = transfer.on_generation_complete(&world, run.regions.iter().copied()) {
                        warn!(world = %world, "Failed to queue regions for transfer: {}", e);
                    }
                }
            }
            EngineEvent::Cancelled { world } => {
                info!(world = %world, "Local generation cancelled");
            }
            EngineEvent::Failed { world, error } => {
                warn!(world = %world, "Local generation failed: {}", error);
            }
        }
    }

    async fn coordinator_pump(self, mut events: broadcast::Receiver<CoordinatorEvent>) {
        let Some(coordinator) = self.shared.coordinator.clone() else {
            return;
        };
        loop {
            let event = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(CoordinatorEvent::Redistributed { .. }) => {
                    if !coordinator.is_workload_active().await {
                        continue;
                    }
                    if let Some(assignment) = coordinator.host_assignment().await {
                        if let Err(e) = self.reassign(assignment).await {
                            warn!("Host restart failed: {}", e);
                        }
                    }
                }
                Ok(CoordinatorEvent::PeerJoined { worker_id, hostname }) => {
                    debug!(worker_id, hostname = %hostname, "Peer joined");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Skipped {} coordinator events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn agent_pump(self, mut events: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            match event {
                AgentEvent::Assigned { assignment, first } => {
                    debug!(index = assignment.instance_index, first, "Assignment received");
                    if let Err(e) = self.reassign(assignment).await {
                        warn!("Restart after reassignment failed: {}", e);
                    }
                }
                AgentEvent::Start(Some(assignment)) => match self.run_local(assignment).await {
                    Ok(_) => {}
                    Err(NodeError::AlreadyRunning(world)) => {
                        warn!(world = %world, "Start ignored; generation already running");
                    }
                    Err(e) => warn!("Failed to start generation: {}", e),
                },
                AgentEvent::Start(None) => {
                    warn!("Start received before any assignment");
                }
                AgentEvent::Stop => {
                    if self.cancel_local().await {
                        info!("Generation stopped by host");
                    }
                }
                AgentEvent::Connected | AgentEvent::Registered { .. } | AgentEvent::Disconnected => {}
            }
        }
    }

    async fn transfer_pump(self, mut summaries: broadcast::Receiver<TransferSummary>) {
        let Some(transfer) = self.shared.transfer.clone() else {
            return;
        };
        loop {
            let summary = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                summary = summaries.recv() => summary,
            };
            let summary = match summary {
                Ok(summary) => summary,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if let Some(agent) = &self.shared.agent {
                agent.send_transfer_progress(
                    summary.completed,
                    summary.total_regions,
                    summary.bytes_transferred,
                    summary.total_bytes,
                );
            }

            if transfer.is_running() || summary.is_empty() {
                continue;
            }
            let world = transfer.world_name().unwrap_or_else(|| DEFAULT_WORLD.to_string());
            if !summary.is_complete() {
                // Only a run that could not reach the destination stops
                // with work left and no cancel.
                if let (Some(error), Some(agent)) = (transfer.last_error(), &self.shared.agent) {
                    agent.send_transfer_failed(&world, &error, summary.pending + summary.failed);
                }
                continue;
            }
            if summary.failed == 0 {
                info!(world = %world, regions = summary.completed, "All transfers complete");
                if let Some(agent) = &self.shared.agent {
                    agent.send_transfer_complete(&world, summary.completed);
                }
            } else {
                let error = format!("{} transfers failed", summary.failed);
                warn!(world = %world, "{}", error);
                if let Some(agent) = &self.shared.agent {
                    agent.send_transfer_failed(&world, &error, summary.failed);
                }
            }
        }
    }

    /// One-line or multi-line status for operators.
    pub async fn status_text(&self) -> String {
        if let Some(coordinator) = &self.shared.coordinator {
            return coordinator.aggregate().await.render();
        }
        let mut out = match self.local_progress().await {
            Some(p) => format!(
                "{}: {}/{} chunks ({:.1}%), {:.1} c/s",
                p.world, p.chunks_generated, p.total_chunks, p.percent_complete, p.chunks_per_second
            ),
            None => "Idle".to_string(),
        };
        if let Some(agent) = &self.shared.agent {
            if !agent.is_connected() {
                out.push_str(" [disconnected]");
            }
        }
        if let Some(transfer) = &self.shared.transfer {
            out.push_str(&format!("\n{}", transfer.status()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineResult;
    use crate::transfer::{
        Auth, Credentials, DirectoryBackend, RetryPolicy, TransferOptions, TransferStatus,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Engine double that only records requests.
    struct MockEngine {
        running: tokio::sync::Mutex<HashSet<String>>,
        started: Mutex<Vec<GenerationRequest>>,
        events: broadcast::Sender<EngineEvent>,
    }

    impl MockEngine {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                running: tokio::sync::Mutex::new(HashSet::new()),
                started: Mutex::new(Vec::new()),
                events,
            })
        }

        fn started(&self) -> Vec<GenerationRequest> {
            lock(&self.started).clone()
        }

        async fn finish(&self, world: &str) {
            self.running.lock().await.remove(world);
            let _ = self.events.send(EngineEvent::Completed { world: world.to_string() });
        }
    }

    #[async_trait]
    impl GenerationEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        async fn start(&self, request: GenerationRequest) -> EngineResult<()> {
            self.running.lock().await.insert(request.world.clone());
            lock(&self.started).push(request);
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

    fn as_engine(engine: &Arc<MockEngine>) -> Option<Arc<dyn GenerationEngine>> {
        Some(engine.clone())
    }

    fn settings(temp: &TempDir) -> NodeSettings {
        NodeSettings {
            chunk_list_dir: temp.path().join("lists"),
        }
    }

    fn transfer_manager(temp: &TempDir) -> TransferManager {
        let options = TransferOptions {
            data_dir: temp.path().join("data"),
            world_root: temp.path().join("worlds"),
            remote_path: "/{world}".to_string(),
            credentials: Credentials {
                hostname: "localhost".to_string(),
                port: 22,
                username: "mc".to_string(),
                auth: Auth::Password("pw".to_string()),
            },
            retry: RetryPolicy::new(3),
            compression_level: 3,
            auto_transfer: false,
            settle_interval: Duration::from_millis(1),
        };
        let backend = Arc::new(DirectoryBackend::new(temp.path().join("remote")));
        TransferManager::new(options, backend).unwrap()
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_missing_engine_is_fatal() {
        let temp = TempDir::new().unwrap();
        let result = Node::initialize(Role::Standalone, settings(&temp), None, None);
        assert!(matches!(result, Err(NodeError::EngineUnavailable)));
    }

    #[tokio::test]
    async fn test_standalone_generates_everything() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&engine), None).unwrap();

        node.start_generation(Some(Selection::new("world", 0.0, 0.0, 64.0))).await.unwrap();

        let started = engine.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].selector, "csv=chunkfleet_0");
        assert!(started[0].chunk_list.exists());
        let assignment = node.current_assignment().await.unwrap();
        assert_eq!(assignment.instance_index, 0);
        assert_eq!(assignment.total_instances(), 1);
    }

    #[tokio::test]
    async fn test_start_refused_while_running() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&engine), None).unwrap();
        let selection = Selection::new("world", 0.0, 0.0, 32.0);

        node.start_generation(Some(selection.clone())).await.unwrap();
        let second = node.start_generation(Some(selection)).await;
        assert!(matches!(second, Err(NodeError::AlreadyRunning(ref w)) if w == "world"));
        assert_eq!(engine.started().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_share_does_not_start_engine() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&engine), None).unwrap();

        let selection = Selection::new("world", 0.0, 0.0, 16.0);
        let assignment = Assignment::new(99, PartitionDescriptor::new(&selection, 100, 1));
        assert!(!node.run_local(assignment).await.unwrap());
        assert!(engine.started().is_empty());
    }

    #[tokio::test]
    async fn test_standalone_requires_selection() {
        let temp = TempDir::new().unwrap();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&MockEngine::new()), None).unwrap();
        assert!(matches!(node.start_generation(None).await, Err(NodeError::NoSelection)));
    }

    #[tokio::test]
    async fn test_completion_queues_owned_regions() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let node = Node::initialize(
            Role::Standalone,
            settings(&temp),
            as_engine(&engine),
            Some(transfer_manager(&temp)),
        )
        .unwrap();
        node.start().await.unwrap();

        let selection = Selection::new("world", 0.0, 0.0, 64.0);
        node.start_generation(Some(selection.clone())).await.unwrap();
        engine.finish("world").await;

        let expected = ChunkPlan::build(&selection, 0, 1).regions.len() as u32;
        let transfers = node.transfers().unwrap().clone();
        eventually(|| {
            let transfers = transfers.clone();
            async move { transfers.status().total_regions == expected }
        })
        .await;
        assert!(transfers
            .records()
            .iter()
            .all(|r| r.status() == TransferStatus::Pending));
        assert_eq!(transfers.world_name().as_deref(), Some("world"));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_transfers_disabled_without_manager() {
        let temp = TempDir::new().unwrap();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&MockEngine::new()), None).unwrap();
        assert!(matches!(node.transfers(), Err(NodeError::TransfersDisabled)));
    }

    #[tokio::test]
    async fn test_host_ignores_transfer_manager() {
        let temp = TempDir::new().unwrap();
        let config = CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..CoordinatorConfig::default()
        };
        let node = Node::initialize(
            Role::Host(config),
            settings(&temp),
            as_engine(&MockEngine::new()),
            Some(transfer_manager(&temp)),
        )
        .unwrap();
        assert!(node.transfers().is_err());
        assert_eq!(node.role(), "host");
    }

    #[tokio::test]
    async fn test_participating_host_generates_as_index_zero() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let config = CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            host_participates: true,
            ..CoordinatorConfig::default()
        };
        let node = Node::initialize(Role::Host(config), settings(&temp), as_engine(&engine), None).unwrap();
        node.start().await.unwrap();

        node.start_generation(Some(Selection::new("world", 0.0, 0.0, 32.0)))
            .await
            .unwrap();

        let started = engine.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].selector, "csv=chunkfleet_0");
        assert!(node.coordinator().unwrap().is_workload_active().await);

        node.stop_generation().await;
        assert!(!node.coordinator().unwrap().is_workload_active().await);
        assert!(!engine.is_running("world").await);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_participating_host_only_broadcasts() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let config = CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..CoordinatorConfig::default()
        };
        let node = Node::initialize(Role::Host(config), settings(&temp), as_engine(&engine), None).unwrap();
        node.start().await.unwrap();

        node.start_generation(Some(Selection::new("world", 0.0, 0.0, 32.0)))
            .await
            .unwrap();
        assert!(engine.started().is_empty());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_recorded_for_current_world_only() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let node = Node::initialize(Role::Standalone, settings(&temp), as_engine(&engine), None).unwrap();
        node.start().await.unwrap();
        node.start_generation(Some(Selection::new("world", 0.0, 0.0, 32.0)))
            .await
            .unwrap();

        let _ = engine.events.send(EngineEvent::Progress {
            world: "other".to_string(),
            chunks_generated: 1,
            total_chunks: 2,
            percent: 50.0,
            rate: 1.0,
        });
        let _ = engine.events.send(EngineEvent::Progress {
            world: "world".to_string(),
            chunks_generated: 3,
            total_chunks: 9,
            percent: 33.3,
            rate: 2.0,
        });

        let watched = node.clone();
        eventually(|| {
            let watched = watched.clone();
            async move { watched.local_progress().await.is_some() }
        })
        .await;
        let progress = node.local_progress().await.unwrap();
        assert_eq!(progress.world, "world");
        assert_eq!(progress.chunks_generated, 3);
        assert!(node.status_text().await.starts_with("world: 3/9 chunks"));

        node.shutdown().await;
    }
}
