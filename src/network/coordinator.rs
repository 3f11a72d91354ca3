// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host-side coordinator.
//!
//! Accepts worker connections, hands out identities, splits the active
//! selection across every connected instance and aggregates progress.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{EndpointState, PeerConnection, DEFAULT_STALE_AFTER};
use super::error::{NetError, NetResult};
use super::protocol::Message;
use super::transport::{self, LineReader, DEFAULT_HOST_PORT};
use crate::partition::{Assignment, InstanceLayout, PartitionDescriptor, Selection};

/// How often the accept loop wakes to check for shutdown.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a new connection may take to register.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Label used for the coordinator's own row in progress snapshots.
pub const LOCAL_HOST_LABEL: &str = "host (local)";

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    /// Whether the host generates its own share as instance 0.
    pub host_participates: bool,
    pub stale_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HOST_PORT)),
            host_participates: false,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Events observed by the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    PeerJoined { worker_id: u32, hostname: String },
    PeerLeft { worker_id: u32 },
    /// A redistribution pass completed.
    Redistributed { total_instances: u32, version: u64 },
    /// A status message arrived from a worker.
    Status { worker_id: u32, message: Message },
}

/// The coordinator's own generation progress when it participates.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProgress {
    pub world: String,
    pub chunks_generated: u64,
    pub total_chunks: u64,
    pub percent_complete: f64,
    pub chunks_per_second: f64,
}

/// One row of an aggregated snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProgress {
    /// Connection identity, `None` for the host itself.
    pub worker_id: Option<u32>,
    pub instance_index: Option<u32>,
    pub hostname: String,
    pub chunks_generated: u64,
    pub total_chunks: u64,
    pub percent_complete: f64,
    pub chunks_per_second: f64,
    pub active: bool,
    pub transfer: String,
}

/// Consolidated view over every instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedProgress {
    pub chunks_generated: u64,
    pub total_chunks: u64,
    pub percent_complete: f64,
    pub active_peers: usize,
    pub total_instances: u32,
    pub workload_active: bool,
    pub instances: Vec<InstanceProgress>,
}

#[derive(Debug, Default)]
struct Workload {
    /// Set by the first start broadcast and kept across stops so late
    /// joiners still receive a partition.
    selection: Option<Selection>,
    active: bool,
    version: u64,
    total_instances: u32,
    descriptor: Option<PartitionDescriptor>,
}

struct Shared {
    config: CoordinatorConfig,
    layout: InstanceLayout,
    next_id: AtomicU32,
    running: AtomicBool,
    peers: RwLock<BTreeMap<u32, Arc<PeerConnection>>>,
    workload: RwLock<Workload>,
    local: RwLock<Option<LocalProgress>>,
    events: broadcast::Sender<CoordinatorEvent>,
    shutdown: Mutex<CancellationToken>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Coordinator handle. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let layout = InstanceLayout::new(config.host_participates);
        Self {
            shared: Arc::new(Shared {
                config,
                layout,
                next_id: AtomicU32::new(1),
                running: AtomicBool::new(false),
                peers: RwLock::new(BTreeMap::new()),
                workload: RwLock::new(Workload {
                    total_instances: layout.total_instances(0),
                    ..Workload::default()
                }),
                local: RwLock::new(None),
                events,
                shutdown: Mutex::new(CancellationToken::new()),
                accept_task: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn layout(&self) -> InstanceLayout {
        self.shared.layout
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.events.subscribe()
    }

    /// Bind the listener and start accepting workers.
    ///
    /// Returns the bound address (useful when binding port 0).
    pub async fn start(&self) -> NetResult<SocketAddr> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyRunning);
        }

        let listener = match transport::bind(self.shared.config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(NetError::BindFailed(format!("{}: {}", self.shared.config.bind_addr, e)));
            }
        };
        let addr = listener
            .local_addr()
            .map_err(|e| NetError::from_io_error("reading local address", e))?;
        info!("Coordinator listening on {}", addr);

        let token = CancellationToken::new();
        *self.shared.shutdown.lock().await = token.clone();
        *self.shared.local_addr.lock().await = Some(addr);

        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            coordinator.accept_loop(listener, token).await;
        });
        *self.shared.accept_task.lock().await = Some(handle);

        Ok(addr)
    }

    /// Stop accepting, close every endpoint and clear the peer set.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.lock().await.cancel();
        if let Some(handle) = self.shared.accept_task.lock().await.take() {
            let _ = handle.await;
        }

        let peers: Vec<_> = {
            let mut peers = self.shared.peers.write().await;
            std::mem::take(&mut *peers).into_values().collect()
        };
        for peer in peers {
            peer.close().await;
        }
        {
            let mut workload = self.shared.workload.write().await;
            workload.active = false;
            workload.total_instances = self.shared.layout.total_instances(0);
        }
        *self.shared.local_addr.lock().await = None;
        info!("Coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().await
    }

    // ========================================================================
    // Connection Handling
    // ========================================================================

    async fn accept_loop(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, addr))) => {
                    debug!("Connection accepted from {}", addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    let coordinator = self.clone();
                    let token = shutdown.clone();
                    tokio::spawn(async move {
                        coordinator.handle_connection(stream, addr, token).await;
                    });
                }
                Ok(Err(e)) => {
                    warn!("{}", NetError::AcceptFailed(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Accept loop finished");
    }

    async fn handle_connection(
        self,
        stream: tokio::net::TcpStream,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = LineReader::new(read_half);

        let first = tokio::select! {
            _ = shutdown.cancelled() => return,
            first = tokio::time::timeout(REGISTRATION_TIMEOUT, reader.next_message()) => first,
        };
        let hostname = match first {
            Ok(Ok(Some(Ok(Message::Register(register))))) => register.hostname,
            Ok(Ok(Some(Ok(other)))) => {
                warn!(
                    "{}",
                    NetError::RegistrationFailed(format!(
                        "{} sent {} before registering",
                        addr,
                        other.message_type()
                    ))
                );
                return;
            }
            Ok(Ok(Some(Err(e)))) => {
                warn!("{}", NetError::RegistrationFailed(format!("{}: {}", addr, e)));
                return;
            }
            Ok(Ok(None)) => {
                debug!("{} closed before registering", addr);
                return;
            }
            Ok(Err(e)) => {
                debug!("Read from {} failed before registering: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("{}", NetError::RegistrationFailed(format!("{} timed out", addr)));
                return;
            }
        };

        let peer = self.register_peer(hostname, addr, write_half).await;
        self.receive_loop(peer, reader, shutdown).await;
    }

    /// Insert a peer, confirm its registration and redistribute.
    async fn register_peer(
        &self,
        hostname: String,
        addr: SocketAddr,
        write_half: tokio::net::tcp::OwnedWriteHalf,
    ) -> Arc<PeerConnection> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        transport::spawn_writer(write_half, rx, format!("worker {}", id));
        let peer = PeerConnection::new(id, hostname.clone(), addr, tx);

        let total = {
            let mut peers = self.shared.peers.write().await;
            peers.insert(id, Arc::clone(&peer));
            self.shared.layout.total_instances(peers.len())
        };
        peer.send(Message::registered(id, total));
        info!("Worker {} ({}) registered from {}", id, hostname, addr);

        let _ = self.shared.events.send(CoordinatorEvent::PeerJoined { worker_id: id, hostname });
        self.redistribute().await;
        if self.is_workload_active().await {
            peer.send(Message::Start);
        }
        peer
    }

    async fn receive_loop(&self, peer: Arc<PeerConnection>, mut reader: LineReader, shutdown: CancellationToken) {
        let id = peer.id();
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = peer.closed() => break,
                next = reader.next_message() => next,
            };
            match next {
                Ok(Some(Ok(msg))) => {
                    if peer.apply(&msg).await {
                        debug!("Worker {} sent {}", id, msg.message_type());
                        let _ = self
                            .shared
                            .events
                            .send(CoordinatorEvent::Status { worker_id: id, message: msg });
                    } else {
                        warn!("Worker {} sent unexpected {}", id, msg.message_type());
                    }
                }
                Ok(Some(Err(e))) => {
                    error!("Failed to parse message from worker {}: {}", id, e);
                }
                Ok(None) => {
                    info!("Worker {} disconnected", id);
                    break;
                }
                Err(e) => {
                    warn!("Error reading from worker {}: {}", id, e);
                    break;
                }
            }
        }
        self.remove_peer(id).await;
    }

    /// Remove a peer and redistribute. No-op if already removed.
    async fn remove_peer(&self, id: u32) {
        let removed = self.shared.peers.write().await.remove(&id);
        if let Some(peer) = removed {
            peer.close().await;
            let _ = self.shared.events.send(CoordinatorEvent::PeerLeft { worker_id: id });
            if self.is_running() {
                self.redistribute().await;
            }
        }
    }

    // ========================================================================
    // Partitioning
    // ========================================================================

    /// Recompute instance indices from the current peer set and send every
    /// peer its partition.
    ///
    /// Before the first start this only refreshes the instance count. Safe
    /// to run repeatedly; each pass reflects the peer set at the time.
    pub async fn redistribute(&self) {
        let peers = self.shared.peers.read().await;
        let total = self.shared.layout.total_instances(peers.len());

        let mut workload = self.shared.workload.write().await;
        workload.total_instances = total;
        let Some(selection) = workload.selection.clone() else {
            info!("{} instance(s) connected, no workload started", total);
            return;
        };

        workload.version += 1;
        let version = workload.version;
        let descriptor = PartitionDescriptor::new(&selection, total, version);
        workload.descriptor = Some(descriptor.clone());
        drop(workload);

        for (rank, peer) in peers.values().enumerate() {
            let index = self.shared.layout.index_for_rank(rank);
            peer.send_assignment(Assignment::new(index, descriptor.clone())).await;
        }
        info!(
            "Redistributed {} across {} instance(s) (version {})",
            selection.world, total, version
        );
        let _ = self.shared.events.send(CoordinatorEvent::Redistributed {
            total_instances: total,
            version,
        });
    }

    /// Mark `selection` active, distribute it and tell every peer to start.
    ///
    /// Returns the host's own assignment when it participates.
    pub async fn broadcast_start(&self, selection: Selection) -> Option<Assignment> {
        {
            let mut workload = self.shared.workload.write().await;
            workload.selection = Some(selection);
            workload.active = true;
        }
        self.redistribute().await;

        let peers = self.shared.peers.read().await;
        for peer in peers.values() {
            peer.send(Message::Start);
        }
        info!("Start broadcast to {} worker(s)", peers.len());
        drop(peers);

        self.host_assignment().await
    }

    /// Mark the workload inactive and tell every peer to abort.
    pub async fn broadcast_stop(&self) {
        self.shared.workload.write().await.active = false;
        let peers = self.shared.peers.read().await;
        for peer in peers.values() {
            peer.send(Message::Stop);
        }
        info!("Stop broadcast to {} worker(s)", peers.len());
    }

    /// The host's share of the current descriptor, if it participates.
    pub async fn host_assignment(&self) -> Option<Assignment> {
        let index = self.shared.layout.host_index()?;
        let workload = self.shared.workload.read().await;
        workload
            .descriptor
            .clone()
            .map(|descriptor| Assignment::new(index, descriptor))
    }

    pub async fn current_descriptor(&self) -> Option<PartitionDescriptor> {
        self.shared.workload.read().await.descriptor.clone()
    }

    pub async fn is_workload_active(&self) -> bool {
        self.shared.workload.read().await.active
    }

    pub async fn total_instances(&self) -> u32 {
        self.shared.workload.read().await.total_instances
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.peers.read().await.len()
    }

    /// Snapshot of every connected peer in identity order.
    pub async fn peers(&self) -> Vec<EndpointState> {
        let peers: Vec<_> = self.shared.peers.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(peers.len());
        for peer in peers {
            states.push(peer.snapshot().await);
        }
        states
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Record the host's own generation progress.
    pub async fn update_local_progress(&self, progress: LocalProgress) {
        *self.shared.local.write().await = Some(progress);
    }

    pub async fn clear_local_progress(&self) {
        *self.shared.local.write().await = None;
    }

    /// Consolidated progress across the host and every peer.
    pub async fn aggregate(&self) -> AggregatedProgress {
        self.aggregate_at(Utc::now()).await
    }

    async fn aggregate_at(&self, now: DateTime<Utc>) -> AggregatedProgress {
        let window = self.shared.config.stale_after;
        let mut instances = Vec::new();

        if let Some(local) = self.shared.local.read().await.clone() {
            instances.push(InstanceProgress {
                worker_id: None,
                instance_index: self.shared.layout.host_index(),
                hostname: LOCAL_HOST_LABEL.to_string(),
                chunks_generated: local.chunks_generated,
                total_chunks: local.total_chunks,
                percent_complete: local.percent_complete,
                chunks_per_second: local.chunks_per_second,
                active: true,
                transfer: "local".to_string(),
            });
        }

        let mut active_peers = 0;
        for state in self.peers().await {
            let active = state.is_active(window, now);
            if active {
                active_peers += 1;
            }
            instances.push(InstanceProgress {
                worker_id: Some(state.worker_id),
                instance_index: state.instance_index,
                hostname: state.hostname.clone(),
                chunks_generated: state.chunks_generated,
                total_chunks: state.total_chunks,
                percent_complete: state.percent_complete,
                chunks_per_second: state.chunks_per_second,
                active,
                transfer: state.transfer_label(),
            });
        }

        let chunks_generated: u64 = instances.iter().map(|i| i.chunks_generated).sum();
        let total_chunks: u64 = instances.iter().map(|i| i.total_chunks).sum();
        let percent_complete = if total_chunks == 0 {
            0.0
        } else {
            chunks_generated as f64 * 100.0 / total_chunks as f64
        };

        let workload = self.shared.workload.read().await;
        AggregatedProgress {
            chunks_generated,
            total_chunks,
            percent_complete,
            active_peers,
            total_instances: workload.total_instances,
            workload_active: workload.active,
            instances,
        }
    }
}

impl AggregatedProgress {
    /// Multi-line status text for operators.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}/{} chunks ({:.1}%), {} active peer(s), {} instance(s){}\n",
            self.chunks_generated,
            self.total_chunks,
            self.percent_complete,
            self.active_peers,
            self.total_instances,
            if self.workload_active { "" } else { " [idle]" }
        );
        for instance in &self.instances {
            let index = instance
                .instance_index
                .map(|i| format!("#{}", i))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {:<4} {:<20} {:>6.1}% {:>8.1} c/s  {}{}\n",
                index,
                instance.hostname,
                instance.percent_complete,
                instance.chunks_per_second,
                instance.transfer,
                if instance.active { "" } else { " (stale)" }
            ));
        }
        out
    }
}
