// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker-side agent.
//!
//! Connects to a coordinator, registers, turns host commands into
//! [`AgentEvent`]s and reports progress back. Any connection loss schedules
//! a single reconnect attempt after a fixed delay.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{NetError, NetResult};
use super::protocol::{now_millis, Message, Progress, TransferProgress};
use super::transport::{self, LineReader, DEFAULT_HOST_PORT};
use crate::partition::Assignment;

/// Default wait before reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Hostname reported during registration.
pub fn local_hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub hostname: String,
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            hostname: local_hostname(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Parse `host[:port]`.
    pub fn from_address(addr: &str) -> NetResult<Self> {
        let (host, port) =
            transport::parse_address(addr).ok_or_else(|| NetError::InvalidAddress(addr.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_HOST_PORT)
    }
}

/// Events delivered to the agent's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Connected,
    Registered { assigned_id: u32, total_workers: u32 },
    /// A new partition arrived. `first` is false for reassignments.
    Assigned { assignment: Assignment, first: bool },
    /// Start generating with the last known assignment.
    Start(Option<Assignment>),
    Stop,
    Disconnected,
}

struct Shared {
    config: AgentConfig,
    running: AtomicBool,
    connected: AtomicBool,
    reconnect_pending: AtomicBool,
    /// Incremented per connection so a stale read loop cannot tear down a
    /// newer session.
    session: AtomicU64,
    assigned_id: AtomicU32,
    total_workers: AtomicU32,
    assignment: Mutex<Option<Assignment>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: Mutex<CancellationToken>,
    events_tx: mpsc::UnboundedSender<AgentEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<AgentEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Worker agent handle. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                session: AtomicU64::new(0),
                assigned_id: AtomicU32::new(0),
                total_workers: AtomicU32::new(0),
                assignment: Mutex::new(None),
                outgoing: Mutex::new(None),
                shutdown: Mutex::new(CancellationToken::new()),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    /// Take the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>> {
        lock(&self.shared.events_rx).take()
    }

    /// Start the agent and make the first connection attempt.
    ///
    /// A failed first attempt is returned as an error, but a reconnect is
    /// already scheduled.
    pub async fn start(&self) -> NetResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyRunning);
        }
        *lock(&self.shared.shutdown) = CancellationToken::new();
        self.shared.connect().await
    }

    /// Disconnect and stop reconnecting.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        lock(&self.shared.shutdown).cancel();
        lock(&self.shared.outgoing).take();
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.emit(AgentEvent::Disconnected);
        }
        info!("Agent stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.shared.reconnect_pending.load(Ordering::SeqCst)
    }

    /// Identity assigned by the coordinator, once registered.
    pub fn assigned_id(&self) -> Option<u32> {
        match self.shared.assigned_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn total_workers(&self) -> u32 {
        self.shared.total_workers.load(Ordering::SeqCst)
    }

    /// The most recent assignment. Later assignments replace earlier ones.
    pub fn current_assignment(&self) -> Option<Assignment> {
        lock(&self.shared.assignment).clone()
    }

    /// Instance index used in outgoing reports: the assigned index when
    /// known, otherwise the connection identity.
    fn reporting_id(&self) -> u32 {
        self.current_assignment()
            .map(|a| a.instance_index)
            .or_else(|| self.assigned_id())
            .unwrap_or(0)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Report generation progress. Dropped without an assignment.
    pub fn send_progress(&self, chunks_generated: u64, total_chunks: u64, chunks_per_second: f64) -> bool {
        let Some(assignment) = self.current_assignment() else {
            return false;
        };
        let percent_complete = if total_chunks == 0 {
            0.0
        } else {
            chunks_generated as f64 * 100.0 / total_chunks as f64
        };
        self.shared.send(Message::Progress(Progress {
            instance_id: assignment.instance_index,
            world: assignment.partition.world,
            chunks_generated,
            total_chunks,
            percent_complete,
            chunks_per_second,
            hostname: self.shared.config.hostname.clone(),
            last_update: now_millis(),
        }))
    }

    /// Report that local generation finished. Dropped without an assignment.
    pub fn send_generation_complete(&self, region_count: u32) -> bool {
        let Some(assignment) = self.current_assignment() else {
            return false;
        };
        self.shared.send(Message::generation_complete(
            assignment.instance_index,
            assignment.partition.world,
            region_count,
        ))
    }

    pub fn send_transfer_progress(&self, completed: u32, total: u32, bytes_transferred: u64, total_bytes: u64) -> bool {
        let percent_complete = if total == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        self.shared.send(Message::TransferProgress(TransferProgress {
            instance_id: self.reporting_id(),
            completed,
            total,
            bytes_transferred,
            total_bytes,
            percent_complete,
            timestamp: now_millis(),
        }))
    }

    pub fn send_transfer_complete(&self, world: &str, region_count: u32) -> bool {
        self.shared
            .send(Message::transfer_complete(self.reporting_id(), world, region_count))
    }

    pub fn send_transfer_failed(&self, world: &str, error: &str, failed_count: u32) -> bool {
        self.shared
            .send(Message::transfer_failed(self.reporting_id(), world, error, failed_count))
    }
}

impl Shared {
    fn emit(&self, event: AgentEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Agent event dropped, no receiver");
        }
    }

    fn token(&self) -> CancellationToken {
        lock(&self.shutdown).clone()
    }

    /// Queue a message. Dropped silently while disconnected.
    fn send(&self, msg: Message) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match lock(&self.outgoing).as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    async fn connect(self: &Arc<Self>) -> NetResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(NetError::NotRunning);
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (host, port) = (&self.config.host, self.config.port);
        let stream = match transport::connect(host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to coordinator at {}:{}: {}", host, port, e);
                self.schedule_reconnect();
                return Err(NetError::ConnectFailed(e.to_string()));
            }
        };
        if !self.running.load(Ordering::SeqCst) {
            return Err(NetError::NotRunning);
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        transport::spawn_writer(write_half, rx, format!("coordinator {}:{}", host, port));
        // Registration is the first queued message on every connection.
        let _ = tx.send(Message::register(self.config.hostname.clone()));

        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.outgoing) = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to coordinator at {}:{}", host, port);
        self.emit(AgentEvent::Connected);

        let shared = Arc::clone(self);
        let token = self.token();
        tokio::spawn(async move {
            shared.read_loop(LineReader::new(read_half), session, token).await;
        });
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut reader: LineReader, session: u64, token: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return,
                next = reader.next_message() => next,
            };
            match next {
                Ok(Some(Ok(msg))) => self.handle_message(msg),
                Ok(Some(Err(e))) => warn!("Skipping unparseable message from coordinator: {}", e),
                Ok(None) => {
                    info!("Coordinator closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Error reading from coordinator: {}", e);
                    break;
                }
            }
        }
        self.handle_disconnect(session);
    }

    fn handle_message(&self, msg: Message) {
        match msg {
            Message::Registered(registered) => {
                self.assigned_id.store(registered.assigned_id, Ordering::SeqCst);
                self.total_workers.store(registered.total_workers, Ordering::SeqCst);
                info!(
                    "Registered as worker {} ({} instance(s))",
                    registered.assigned_id, registered.total_workers
                );
                self.emit(AgentEvent::Registered {
                    assigned_id: registered.assigned_id,
                    total_workers: registered.total_workers,
                });
            }
            Message::Assignment(assignment) => self.store_assignment(assignment, true),
            Message::Reassign(assignment) => self.store_assignment(assignment, false),
            Message::Start => {
                info!("Start received");
                let assignment = lock(&self.assignment).clone();
                self.emit(AgentEvent::Start(assignment));
            }
            Message::Stop => {
                info!("Stop received");
                self.emit(AgentEvent::Stop);
            }
            other => warn!("Unexpected {} from coordinator", other.message_type()),
        }
    }

    fn store_assignment(&self, assignment: Assignment, first: bool) {
        info!(
            "{} instance {} of {} for {}",
            if first { "Assigned" } else { "Reassigned" },
            assignment.instance_index,
            assignment.total_instances(),
            assignment.world()
        );
        *lock(&self.assignment) = Some(assignment.clone());
        self.emit(AgentEvent::Assigned { assignment, first });
    }

    fn handle_disconnect(self: &Arc<Self>, session: u64) {
        if self.session.load(Ordering::SeqCst) != session {
            return;
        }
        lock(&self.outgoing).take();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(AgentEvent::Disconnected);
        }
        self.schedule_reconnect();
    }

    /// Schedule one reconnect attempt. A second call while one is pending
    /// does nothing.
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnect_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = self.config.reconnect_delay;
        info!("Reconnecting in {:?}", delay);
        let shared = Arc::clone(self);
        let token = self.token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    shared.reconnect_pending.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            shared.reconnect_pending.store(false, Ordering::SeqCst);
            let _ = shared.connect().await;
        });
    }
}
