// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host-side endpoint for one connected worker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::protocol::Message;

/// Default window after which a silent peer counts as inactive.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Everything the host knows about one worker.
///
/// Only messages received from that worker mutate this state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointState {
    pub worker_id: u32,
    pub hostname: String,
    pub remote_addr: SocketAddr,
    pub connected: bool,
    pub last_update: DateTime<Utc>,
    /// Instance index from the most recent assignment.
    pub instance_index: Option<u32>,

    pub world: Option<String>,
    pub chunks_generated: u64,
    pub total_chunks: u64,
    pub percent_complete: f64,
    pub chunks_per_second: f64,
    pub generation_complete: bool,
    pub region_count: u32,

    pub transfer_completed: u32,
    pub transfer_total: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub transfer_complete: bool,
    pub transfer_error: Option<String>,
}

impl EndpointState {
    pub fn new(worker_id: u32, hostname: impl Into<String>, remote_addr: SocketAddr) -> Self {
        Self {
            worker_id,
            hostname: hostname.into(),
            remote_addr,
            connected: true,
            last_update: Utc::now(),
            instance_index: None,
            world: None,
            chunks_generated: 0,
            total_chunks: 0,
            percent_complete: 0.0,
            chunks_per_second: 0.0,
            generation_complete: false,
            region_count: 0,
            transfer_completed: 0,
            transfer_total: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            transfer_complete: false,
            transfer_error: None,
        }
    }

    /// Apply a worker status message. Returns false for anything a worker
    /// should not send after registering.
    pub fn apply(&mut self, msg: &Message) -> bool {
        match msg {
            Message::Progress(p) => {
                self.world = Some(p.world.clone());
                self.chunks_generated = p.chunks_generated;
                self.total_chunks = p.total_chunks;
                self.percent_complete = p.percent_complete;
                self.chunks_per_second = p.chunks_per_second;
                if !p.hostname.is_empty() {
                    self.hostname = p.hostname.clone();
                }
                self.generation_complete = false;
            }
            Message::GenerationComplete(p) => {
                self.world = Some(p.world.clone());
                self.generation_complete = true;
                self.region_count = p.region_count;
                self.chunks_generated = self.total_chunks.max(self.chunks_generated);
                self.percent_complete = 100.0;
                self.transfer_complete = false;
                self.transfer_error = None;
            }
            Message::TransferProgress(p) => {
                self.transfer_completed = p.completed;
                self.transfer_total = p.total;
                self.bytes_transferred = p.bytes_transferred;
                self.total_bytes = p.total_bytes;
            }
            Message::TransferComplete(p) => {
                self.transfer_complete = true;
                self.transfer_error = None;
                self.transfer_completed = p.region_count;
                self.transfer_total = self.transfer_total.max(p.region_count);
            }
            Message::TransferFailed(p) => {
                self.transfer_complete = false;
                self.transfer_error = Some(p.error.clone());
            }
            _ => return false,
        }
        self.last_update = Utc::now();
        true
    }

    /// Whether no status update arrived within `window` of `now`.
    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_update);
        elapsed.to_std().map(|e| e > window).unwrap_or(false)
    }

    /// Connected and recently heard from.
    pub fn is_active(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.connected && !self.is_stale(window, now)
    }

    /// Human-readable transfer state.
    pub fn transfer_label(&self) -> String {
        if let Some(err) = &self.transfer_error {
            format!("failed: {}", err)
        } else if self.transfer_complete {
            "complete".to_string()
        } else if self.transfer_total > 0 {
            format!("{}/{} regions", self.transfer_completed, self.transfer_total)
        } else {
            "idle".to_string()
        }
    }
}

/// A registered worker connection.
///
/// Outgoing messages go through an unbounded queue drained by the
/// connection's send loop, so callers never block on a slow peer.
pub struct PeerConnection {
    id: u32,
    outgoing: mpsc::UnboundedSender<Message>,
    state: RwLock<EndpointState>,
    assigned: AtomicBool,
    closed: CancellationToken,
}

impl PeerConnection {
    pub fn new(
        id: u32,
        hostname: impl Into<String>,
        remote_addr: SocketAddr,
        outgoing: mpsc::UnboundedSender<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            outgoing,
            state: RwLock::new(EndpointState::new(id, hostname, remote_addr)),
            assigned: AtomicBool::new(false),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Queue a message. Returns false once the send loop has exited.
    pub fn send(&self, msg: Message) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        match self.outgoing.send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping {} for closed peer {}", e.0.message_type(), self.id);
                false
            }
        }
    }

    /// Send a partition, choosing `assignment` the first time and `reassign`
    /// after that.
    pub async fn send_assignment(&self, assignment: crate::partition::Assignment) -> bool {
        let first = !self.assigned.swap(true, Ordering::SeqCst);
        self.state.write().await.instance_index = Some(assignment.instance_index);
        self.send(Message::assignment(assignment, first))
    }

    pub async fn apply(&self, msg: &Message) -> bool {
        self.state.write().await.apply(msg)
    }

    pub async fn snapshot(&self) -> EndpointState {
        self.state.read().await.clone()
    }

    /// Mark the endpoint closed and wake its receive loop.
    pub async fn close(&self) {
        self.state.write().await.connected = false;
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{Progress, TransferProgress};
    use crate::partition::{Assignment, PartitionDescriptor, Selection};

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn progress(done: u64, total: u64) -> Message {
        Message::Progress(Progress {
            instance_id: 1,
            world: "world".to_string(),
            chunks_generated: done,
            total_chunks: total,
            percent_complete: done as f64 * 100.0 / total as f64,
            chunks_per_second: 12.0,
            hostname: "node-b".to_string(),
            last_update: 0,
        })
    }

    #[test]
    fn test_apply_progress() {
        let mut state = EndpointState::new(1, "node-a", addr());
        assert!(state.apply(&progress(25, 100)));
        assert_eq!(state.chunks_generated, 25);
        assert_eq!(state.total_chunks, 100);
        assert_eq!(state.hostname, "node-b");
        assert_eq!(state.world.as_deref(), Some("world"));
    }

    #[test]
    fn test_apply_transfer_lifecycle() {
        let mut state = EndpointState::new(1, "node-a", addr());
        state.apply(&Message::generation_complete(1, "world", 4));
        assert!(state.generation_complete);
        assert_eq!(state.region_count, 4);

        state.apply(&Message::TransferProgress(TransferProgress {
            instance_id: 1,
            completed: 2,
            total: 4,
            bytes_transferred: 100,
            total_bytes: 400,
            percent_complete: 50.0,
            timestamp: 0,
        }));
        assert_eq!(state.transfer_label(), "2/4 regions");

        state.apply(&Message::transfer_failed(1, "world", "1 transfers failed", 1));
        assert_eq!(state.transfer_label(), "failed: 1 transfers failed");

        state.apply(&Message::transfer_complete(1, "world", 4));
        assert!(state.transfer_complete);
        assert!(state.transfer_error.is_none());
    }

    #[test]
    fn test_host_messages_are_rejected() {
        let mut state = EndpointState::new(1, "node-a", addr());
        assert!(!state.apply(&Message::Start));
        assert!(!state.apply(&Message::register("x")));
    }

    #[test]
    fn test_staleness() {
        let state = EndpointState::new(1, "node-a", addr());
        let now = state.last_update;
        assert!(!state.is_stale(DEFAULT_STALE_AFTER, now));
        assert!(!state.is_stale(DEFAULT_STALE_AFTER, now + chrono::Duration::seconds(59)));
        assert!(state.is_stale(DEFAULT_STALE_AFTER, now + chrono::Duration::seconds(61)));

        let mut disconnected = state.clone();
        disconnected.connected = false;
        assert!(!disconnected.is_active(DEFAULT_STALE_AFTER, now));
        assert!(state.is_active(DEFAULT_STALE_AFTER, now));
    }

    #[tokio::test]
    async fn test_first_assignment_then_reassign() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = PeerConnection::new(7, "node-a", addr(), tx);
        let selection = Selection::new("world", 0.0, 0.0, 256.0);

        assert!(peer.send_assignment(Assignment::new(0, PartitionDescriptor::new(&selection, 2, 1))).await);
        assert!(peer.send_assignment(Assignment::new(1, PartitionDescriptor::new(&selection, 3, 2))).await);

        assert_eq!(rx.recv().await.unwrap().message_type(), "assignment");
        assert_eq!(rx.recv().await.unwrap().message_type(), "reassign");
        assert_eq!(peer.snapshot().await.instance_index, Some(1));
    }

    #[tokio::test]
    async fn test_closed_peer_drops_messages() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerConnection::new(1, "node-a", addr(), tx);
        peer.close().await;
        assert!(peer.is_closed());
        assert!(!peer.send(Message::Stop));
        assert!(!peer.snapshot().await.connected);
    }
}
