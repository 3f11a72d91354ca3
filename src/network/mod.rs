// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host/worker coordination over TCP.
//!
//! One coordinator accepts any number of worker agents. Each worker gets an
//! identity on registration and a share of the active selection whenever
//! the peer set changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐            ┌─────────────────────┐
//! │         Coordinator          │            │       Agent         │
//! │                              │    TCP     │                     │
//! │  accept loop ──► endpoint ◄──┼────────────┼──► read loop        │
//! │                  read loop   │   NDJSON   │    send loop        │
//! │                  send loop   │            │    reconnect timer  │
//! │                              │            │                     │
//! │  peers: BTreeMap<id, peer>   │            │  events ──► owner   │
//! └──────────────────────────────┘            └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages are newline-delimited JSON objects of the form
//! `{"type": ..., "payload": {...}}`.
//!
//! ## Worker → Host
//!
//! - `register` - First message on every connection
//! - `progress` - Generation progress
//! - `generation_complete` - Local share finished
//! - `transfer_progress` - Upload pipeline progress
//! - `transfer_complete` - Every region delivered
//! - `transfer_failed` - Pipeline stopped with failures
//!
//! ## Host → Worker
//!
//! - `registered` - Identity and instance count
//! - `assignment` / `reassign` - Partition for this worker
//! - `start` - Begin generating with the last assignment
//! - `stop` - Abort local generation

pub mod agent;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod transport;

pub use agent::{local_hostname, Agent, AgentConfig, AgentEvent, DEFAULT_RECONNECT_DELAY};
pub use connection::{EndpointState, PeerConnection, DEFAULT_STALE_AFTER};
pub use coordinator::{
    AggregatedProgress, Coordinator, CoordinatorConfig, CoordinatorEvent, InstanceProgress,
    LocalProgress, LOCAL_HOST_LABEL,
};
pub use error::{NetError, NetResult};
pub use protocol::{decode, decode_bytes, decode_messages, encode, Message};
pub use transport::{parse_address, DEFAULT_HOST_PORT, DEFAULT_TRANSFER_PORT};
