// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire protocol for host/worker coordination.
//!
//! Every message is a JSON object `{"type": ..., "payload": {...}}` written
//! on its own line. Payload keys are camelCase.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::partition::Assignment;

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Payloads
// ============================================================================

/// Worker registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    pub hostname: String,
}

/// Registration confirmation carrying the assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub assigned_id: u32,
    pub total_workers: u32,
}

/// Generation progress reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub instance_id: u32,
    pub world: String,
    pub chunks_generated: u64,
    pub total_chunks: u64,
    pub percent_complete: f64,
    pub chunks_per_second: f64,
    pub hostname: String,
    pub last_update: i64,
}

/// Local generation finished for the worker's partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationComplete {
    pub instance_id: u32,
    pub world: String,
    pub region_count: u32,
    pub timestamp: i64,
}

/// Transfer pipeline progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub instance_id: u32,
    pub completed: u32,
    pub total: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percent_complete: f64,
    pub timestamp: i64,
}

/// Every queued region reached the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    pub instance_id: u32,
    pub world: String,
    pub region_count: u32,
    pub timestamp: i64,
}

/// The pipeline stopped with failed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailed {
    pub instance_id: u32,
    pub world: String,
    pub error: String,
    pub failed_count: u32,
    pub timestamp: i64,
}

// ============================================================================
// Message Envelope
// ============================================================================

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    // worker -> host
    Register(Register),
    Progress(Progress),
    GenerationComplete(GenerationComplete),
    TransferProgress(TransferProgress),
    TransferComplete(TransferComplete),
    TransferFailed(TransferFailed),

    // host -> worker
    Registered(Registered),
    Assignment(Assignment),
    Reassign(Assignment),
    Start,
    Stop,
}

// ============================================================================
// Constructors
// ============================================================================

impl Message {
    pub fn register(hostname: impl Into<String>) -> Self {
        Self::Register(Register {
            hostname: hostname.into(),
        })
    }

    pub fn registered(assigned_id: u32, total_workers: u32) -> Self {
        Self::Registered(Registered {
            assigned_id,
            total_workers,
        })
    }

    /// First partition sent to a peer, or a replacement for an earlier one.
    pub fn assignment(assignment: Assignment, first: bool) -> Self {
        if first {
            Self::Assignment(assignment)
        } else {
            Self::Reassign(assignment)
        }
    }

    pub fn generation_complete(instance_id: u32, world: impl Into<String>, region_count: u32) -> Self {
        Self::GenerationComplete(GenerationComplete {
            instance_id,
            world: world.into(),
            region_count,
            timestamp: now_millis(),
        })
    }

    pub fn transfer_complete(instance_id: u32, world: impl Into<String>, region_count: u32) -> Self {
        Self::TransferComplete(TransferComplete {
            instance_id,
            world: world.into(),
            region_count,
            timestamp: now_millis(),
        })
    }

    pub fn transfer_failed(
        instance_id: u32,
        world: impl Into<String>,
        error: impl Into<String>,
        failed_count: u32,
    ) -> Self {
        Self::TransferFailed(TransferFailed {
            instance_id,
            world: world.into(),
            error: error.into(),
            failed_count,
            timestamp: now_millis(),
        })
    }

    /// Wire name of this message's type.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Registered(_) => "registered",
            Self::Assignment(_) => "assignment",
            Self::Reassign(_) => "reassign",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Progress(_) => "progress",
            Self::GenerationComplete(_) => "generation_complete",
            Self::TransferProgress(_) => "transfer_progress",
            Self::TransferComplete(_) => "transfer_complete",
            Self::TransferFailed(_) => "transfer_failed",
        }
    }
}

// ============================================================================
// Type Guards
// ============================================================================

impl Message {
    pub fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Assignment or reassignment.
    pub fn is_assignment(&self) -> bool {
        matches!(self, Self::Assignment(_) | Self::Reassign(_))
    }

    /// Whether the host is the sender of this message type.
    pub fn is_from_host(&self) -> bool {
        matches!(
            self,
            Self::Registered(_) | Self::Assignment(_) | Self::Reassign(_) | Self::Start | Self::Stop
        )
    }

    /// Whether a worker is the sender of this message type.
    pub fn is_from_worker(&self) -> bool {
        !self.is_from_host()
    }

    /// Worker status messages that count as a sign of life.
    pub fn is_status_update(&self) -> bool {
        matches!(
            self,
            Self::Progress(_)
                | Self::GenerationComplete(_)
                | Self::TransferProgress(_)
                | Self::TransferComplete(_)
                | Self::TransferFailed(_)
        )
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a message as a newline-terminated JSON line.
pub fn encode(msg: &Message) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string(msg)?;
    json.push('\n');
    Ok(json)
}

/// Decode a message from a single line.
pub fn decode(line: &str) -> Result<Message, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Parse one raw line. Bytes that are not UTF-8 fail like any other
/// malformed JSON.
pub fn decode_bytes(line: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice(line.trim_ascii())
}

/// Parse every non-empty line in a buffer.
pub fn decode_messages(buffer: &str) -> Vec<Result<Message, serde_json::Error>> {
    buffer
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode)
        .collect()
}
