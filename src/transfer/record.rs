// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-region transfer records.
//!
//! A record is an immutable value. Every transition returns a new record and
//! rejects moves the state machine does not allow:
//!
//! ```text
//!   pending ──► compressing ──► uploading ──► completed
//!      │             │              │
//!      └─────────────┴──────────────┴──► failed ──retry──► pending
//! ```

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::{TransferError, TransferResult};
use super::region::RegionCoord;

/// Status of a region transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Compressing,
    Uploading,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Compressing or uploading.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransferStatus::Compressing | TransferStatus::Uploading)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Compressing => "compressing",
            TransferStatus::Uploading => "uploading",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Transfer state of one region file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    region: RegionCoord,
    status: TransferStatus,
    attempt_count: u32,
    bytes_transferred: u64,
    total_bytes: u64,
    error_message: Option<String>,
    /// Milliseconds since the Unix epoch, 0 if never attempted.
    last_attempt_time: i64,
}

impl TransferRecord {
    /// A fresh record waiting for its first attempt.
    pub fn pending(region: RegionCoord) -> Self {
        Self {
            region,
            status: TransferStatus::Pending,
            attempt_count: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            error_message: None,
            last_attempt_time: 0,
        }
    }

    /// Rebuild a record from persisted fields.
    pub(crate) fn from_parts(
        region: RegionCoord,
        status: TransferStatus,
        attempt_count: u32,
        bytes_transferred: u64,
        total_bytes: u64,
        error_message: Option<String>,
        last_attempt_time: i64,
    ) -> Self {
        Self {
            region,
            status,
            attempt_count,
            bytes_transferred,
            total_bytes,
            error_message,
            last_attempt_time,
        }
    }

    pub fn region(&self) -> RegionCoord {
        self.region
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_attempt_time(&self) -> i64 {
        self.last_attempt_time
    }

    fn expect_status(&self, allowed: &[TransferStatus], to: TransferStatus) -> TransferResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransferError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// Start an attempt.
    pub fn compressing(&self) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Pending], TransferStatus::Compressing)?;
        Ok(Self {
            status: TransferStatus::Compressing,
            bytes_transferred: 0,
            total_bytes: 0,
            error_message: None,
            last_attempt_time: now_millis(),
            ..self.clone()
        })
    }

    /// Compression done; `total_bytes` is the compressed size.
    pub fn uploading(&self, total_bytes: u64) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Compressing], TransferStatus::Uploading)?;
        Ok(Self {
            status: TransferStatus::Uploading,
            bytes_transferred: 0,
            total_bytes,
            ..self.clone()
        })
    }

    /// Update the uploaded byte count.
    pub fn with_progress(&self, bytes_transferred: u64) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Uploading], TransferStatus::Uploading)?;
        Ok(Self {
            bytes_transferred: bytes_transferred.min(self.total_bytes),
            ..self.clone()
        })
    }

    pub fn completed(&self) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Uploading], TransferStatus::Completed)?;
        Ok(Self {
            status: TransferStatus::Completed,
            bytes_transferred: self.total_bytes,
            error_message: None,
            ..self.clone()
        })
    }

    /// Record a failed attempt. Counts exactly one attempt.
    pub fn failed(&self, error: impl Into<String>) -> TransferResult<Self> {
        self.expect_status(
            &[
                TransferStatus::Pending,
                TransferStatus::Compressing,
                TransferStatus::Uploading,
            ],
            TransferStatus::Failed,
        )?;
        Ok(Self {
            status: TransferStatus::Failed,
            attempt_count: self.attempt_count + 1,
            error_message: Some(error.into()),
            last_attempt_time: now_millis(),
            ..self.clone()
        })
    }

    /// Whether another attempt is allowed under `max_attempts`.
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.status == TransferStatus::Failed && self.attempt_count < max_attempts
    }

    /// Move a failed record back to pending, keeping its attempt count.
    pub fn retry(&self, max_attempts: u32) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Failed], TransferStatus::Pending)?;
        if self.attempt_count >= max_attempts {
            return Err(TransferError::RetryExhausted {
                attempts: self.attempt_count,
                max: max_attempts,
            });
        }
        Ok(Self {
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            ..self.clone()
        })
    }

    /// Operator reset of a failed record with a fresh attempt budget.
    pub fn rearm(&self) -> TransferResult<Self> {
        self.expect_status(&[TransferStatus::Failed], TransferStatus::Pending)?;
        Ok(Self {
            status: TransferStatus::Pending,
            attempt_count: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            error_message: None,
            ..self.clone()
        })
    }

    /// Record as seen after a restart: anything that was in flight is
    /// treated as not yet transferred.
    pub fn restored(self) -> Self {
        if self.status.is_in_flight() {
            Self {
                status: TransferStatus::Pending,
                bytes_transferred: 0,
                ..self
            }
        } else {
            self
        }
    }
}
