// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer pipeline error types.

use std::io;
use thiserror::Error;

use super::record::TransferStatus;

/// Errors raised by the transfer pipeline.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A record was asked to move to a state its status does not allow.
    #[error("Invalid transfer transition from {from} to {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    /// Retry refused because the attempt budget is spent.
    #[error("Retry limit reached ({attempts}/{max} attempts)")]
    RetryExhausted { attempts: u32, max: u32 },

    /// Source region file is missing.
    #[error("File not found")]
    FileNotFound,

    /// Source region file changed size during the settle check.
    #[error("File in use")]
    FileInUse,

    /// Compression failed.
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Backend connection or upload failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Queue file could not be read or written.
    #[error("Queue persistence failed: {0}")]
    Persistence(String),

    /// Transfers are disabled or misconfigured.
    #[error("Transfers unavailable: {0}")]
    Unavailable(String),

    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Create a backend error from an IO error with context.
    pub fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        TransferError::Backend(format!("{}: {}", context, err))
    }
}

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;
