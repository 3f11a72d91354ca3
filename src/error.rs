// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Top-level error types for chunkfleet.
//!
//! Each subsystem owns its error enum (`NetError`, `TransferError`,
//! `EngineError`). This module holds the configuration errors and the
//! node errors that wrap them, using `thiserror` for definitions and
//! `anyhow` for propagation in the binary.

use thiserror::Error;

use crate::engine::EngineError;
use crate::network::NetError;
use crate::transfer::TransferError;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors raised by a node while driving generation and transfers.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("No generation engine configured")]
    EngineUnavailable,

    #[error("Generation already running for {0}")]
    AlreadyRunning(String),

    #[error("No assignment received")]
    NoAssignment,

    #[error("No active selection")]
    NoSelection,

    #[error("Transfers are disabled")]
    TransfersDisabled,

    #[error("Operation not available for the {0} role")]
    WrongRole(&'static str),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(ConfigError::from(io_err), ConfigError::NotFound(_)));
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ConfigError::from(io_err), ConfigError::IoError(_)));
    }

    #[test]
    fn test_node_error_from_subsystems() {
        let err: NodeError = NetError::NotRunning.into();
        assert!(matches!(err, NodeError::Network(_)));
        let err: NodeError = TransferError::FileNotFound.into();
        assert_eq!(err.to_string(), "Transfer error: File not found");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            NodeError::AlreadyRunning("world".to_string()).to_string(),
            "Generation already running for world"
        );
        assert_eq!(
            NodeError::WrongRole("host").to_string(),
            "Operation not available for the host role"
        );
    }
}
