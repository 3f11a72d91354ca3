// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network error types for host/worker coordination.

use std::io;
use thiserror::Error;

/// Errors that can occur in the coordination network layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Failed to bind the coordinator listener.
    #[error("Failed to bind coordinator port: {0}")]
    BindFailed(String),

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(String),

    /// Failed to connect to the coordinator.
    #[error("Failed to connect to coordinator: {0}")]
    ConnectFailed(String),

    /// The first message on a connection was not a registration.
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// A line could not be decoded as a message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation requires a running coordinator or agent.
    #[error("Not running")]
    NotRunning,

    /// Already running.
    #[error("Already running")]
    AlreadyRunning,

    /// General transport error.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl NetError {
    /// Create a network error from an IO error with context.
    pub fn from_io_error(context: &str, err: io::Error) -> Self {
        NetError::Transport(format!("{}: {}", context, err))
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::InvalidMessage(err.to_string())
    }
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_error_display() {
        let err = NetError::BindFailed("address in use".to_string());
        assert_eq!(err.to_string(), "Failed to bind coordinator port: address in use");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = NetError::from_io_error("reading line", io_err);
        assert!(err.to_string().contains("reading line"));
        assert!(err.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: NetError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, NetError::InvalidMessage(_)));
    }
}
