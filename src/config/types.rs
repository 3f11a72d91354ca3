// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`FileConfig`] mirrors what can appear in a JSON or YAML file, with every
//! field optional. [`ResolvedConfig`] is the merged result with defaults
//! applied.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::CommandSpec;
use crate::network::{DEFAULT_HOST_PORT, DEFAULT_TRANSFER_PORT};
use crate::transfer::{
    Auth, Credentials, DirectoryBackend, RetryPolicy, TransferOptions, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_SETTLE_INTERVAL,
};

pub const DEFAULT_STALE_AFTER_SECS: u64 = 60;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 10;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const CHUNK_LIST_DIR: &str = "chunk-lists";
pub const DEFAULT_REMOTE_PATH: &str = "/{world}";

/// Configuration as written in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Port the coordinator listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    /// Whether the host also generates, as instance 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_participates: Option<bool>,

    /// Seconds without a status message before a peer counts as stale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after_secs: Option<u64>,

    /// Seconds a worker waits before reconnecting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_secs: Option<u64>,

    /// Queue, staging and chunk-list storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Directory containing world folders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_list_dir: Option<PathBuf>,

    /// External generation program.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<CommandSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferFileConfig>,
}

/// How the transfer destination authenticates us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    Password,
    #[default]
    PublicKey,
}

/// Transfer section as written in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    /// Remote directory; `{world}` is replaced by the world name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_transfer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i32>,
    /// Local or mounted directory that receives uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_root: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub host_port: u16,
    pub host_participates: bool,
    pub stale_after_secs: u64,
    pub reconnect_delay_secs: u64,
    pub data_dir: PathBuf,
    pub world_dir: PathBuf,
    pub chunk_list_dir: PathBuf,
    pub engine: Option<CommandSpec>,
    pub transfer: TransferConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            host_port: DEFAULT_HOST_PORT,
            host_participates: false,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            chunk_list_dir: data_dir.join(CHUNK_LIST_DIR),
            data_dir,
            world_dir: PathBuf::from("."),
            engine: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl ResolvedConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Default data directory: `<data dir>/chunkfleet`, or `.chunkfleet`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("chunkfleet"))
        .unwrap_or_else(|| PathBuf::from(".chunkfleet"))
}

/// Resolved transfer settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    pub enabled: bool,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub private_key_passphrase: Option<String>,
    pub remote_path: String,
    pub auto_transfer: bool,
    pub retry_count: u32,
    pub compression_level: i32,
    pub destination_root: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: String::new(),
            port: DEFAULT_TRANSFER_PORT,
            username: String::new(),
            auth_method: AuthMethod::default(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            remote_path: String::new(),
            auto_transfer: true,
            retry_count: DEFAULT_RETRY_COUNT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            destination_root: None,
        }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl TransferConfig {
    /// Problems that make this section unusable. Empty when disabled.
    ///
    /// Only `destinationRoot` is required. The connection fields are handed
    /// to the backend as [`Credentials`] and the directory backend ignores
    /// them.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.enabled {
            return problems;
        }
        match &self.destination_root {
            None => problems.push("Missing destinationRoot".to_string()),
            Some(root) if root.as_os_str().is_empty() => {
                problems.push("Missing destinationRoot".to_string())
            }
            Some(_) => {}
        }
        problems
    }

    /// Enabled and valid.
    pub fn is_usable(&self) -> bool {
        self.enabled && self.validate().is_empty()
    }

    pub fn credentials(&self) -> Credentials {
        let auth = match self.auth_method {
            AuthMethod::Password => Auth::Password(self.password.clone().unwrap_or_default()),
            AuthMethod::PublicKey => Auth::PublicKey {
                private_key_path: self.private_key_path.clone().unwrap_or_default(),
                passphrase: self.private_key_passphrase.clone(),
            },
        };
        Credentials {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            auth,
        }
    }

    /// Backend writing below `destinationRoot`, when one is configured.
    pub fn backend(&self) -> Option<DirectoryBackend> {
        self.destination_root
            .as_ref()
            .filter(|root| !root.as_os_str().is_empty())
            .map(|root| DirectoryBackend::new(root.clone()))
    }

    /// Remote path template, `/{world}` when left blank.
    pub fn remote_path_template(&self) -> String {
        if blank(&self.remote_path) {
            DEFAULT_REMOTE_PATH.to_string()
        } else {
            self.remote_path.trim().to_string()
        }
    }

    /// Options for the transfer manager.
    pub fn options(&self, data_dir: &Path, world_root: &Path) -> TransferOptions {
        TransferOptions {
            data_dir: data_dir.to_path_buf(),
            world_root: world_root.to_path_buf(),
            remote_path: self.remote_path_template(),
            credentials: self.credentials(),
            retry: RetryPolicy::new(self.retry_count),
            compression_level: self.compression_level,
            auto_transfer: self.auto_transfer,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}
