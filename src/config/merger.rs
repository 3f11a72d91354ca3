// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.
//! Out-of-range values are reported and replaced by their defaults.

use std::path::PathBuf;

use tracing::warn;

use super::types::{
    FileConfig, ResolvedConfig, TransferConfig, TransferFileConfig, CHUNK_LIST_DIR,
    DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_RETRY_COUNT, DEFAULT_STALE_AFTER_SECS,
};
use crate::network::{DEFAULT_HOST_PORT, DEFAULT_TRANSFER_PORT};
use crate::transfer::DEFAULT_COMPRESSION_LEVEL;

/// Valid zstd levels.
pub const COMPRESSION_LEVELS: std::ops::RangeInclusive<i32> = 1..=19;

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub host_port: Option<u16>,
    pub host_participates: Option<bool>,
    pub data_dir: Option<PathBuf>,
    pub world_dir: Option<PathBuf>,
    pub engine_command: Option<String>,
    pub no_transfer: bool,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (chunkfleet.json)
/// 3. Global config (~/.config/chunkfleet/config.json)
/// 4. Default values
pub fn merge_config(
    global: Option<FileConfig>,
    workspace: Option<FileConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();
    let mut chunk_list_dir = None;

    for config in [global, workspace].into_iter().flatten() {
        apply_file_config(&mut result, &config);
        if config.chunk_list_dir.is_some() {
            chunk_list_dir = config.chunk_list_dir.clone();
        }
    }

    apply_cli_options(&mut result, &cli);

    // Chunk lists follow the data directory unless placed explicitly.
    result.chunk_list_dir = chunk_list_dir.unwrap_or_else(|| result.data_dir.join(CHUNK_LIST_DIR));
    result
}

fn apply_file_config(result: &mut ResolvedConfig, config: &FileConfig) {
    if let Some(port) = config.host_port {
        result.host_port = checked("hostPort", port, port != 0, DEFAULT_HOST_PORT);
    }

    if let Some(participates) = config.host_participates {
        result.host_participates = participates;
    }

    if let Some(secs) = config.stale_after_secs {
        result.stale_after_secs = checked("staleAfterSecs", secs, secs > 0, DEFAULT_STALE_AFTER_SECS);
    }

    if let Some(secs) = config.reconnect_delay_secs {
        result.reconnect_delay_secs =
            checked("reconnectDelaySecs", secs, secs > 0, DEFAULT_RECONNECT_DELAY_SECS);
    }

    if let Some(ref dir) = config.data_dir {
        result.data_dir = dir.clone();
    }

    if let Some(ref dir) = config.world_dir {
        result.world_dir = dir.clone();
    }

    if config.engine.is_some() {
        result.engine = config.engine.clone();
    }

    if let Some(ref transfer) = config.transfer {
        apply_transfer_config(&mut result.transfer, transfer);
    }
}

fn apply_transfer_config(result: &mut TransferConfig, config: &TransferFileConfig) {
    if let Some(enabled) = config.enabled {
        result.enabled = enabled;
    }
    if let Some(ref hostname) = config.hostname {
        result.hostname = hostname.clone();
    }
    if let Some(port) = config.port {
        result.port = checked("transfer.port", port, port != 0, DEFAULT_TRANSFER_PORT);
    }
    if let Some(ref username) = config.username {
        result.username = username.clone();
    }
    if let Some(method) = config.auth_method {
        result.auth_method = method;
    }
    if config.password.is_some() {
        result.password = config.password.clone();
    }
    if config.private_key_path.is_some() {
        result.private_key_path = config.private_key_path.clone();
    }
    if config.private_key_passphrase.is_some() {
        result.private_key_passphrase = config.private_key_passphrase.clone();
    }
    if let Some(ref remote) = config.remote_path {
        result.remote_path = remote.clone();
    }
    if let Some(auto) = config.auto_transfer {
        result.auto_transfer = auto;
    }
    if let Some(count) = config.retry_count {
        result.retry_count = checked("transfer.retryCount", count, count > 0, DEFAULT_RETRY_COUNT);
    }
    if let Some(level) = config.compression_level {
        result.compression_level = checked(
            "transfer.compressionLevel",
            level,
            COMPRESSION_LEVELS.contains(&level),
            DEFAULT_COMPRESSION_LEVEL,
        );
    }
    if config.destination_root.is_some() {
        result.destination_root = config.destination_root.clone();
    }
}

fn checked<T: std::fmt::Display>(field: &str, value: T, valid: bool, default: T) -> T {
    if valid {
        value
    } else {
        warn!("Invalid value for {}: {}, using {}", field, value, default);
        default
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(port) = cli.host_port {
        result.host_port = port;
    }

    if let Some(participates) = cli.host_participates {
        result.host_participates = participates;
    }

    if let Some(ref dir) = cli.data_dir {
        result.data_dir = dir.clone();
    }

    if let Some(ref dir) = cli.world_dir {
        result.world_dir = dir.clone();
    }

    if let Some(ref command) = cli.engine_command {
        let args = result.engine.take().map(|spec| spec.args).unwrap_or_default();
        result.engine = Some(crate::engine::CommandSpec::new(command.clone(), args));
    }

    if cli.no_transfer {
        result.transfer.enabled = false;
    }
}
