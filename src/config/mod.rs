// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for chunkfleet.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: `<config dir>/chunkfleet/config.json` or `config.yaml`
//! - Workspace config: `chunkfleet.json`, `chunkfleet.yaml` or a dotted variant
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_config, get_global_config_dir, load_config_file, load_global_config,
    load_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILES,
};

pub use merger::{default_config, merge_config, CliOptions, COMPRESSION_LEVELS};

pub use types::{
    default_data_dir, AuthMethod, FileConfig, ResolvedConfig, TransferConfig, TransferFileConfig,
    CHUNK_LIST_DIR, DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_RETRY_COUNT, DEFAULT_STALE_AFTER_SECS,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    Ok(merge_config(global, workspace, cli_options))
}
