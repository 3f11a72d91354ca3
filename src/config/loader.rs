// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the working
//! directory and the user's config directory.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::FileConfig;

/// Workspace config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    "chunkfleet.json",
    "chunkfleet.yaml",
    "chunkfleet.yml",
    ".chunkfleet.json",
    ".chunkfleet.yaml",
    ".chunkfleet.yml",
];

/// Global config directory name under the platform config dir.
pub const GLOBAL_CONFIG_DIR: &str = "chunkfleet";

/// Global config file names.
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.json", "config.yaml"];

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(GLOBAL_CONFIG_DIR))
}

/// Load the global configuration, if present.
pub fn load_global_config() -> Result<Option<FileConfig>, ConfigError> {
    match get_global_config_dir() {
        Some(dir) => load_first(&dir, GLOBAL_CONFIG_FILES),
        None => Ok(None),
    }
}

/// Load workspace configuration from `root`.
pub fn load_workspace_config(root: &Path) -> Result<Option<FileConfig>, ConfigError> {
    load_first(root, CONFIG_FILES)
}

fn load_first(dir: &Path, names: &[&str]) -> Result<Option<FileConfig>, ConfigError> {
    for name in names {
        let path = dir.join(name);
        if path.is_file() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML by extension).
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Path of the workspace config file in `root`, if any.
pub fn find_workspace_config(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_workspace_config() {
        let temp = TempDir::new().unwrap();
        assert!(load_workspace_config(temp.path()).unwrap().is_none());
        assert!(find_workspace_config(temp.path()).is_none());
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("chunkfleet.json"),
            r#"{"hostPort": 26000, "transfer": {"enabled": true, "retryCount": 5}}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.host_port, Some(26000));
        let transfer = config.transfer.unwrap();
        assert_eq!(transfer.enabled, Some(true));
        assert_eq!(transfer.retry_count, Some(5));
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".chunkfleet.yml"),
            "hostParticipates: true\nengine:\n  command: gen\n  args: [\"{world}\"]\n",
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.host_participates, Some(true));
        assert_eq!(config.engine.unwrap().args, vec!["{world}".to_string()]);
    }

    #[test]
    fn test_json_wins_over_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("chunkfleet.json"), r#"{"hostPort": 1}"#).unwrap();
        std::fs::write(temp.path().join("chunkfleet.yaml"), "hostPort: 2\n").unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.host_port, Some(1));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("chunkfleet.json"), "{ nope").unwrap();
        assert!(matches!(
            load_workspace_config(temp.path()),
            Err(ConfigError::JsonError(_))
        ));
    }
}
