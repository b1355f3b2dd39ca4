//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    // Check for explicit override
    if let Ok(dir) = std::env::var("POLYSANDBOX_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    // Use XDG config directory or fallback
    dirs::config_dir()
        .map(|d| d.join("polysandbox"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("polysandbox"))
                .unwrap_or_else(|| PathBuf::from(".polysandbox"))
        })
}

/// Get the main configuration file path
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("POLYSANDBOX_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("config.json")
}

/// Get the state directory
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("POLYSANDBOX_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|d| d.join("polysandbox"))
        .unwrap_or_else(|| std::env::temp_dir().join("polysandbox"))
}

/// Get the root of the per-user workspaces
pub fn workspace_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("POLYSANDBOX_WORKSPACE") {
        return PathBuf::from(dir);
    }

    state_dir().join("workspaces")
}
