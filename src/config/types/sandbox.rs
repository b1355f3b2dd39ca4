//! Sandbox configuration types
//!
//! Configuration for the code execution service (workspace, languages,
//! container runtime)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::sandbox::SecurityLevel;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Execution mode of requests built with `SandboxService::request`
    #[serde(default)]
    pub default_execution_mode: ExecutionMode,
    /// Security tier of requests built with `SandboxService::request`
    #[serde(default)]
    pub default_security_level: SecurityLevel,
    /// Root directory holding one workspace per user
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Largest accepted source text in bytes
    #[serde(default = "default_max_code")]
    pub max_code_bytes: usize,
    /// Maximum captured output size in bytes (per stream)
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Language support overrides
    #[serde(default)]
    pub languages: LanguagesConfig,
    /// Container configuration
    #[serde(default)]
    pub container: ContainerConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            default_execution_mode: ExecutionMode::default(),
            default_security_level: SecurityLevel::default(),
            workspace_root: default_workspace_root(),
            max_code_bytes: default_max_code(),
            max_output_bytes: default_max_output(),
            languages: LanguagesConfig::default(),
            container: ContainerConfig::default(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    crate::config::workspace_dir()
}

fn default_max_code() -> usize {
    64 * 1024
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

/// Execution mode requested for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Container when a runtime is reachable, local otherwise
    #[default]
    Auto,
    /// Child process on the host
    Local,
    /// Ephemeral Docker container
    #[serde(alias = "docker")]
    Container,
}

impl std::str::FromStr for ExecutionMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ExecutionMode::Auto),
            "local" | "os" => Ok(ExecutionMode::Local),
            "container" | "docker" => Ok(ExecutionMode::Container),
            _ => Err(crate::error::Error::InvalidInput(format!(
                "Invalid execution mode: {}. Valid: auto, local, docker",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Auto => write!(f, "auto"),
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Container => write!(f, "docker"),
        }
    }
}

/// Per-deployment language switches
///
/// Names are matched through the registry's alias table, so `py` and
/// `python` address the same entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagesConfig {
    /// Languages to force on
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Languages to force off (wins over `enabled`)
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Probe for a Docker daemon at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Budget for pulling a missing image, separate from the run timeout
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    /// CFS period used to derive the CPU quota, in microseconds
    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    /// Mount point of the user workspace inside the container
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Size of the writable /tmp tmpfs
    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size: String,
    /// Image overrides keyed by language name
    #[serde(default)]
    pub images: HashMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            enabled: true,
            pull_timeout_secs: default_pull_timeout(),
            cpu_period: default_cpu_period(),
            pids_limit: default_pids_limit(),
            mount_path: default_mount_path(),
            tmpfs_size: default_tmpfs_size(),
            images: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pull_timeout() -> u64 {
    120
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_pids_limit() -> i64 {
    64
}

fn default_mount_path() -> String {
    "/workspace".to_string()
}

fn default_tmpfs_size() -> String {
    "16m".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("auto".parse::<ExecutionMode>().unwrap(), ExecutionMode::Auto);
        assert_eq!("LOCAL".parse::<ExecutionMode>().unwrap(), ExecutionMode::Local);
        assert_eq!(
            "docker".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Container
        );
        assert!("wasm".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_execution_mode_serde_alias() {
        let mode: ExecutionMode = serde_json::from_str("\"docker\"").unwrap();
        assert_eq!(mode, ExecutionMode::Container);
        assert_eq!(ExecutionMode::Container.to_string(), "docker");
    }

    #[test]
    fn test_sandbox_config_default() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_execution_mode, ExecutionMode::Auto);
        assert_eq!(config.default_security_level, SecurityLevel::Medium);
        assert_eq!(config.container.pull_timeout_secs, 120);
        assert_eq!(config.container.mount_path, "/workspace");
    }
}
