//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the
/// highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Overlay values produced by `lookup` onto `config`.
///
/// Unparseable values are ignored with a warning so that a typo in one
/// variable does not prevent startup.
pub(crate) fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let sandbox = &mut config.sandbox;

    if let Some(mode) = lookup("SANDBOX_EXECUTION_MODE") {
        match mode.parse() {
            Ok(mode) => sandbox.default_execution_mode = mode,
            Err(e) => tracing::warn!("Ignoring SANDBOX_EXECUTION_MODE: {}", e),
        }
    }
    if let Some(level) = lookup("SANDBOX_SECURITY_LEVEL") {
        match level.parse() {
            Ok(level) => sandbox.default_security_level = level,
            Err(e) => tracing::warn!("Ignoring SANDBOX_SECURITY_LEVEL: {}", e),
        }
    }
    if let Some(root) = lookup("SANDBOX_WORKSPACE_ROOT") {
        sandbox.workspace_root = std::path::PathBuf::from(root);
    }
    if let Some(v) = lookup("SANDBOX_DOCKER_ENABLED") {
        sandbox.container.enabled = v == "true" || v == "1";
    }
    if let Some(v) = lookup("SANDBOX_PULL_TIMEOUT") {
        if let Ok(v) = v.parse() {
            sandbox.container.pull_timeout_secs = v;
        }
    }
    if let Some(v) = lookup("SANDBOX_MAX_OUTPUT_BYTES") {
        if let Ok(v) = v.parse() {
            sandbox.max_output_bytes = v;
        }
    }
    if let Some(list) = lookup("SANDBOX_ENABLED_LANGUAGES") {
        sandbox.languages.enabled = split_list(&list);
    }
    if let Some(list) = lookup("SANDBOX_DISABLED_LANGUAGES") {
        sandbox.languages.disabled = split_list(&list);
    }

    if let Some(filter) = lookup("POLYSANDBOX_LOG") {
        config.logging.filter = filter;
    }
    if let Some(v) = lookup("POLYSANDBOX_LOG_JSON") {
        config.logging.json = v == "true" || v == "1";
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::sandbox::SecurityLevel;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.json");

        let mut config = Config::default();
        config.sandbox.max_code_bytes = 4096;
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.sandbox.max_code_bytes, 4096);
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.sandbox.default_security_level = SecurityLevel::High;
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.sandbox.default_security_level, SecurityLevel::High);
    }

    #[test]
    fn test_apply_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SANDBOX_EXECUTION_MODE", "docker"),
            ("SANDBOX_SECURITY_LEVEL", "maximum"),
            ("SANDBOX_DOCKER_ENABLED", "0"),
            ("SANDBOX_PULL_TIMEOUT", "15"),
            ("SANDBOX_ENABLED_LANGUAGES", "Java, go,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.sandbox.default_execution_mode, ExecutionMode::Container);
        assert_eq!(config.sandbox.default_security_level, SecurityLevel::Maximum);
        assert!(!config.sandbox.container.enabled);
        assert_eq!(config.sandbox.container.pull_timeout_secs, 15);
        assert_eq!(config.sandbox.languages.enabled, vec!["java", "go"]);
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, |k| {
            (k == "SANDBOX_EXECUTION_MODE").then(|| "teleport".to_string())
        });
        assert_eq!(config.sandbox.default_execution_mode, ExecutionMode::Auto);
    }
}
