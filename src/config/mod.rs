//! Configuration module - Modular configuration management
//!
//! - types/mod.rs: Core configuration types (Config, LoggingConfig)
//! - types/sandbox.rs: Sandbox/execution configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, LoggingConfig};

// Re-export sandbox types
pub use types::sandbox::{ContainerConfig, ExecutionMode, LanguagesConfig, SandboxConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, state_dir, workspace_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
