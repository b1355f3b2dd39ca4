//! # Polysandbox
//!
//! Sandboxed execution of untrusted code in several languages.
//!
//! ## Features
//!
//! - **Two Backends:** local child processes or ephemeral Docker containers
//! - **Security Tiers:** cumulative deny-lists from `low` to `maximum`
//! - **Resource Limits:** memory, CPU, wall-clock, file size and file count
//! - **Per-User Workspaces:** isolated directories with guaranteed cleanup
//! - **History:** every request, rejected or not, is recorded
//!
//! ```no_run
//! use polysandbox::{Config, ExecutionRequest, SandboxService};
//!
//! # async fn demo() -> polysandbox::Result<()> {
//! let config = Config::from_env()?;
//! let service = SandboxService::new(config.sandbox).await;
//! let result = service
//!     .execute(ExecutionRequest::new("print(1 + 1)", "python"))
//!     .await;
//! assert_eq!(result.output.trim(), "2");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod sandbox;

pub use config::Config;
pub use error::{Error, Result};
pub use sandbox::{
    ExecutionMethod, ExecutionMode, ExecutionRequest, ExecutionResult, FailureKind, Language,
    ResourceLimits, SandboxService, SecurityLevel,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
