//! Sandbox module - Secure code execution environments
//!
//! Provides two execution backends behind one orchestrator:
//! - Local Mode: child process with rlimits and a hard wall-clock kill
//! - Container Mode: ephemeral Docker containers without network
//!
//! Requests pass a language check and a per-tier security filter before
//! either backend sees them.

mod container;
mod executor;
mod history;
mod limits;
mod local;
mod policy;
mod registry;
mod service;
mod workspace;

pub use container::ContainerBackend;
pub use executor::{
    ExecutionBackend, ExecutionMethod, ExecutionRequest, ExecutionResult, FailureKind,
    RunContext,
};
pub use history::{ExecutionHistory, ExecutionHistoryRecord, SandboxStats};
pub use limits::{ContainerEnforcement, LocalEnforcement, ResourceLimiter, ResourceLimits};
pub use local::{LocalBackend, ProcessUsage};
pub use policy::{SecurityLevel, SecurityPolicy, SecurityPolicyEngine, SecurityViolation};
pub use registry::{Language, LanguageInfo, LanguageRegistry, LanguageSpec};
pub use service::{ExecutionState, SandboxService};
pub use workspace::{ScratchDir, WorkspaceManager};

pub use crate::config::ExecutionMode;
