//! Sandbox orchestrator
//!
//! [`SandboxService`] is the public entry point: it validates a request,
//! builds its limits, picks a backend and records the outcome. `execute`
//! never fails; every problem is reported inside the returned
//! [`ExecutionResult`].

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionMode, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::container::ContainerBackend;
use crate::sandbox::executor::{
    ExecutionBackend, ExecutionMethod, ExecutionRequest, ExecutionResult, FailureKind,
    RunContext,
};
use crate::sandbox::history::{ExecutionHistory, ExecutionHistoryRecord, SandboxStats};
use crate::sandbox::limits::{ResourceLimiter, ResourceLimits};
use crate::sandbox::local::LocalBackend;
use crate::sandbox::policy::{SecurityLevel, SecurityPolicyEngine};
use crate::sandbox::registry::{LanguageInfo, LanguageRegistry, LanguageSpec};
use crate::sandbox::workspace::WorkspaceManager;

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Received,
    Validating,
    Rejected,
    Executing,
    Completed,
    TimedOut,
    Errored,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Received => "RECEIVED",
            ExecutionState::Validating => "VALIDATING",
            ExecutionState::Rejected => "REJECTED",
            ExecutionState::Executing => "EXECUTING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::TimedOut => "TIMED_OUT",
            ExecutionState::Errored => "ERRORED",
        };
        f.write_str(s)
    }
}

impl ExecutionState {
    /// Terminal state for a result that reached a backend
    fn of(result: &ExecutionResult) -> Self {
        match result.failure {
            None | Some(FailureKind::NonZeroExit) | Some(FailureKind::ResourceQuotaExceeded) => {
                ExecutionState::Completed
            }
            Some(FailureKind::Timeout) => ExecutionState::TimedOut,
            Some(_) => ExecutionState::Errored,
        }
    }
}

fn transition(execution_id: Uuid, state: ExecutionState) {
    debug!(%execution_id, %state, "execution state");
}

/// Request that passed validation
struct Admitted<'a> {
    spec: &'a LanguageSpec,
    limits: ResourceLimits,
}

/// Sandboxed code execution service
pub struct SandboxService {
    config: SandboxConfig,
    registry: LanguageRegistry,
    policies: SecurityPolicyEngine,
    workspaces: WorkspaceManager,
    history: ExecutionHistory,
    local: Arc<dyn ExecutionBackend>,
    container: Option<Arc<dyn ExecutionBackend>>,
}

impl std::fmt::Debug for SandboxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxService")
            .field("workspace_root", &self.config.workspace_root)
            .field("local", &self.local.name())
            .field("container", &self.container.as_ref().map(|c| c.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl SandboxService {
    /// Create the service, probing for Docker when enabled
    pub async fn new(config: SandboxConfig) -> Self {
        let container: Option<Arc<dyn ExecutionBackend>> = if config.container.enabled {
            match ContainerBackend::connect(&config.container).await {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!("Docker unavailable, container execution disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self::with_backends(config, Arc::new(LocalBackend::new()), container)
    }

    /// Create the service with explicit backends
    pub fn with_backends(
        config: SandboxConfig,
        local: Arc<dyn ExecutionBackend>,
        container: Option<Arc<dyn ExecutionBackend>>,
    ) -> Self {
        let registry = LanguageRegistry::new(&config.languages, &config.container.images);
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());

        info!(
            "Sandbox service ready: {} languages, workspace {}, docker {}",
            registry.supported_count(),
            config.workspace_root.display(),
            if container.is_some() { "enabled" } else { "disabled" }
        );

        SandboxService {
            config,
            registry,
            policies: SecurityPolicyEngine::new(),
            workspaces,
            history: ExecutionHistory::new(),
            local,
            container,
        }
    }

    /// Language registry
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Security policies
    pub fn policies(&self) -> &SecurityPolicyEngine {
        &self.policies
    }

    /// Workspace manager
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// New request carrying this deployment's default mode and tier
    pub fn request(
        &self,
        code: impl Into<String>,
        language: impl Into<String>,
    ) -> ExecutionRequest {
        ExecutionRequest::new(code, language)
            .with_mode(self.config.default_execution_mode)
            .with_security_level(self.config.default_security_level)
    }

    /// Execute a request and record the outcome
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        transition(execution_id, ExecutionState::Received);

        transition(execution_id, ExecutionState::Validating);
        let result = match self.admit(execution_id, &request) {
            Err(rejection) => {
                transition(execution_id, ExecutionState::Rejected);
                info!(
                    "Execution {} rejected ({}): {}",
                    execution_id, rejection.method, rejection.error
                );
                rejection
            }
            Ok(admitted) => {
                transition(execution_id, ExecutionState::Executing);
                let result = self.run(execution_id, &request, admitted).await;
                let state = ExecutionState::of(&result);
                transition(execution_id, state);
                info!(
                    "Execution {} for user {} finished: {} via {} in {:.3}s",
                    execution_id,
                    request.user_id,
                    state,
                    result.method,
                    started.elapsed().as_secs_f64()
                );
                result
            }
        };

        self.history
            .record(ExecutionHistoryRecord {
                execution_id,
                user_id: request.user_id.clone(),
                language: request.language.clone(),
                execution_mode: request.execution_mode,
                security_level: request.security_level,
                timestamp: Utc::now(),
                result: result.clone(),
            })
            .await;

        result
    }

    /// Validation steps that run before anything touches the filesystem
    fn admit<'a>(
        &'a self,
        execution_id: Uuid,
        request: &ExecutionRequest,
    ) -> std::result::Result<Admitted<'a>, ExecutionResult> {
        let tier_limits = self.policies.policy(request.security_level).limits;
        let reject = |method, failure, error: String| {
            ExecutionResult::refused(
                execution_id,
                request.language.as_str(),
                request.security_level,
                tier_limits,
                method,
                failure,
                error,
            )
        };

        let spec = match self.registry.resolve(&request.language) {
            Some(spec) if spec.supported => spec,
            Some(spec) => {
                return Err(reject(
                    ExecutionMethod::ValidationFailed,
                    FailureKind::UnsupportedLanguage,
                    format!("Language {} is not enabled", spec.language),
                ))
            }
            None => {
                return Err(reject(
                    ExecutionMethod::ValidationFailed,
                    FailureKind::UnsupportedLanguage,
                    format!("Unsupported language: {}", request.language),
                ))
            }
        };

        if request.code.trim().is_empty() {
            return Err(reject(
                ExecutionMethod::ValidationFailed,
                FailureKind::InvalidRequest,
                "Code must not be empty".to_string(),
            ));
        }
        if request.code.len() > self.config.max_code_bytes {
            return Err(reject(
                ExecutionMethod::ValidationFailed,
                FailureKind::InvalidRequest,
                format!(
                    "Code is {} bytes, limit is {}",
                    request.code.len(),
                    self.config.max_code_bytes
                ),
            ));
        }

        if let Err(violation) =
            self.policies
                .validate(&request.code, spec.language, request.security_level)
        {
            warn!("Execution {} blocked: {}", execution_id, violation);
            return Err(reject(
                ExecutionMethod::SecurityFailed,
                FailureKind::SecurityViolation,
                format!("Security violation: {}", violation),
            ));
        }

        let limits = ResourceLimiter::build(
            &self.policies,
            request.security_level,
            request.resource_limits,
        )
        .map_err(|e| {
            reject(
                ExecutionMethod::ValidationFailed,
                FailureKind::InvalidRequest,
                format!("Invalid resource limits: {}", e),
            )
        })?;

        Ok(Admitted { spec, limits })
    }

    async fn run(
        &self,
        execution_id: Uuid,
        request: &ExecutionRequest,
        admitted: Admitted<'_>,
    ) -> ExecutionResult {
        let infra_failure = |error: String| {
            ExecutionResult::refused(
                execution_id,
                request.language.as_str(),
                request.security_level,
                admitted.limits,
                ExecutionMethod::Error,
                FailureKind::BackendInfrastructureFailure,
                error,
            )
        };

        let workspace_dir = match self.workspaces.user_dir(&request.user_id).await {
            Ok(dir) => dir,
            Err(e) => return infra_failure(format!("Failed to prepare workspace: {}", e)),
        };
        let scratch = match self.workspaces.scratch(&request.user_id, execution_id).await {
            Ok(scratch) => scratch,
            Err(e) => return infra_failure(format!("Failed to prepare workspace: {}", e)),
        };

        let ctx = RunContext {
            execution_id,
            spec: admitted.spec,
            code: &request.code,
            language: &request.language,
            security_level: request.security_level,
            limits: admitted.limits,
            workspace_dir: &workspace_dir,
            exec_dir: scratch.path(),
            max_output_bytes: self.config.max_output_bytes,
        };

        let result = self.dispatch(request.execution_mode, &ctx).await;
        // Scratch directory goes away here, on every path
        drop(scratch);
        result
    }

    async fn dispatch(&self, mode: ExecutionMode, ctx: &RunContext<'_>) -> ExecutionResult {
        match mode {
            ExecutionMode::Local => self.run_local(ctx).await,
            ExecutionMode::Container => match &self.container {
                Some(container) => match container.run(ctx).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Container execution {} failed: {}", ctx.execution_id, e);
                        ctx.refused(
                            ExecutionMethod::Error,
                            FailureKind::BackendInfrastructureFailure,
                            format!("Container execution failed: {}", e),
                        )
                    }
                },
                None => ctx.refused(
                    ExecutionMethod::Error,
                    FailureKind::BackendInfrastructureFailure,
                    "Container execution requested but Docker is not available",
                ),
            },
            ExecutionMode::Auto => {
                let Some(container) = self.container.as_ref() else {
                    return self.run_local(ctx).await;
                };
                if !container.is_available().await {
                    debug!("Docker not answering, running {} locally", ctx.execution_id);
                    return self.run_local(ctx).await;
                }
                match container.run(ctx).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(
                            "Container execution {} failed, falling back to local: {}",
                            ctx.execution_id, e
                        );
                        let mut result = self.run_local(ctx).await;
                        result
                            .metadata
                            .insert("fallback_from".into(), Value::from(container.name()));
                        result
                            .metadata
                            .insert("fallback_reason".into(), Value::from(e.to_string()));
                        result
                    }
                }
            }
        }
    }

    async fn run_local(&self, ctx: &RunContext<'_>) -> ExecutionResult {
        match self.local.run(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Local execution {} failed: {}", ctx.execution_id, e);
                ctx.refused(
                    ExecutionMethod::Error,
                    FailureKind::BackendInfrastructureFailure,
                    format!("Local execution failed: {}", e),
                )
            }
        }
    }

    /// Check code against a tier without running it
    pub fn validate_code(&self, code: &str, language: &str, level: SecurityLevel) -> Result<()> {
        let spec = self
            .registry
            .resolve(language)
            .ok_or_else(|| Error::InvalidInput(format!("Unsupported language: {}", language)))?;
        self.policies.validate(code, spec.language, level)?;
        Ok(())
    }

    /// Every registry entry with its support flag
    pub fn supported_languages(&self) -> BTreeMap<String, LanguageInfo> {
        self.registry.describe()
    }

    /// Recent executions, newest first
    pub async fn history(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<ExecutionHistoryRecord> {
        self.history.query(user_id, limit).await
    }

    /// Whether a container backend exists and answers right now
    pub async fn docker_available(&self) -> bool {
        match &self.container {
            Some(container) => container.is_available().await,
            None => false,
        }
    }

    /// Aggregate statistics
    pub async fn stats(&self) -> SandboxStats {
        let (total, successful) = self.history.counts().await;
        SandboxStats {
            active_users: self.workspaces.active_users().await,
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            supported_languages: self.registry.supported_count(),
            docker_available: self.docker_available().await,
            timestamp: Utc::now(),
        }
    }

    /// Delete a user's workspace and history. Returns whether anything
    /// existed.
    pub async fn cleanup_user(&self, user_id: &str) -> Result<bool> {
        let records = self.history.remove_user(user_id).await;
        let workspace = self.workspaces.remove_user(user_id).await?;
        info!(
            "Cleaned up user {}: {} history records, workspace {}",
            user_id,
            records,
            if workspace { "removed" } else { "absent" }
        );
        Ok(records > 0 || workspace)
    }
}
