//! Common backend trait and request/result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::error::Result;
use crate::sandbox::limits::ResourceLimits;
use crate::sandbox::policy::SecurityLevel;
use crate::sandbox::registry::LanguageSpec;

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,
    /// Language name or alias, resolved through the registry
    pub language: String,
    /// Owner of the workspace; namespacing only, not authentication
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Replaces the tier's default limits when present
    #[serde(default)]
    pub resource_limits: Option<ResourceLimits>,
}

fn default_user() -> String {
    "default".to_string()
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            language: language.into(),
            user_id: default_user(),
            security_level: SecurityLevel::default(),
            execution_mode: ExecutionMode::default(),
            resource_limits: None,
        }
    }

    /// Set the user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Set the security tier
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Override the tier's resource limits
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }
}

/// How a result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    Local,
    Docker,
    ValidationFailed,
    SecurityFailed,
    Timeout,
    Error,
}

impl std::fmt::Display for ExecutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionMethod::Local => "local",
            ExecutionMethod::Docker => "docker",
            ExecutionMethod::ValidationFailed => "validation_failed",
            ExecutionMethod::SecurityFailed => "security_failed",
            ExecutionMethod::Timeout => "timeout",
            ExecutionMethod::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Language unknown or disabled in this deployment
    UnsupportedLanguage,
    /// Empty or oversized code, or out-of-range limits
    InvalidRequest,
    /// Deny-listed token found in the code
    SecurityViolation,
    /// Interpreter or compiler missing
    SpawnFailure,
    /// Wall-clock limit hit; the process or container was killed
    Timeout,
    /// The program ran and exited non-zero
    NonZeroExit,
    /// The program exceeded its file quota
    ResourceQuotaExceeded,
    /// Container runtime unreachable, image pull failure and the like
    BackendInfrastructureFailure,
}

/// Result of code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution was successful
    pub success: bool,
    /// Standard output
    pub output: String,
    /// Standard error, or the reason the run was refused
    pub error: String,
    pub execution_time_seconds: f64,
    /// Peak memory in MiB, 0 when unmeasured
    pub memory_usage_mb: f64,
    /// Average CPU usage over the run in percent of one core, 0 when unmeasured
    pub cpu_usage_percent: f64,
    pub language: String,
    pub method: ExecutionMethod,
    pub security_level: SecurityLevel,
    pub resource_limits: ResourceLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Always carries `execution_id`
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    /// Result for a request that never reached a backend, or whose backend
    /// could not start
    pub fn refused(
        execution_id: Uuid,
        language: impl Into<String>,
        security_level: SecurityLevel,
        resource_limits: ResourceLimits,
        method: ExecutionMethod,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        ExecutionResult {
            success: false,
            output: String::new(),
            error: error.into(),
            execution_time_seconds: 0.0,
            memory_usage_mb: 0.0,
            cpu_usage_percent: 0.0,
            language: language.into(),
            method,
            security_level,
            resource_limits,
            exit_code: None,
            failure: Some(failure),
            metadata: base_metadata(execution_id),
        }
    }

    /// Execution ID recorded in the metadata
    pub fn execution_id(&self) -> Option<&str> {
        self.metadata.get("execution_id").and_then(Value::as_str)
    }
}

/// Metadata map seeded with the execution ID
pub fn base_metadata(execution_id: Uuid) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("execution_id".into(), Value::String(execution_id.to_string()));
    metadata
}

/// Decode captured bytes, cutting at `max_bytes` on a char boundary
///
/// Returns the text and whether anything was dropped.
pub fn decode_output(bytes: &[u8], max_bytes: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return (text.into_owned(), false);
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = text[..cut].to_string();
    truncated.push_str("\n[output truncated]");
    (truncated, true)
}

/// Everything a backend needs to run one request
#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub execution_id: Uuid,
    pub spec: &'a LanguageSpec,
    pub code: &'a str,
    pub language: &'a str,
    pub security_level: SecurityLevel,
    pub limits: ResourceLimits,
    /// The user's workspace directory on the host
    pub workspace_dir: &'a Path,
    /// Execution-scoped directory inside the workspace; removed after the run
    pub exec_dir: &'a Path,
    /// Per-stream capture limit
    pub max_output_bytes: usize,
}

impl RunContext<'_> {
    /// Refusal result carrying this context's identity
    pub fn refused(
        &self,
        method: ExecutionMethod,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> ExecutionResult {
        ExecutionResult::refused(
            self.execution_id,
            self.language,
            self.security_level,
            self.limits,
            method,
            failure,
            error,
        )
    }

    /// Name of the execution directory inside the workspace
    pub fn exec_dir_name(&self) -> String {
        self.exec_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.execution_id.to_string())
    }

    /// Write the source into the execution directory
    pub async fn stage_source(&self) -> Result<std::path::PathBuf> {
        let path = self.exec_dir.join(self.spec.source_file);
        tokio::fs::write(&path, self.code).await?;
        Ok(path)
    }

    /// Mark `result` failed when the run created more files than allowed
    ///
    /// Returns whether the quota was exceeded.
    pub fn enforce_file_quota(&self, result: &mut ExecutionResult) -> bool {
        let created = count_created_files(self.exec_dir, self.spec.source_file);
        if created <= self.limits.max_files {
            return false;
        }

        result.success = false;
        result.failure = Some(FailureKind::ResourceQuotaExceeded);
        result.metadata.insert("file_quota_exceeded".into(), Value::Bool(true));
        result.metadata.insert("files_created".into(), Value::from(created));
        let reason = format!(
            "File quota exceeded: created {} files, limit {}",
            created, self.limits.max_files
        );
        result.error = if result.error.is_empty() {
            reason
        } else {
            format!("{}\n{}", result.error, reason)
        };
        true
    }
}

/// Count files the program created, ignoring the staged source and
/// dot-directories used by toolchain caches
fn count_created_files(dir: &Path, source_file: &str) -> u64 {
    fn walk(dir: &Path, top: bool, source_file: &str) -> u64 {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut count = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !name.starts_with('.') {
                    count += walk(&entry.path(), false, source_file);
                }
            } else if !(top && name == source_file) {
                count += 1;
            }
        }
        count
    }
    walk(dir, true, source_file)
}

/// Trait for code execution backends
///
/// `run` returns `Err` only for infrastructure failures that happen before
/// the program started, which the orchestrator may answer with a fallback.
/// Once the program has started, every outcome comes back as an `Ok`
/// result, including infrastructure trouble while collecting it.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Whether the backend can accept work right now
    async fn is_available(&self) -> bool {
        true
    }

    /// Execute one request
    async fn run(&self, ctx: &RunContext<'_>) -> Result<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::policy::SecurityLevel;
    use crate::sandbox::registry::{Language, LanguageRegistry};

    #[test]
    fn test_execution_request() {
        let req = ExecutionRequest::new("print('hello')", "python")
            .with_user("alice")
            .with_security_level(SecurityLevel::High)
            .with_mode(ExecutionMode::Local);

        assert_eq!(req.code, "print('hello')");
        assert_eq!(req.language, "python");
        assert_eq!(req.user_id, "alice");
        assert_eq!(req.security_level, SecurityLevel::High);
        assert_eq!(req.execution_mode, ExecutionMode::Local);
        assert!(req.resource_limits.is_none());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: ExecutionRequest = serde_json::from_str(
            r#"{"code": "1", "language": "py", "execution_mode": "docker",
                "resource_limits": {"timeout_seconds": 3}}"#,
        )
        .unwrap();
        assert_eq!(req.user_id, "default");
        assert_eq!(req.execution_mode, ExecutionMode::Container);
        assert_eq!(req.resource_limits.unwrap().timeout_seconds, 3);
    }

    #[test]
    fn test_refused_result() {
        let id = Uuid::new_v4();
        let result = ExecutionResult::refused(
            id,
            "cobol",
            SecurityLevel::Low,
            ResourceLimits::default(),
            ExecutionMethod::ValidationFailed,
            FailureKind::UnsupportedLanguage,
            "Unsupported language: cobol",
        );
        assert!(!result.success);
        assert_eq!(result.execution_id(), Some(id.to_string().as_str()));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["method"], "validation_failed");
        assert_eq!(json["failure"], "unsupported_language");
    }

    #[test]
    fn test_count_created_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "").unwrap();
        std::fs::write(dir.path().join("out.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("a"), "").unwrap();
        std::fs::create_dir(dir.path().join(".gocache")).unwrap();
        std::fs::write(dir.path().join(".gocache").join("b"), "").unwrap();
        assert_eq!(count_created_files(dir.path(), "main.py"), 2);
    }

    #[test]
    fn test_enforce_file_quota() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let registry = LanguageRegistry::default();
        let mut ctx = RunContext {
            execution_id: Uuid::new_v4(),
            spec: registry.get(Language::Python).unwrap(),
            code: "",
            language: "python",
            security_level: SecurityLevel::Low,
            limits: ResourceLimits::new(64, 50.0, 5, 1, 3).unwrap(),
            workspace_dir: dir.path(),
            exec_dir: dir.path(),
            max_output_bytes: 1024,
        };

        let mut result = ctx.refused(ExecutionMethod::Docker, FailureKind::NonZeroExit, "");
        result.success = true;
        result.failure = None;
        assert!(!ctx.enforce_file_quota(&mut result));
        assert!(result.success);

        ctx.limits.max_files = 2;
        assert!(ctx.enforce_file_quota(&mut result));
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::ResourceQuotaExceeded));
        assert_eq!(result.metadata["files_created"], Value::from(3u64));
        assert!(result.error.contains("limit 2"));
    }

    #[test]
    fn test_decode_output_truncates_on_char_boundary() {
        let (text, truncated) = decode_output("héllo".as_bytes(), 2);
        assert!(truncated);
        assert!(text.starts_with('h'));
        assert!(text.ends_with("[output truncated]"));

        let (text, truncated) = decode_output(b"short", 100);
        assert!(!truncated);
        assert_eq!(text, "short");
    }
}
