//! Local process execution
//!
//! Runs the language's command as a child process of the service, under the
//! service's own user. The wall-clock timeout is hard (SIGKILL to the whole
//! process group); CPU time and file size are capped with rlimits; memory is
//! measured from `wait4` rusage but not enforced. Use the container backend
//! when kernel-level isolation is required.

use async_trait::async_trait;
use serde_json::Value;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sandbox::executor::{
    base_metadata, decode_output, ExecutionBackend, ExecutionMethod, ExecutionResult,
    FailureKind, RunContext,
};
use crate::sandbox::limits::LocalEnforcement;

/// How long to wait for the output pipes to close once the group is dead
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Local process executor
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    /// Host PATH handed to children
    path_env: Option<String>,
}

impl LocalBackend {
    /// Create a new local backend
    pub fn new() -> Self {
        LocalBackend {
            path_env: std::env::var("PATH").ok(),
        }
    }

    /// Find the runtime binary, falling back from python3 to python
    fn locate_runtime(&self, program: &str) -> Option<PathBuf> {
        let lookup = |name: &str| match &self.path_env {
            Some(path) => which::which_in(name, Some(path), "/").ok(),
            None => which::which(name).ok(),
        };
        lookup(program).or_else(|| match program {
            "python3" => lookup("python"),
            _ => None,
        })
    }

    fn build_command(&self, ctx: &RunContext<'_>, program: &Path) -> Command {
        let dir = ctx.exec_dir.to_string_lossy().into_owned();

        let mut command = Command::new(program);
        command
            .args(ctx.spec.command.iter().skip(1))
            .current_dir(ctx.exec_dir)
            .env_clear()
            .env("HOME", &dir)
            .env("TMPDIR", &dir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so a timeout kill reaches grandchildren too
            .process_group(0);

        if let Some(path) = &self.path_env {
            command.env("PATH", path);
        }
        for (key, value) in ctx.spec.env_for(&dir) {
            command.env(key, value);
        }

        let plan = ctx.limits.local_enforcement();
        // SAFETY: the closure runs between fork and exec and only calls
        // setrlimit, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || apply_rlimits(&plan));
        }

        command
    }
}

fn apply_rlimits(plan: &LocalEnforcement) -> std::io::Result<()> {
    let cpu = libc::rlimit {
        rlim_cur: plan.cpu_seconds as libc::rlim_t,
        rlim_max: plan.cpu_seconds as libc::rlim_t,
    };
    let fsize = libc::rlimit {
        rlim_cur: plan.file_size_bytes as libc::rlim_t,
        rlim_max: plan.file_size_bytes as libc::rlim_t,
    };
    let core = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: plain FFI calls with valid pointers to stack values.
    unsafe {
        if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0
            || libc::setrlimit(libc::RLIMIT_FSIZE, &fsize) != 0
            || libc::setrlimit(libc::RLIMIT_CORE, &core) != 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Resource usage reported by `wait4`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    /// Peak resident set size in KiB
    pub max_rss_kb: u64,
    /// User plus system CPU time
    pub cpu_time: Duration,
}

impl ProcessUsage {
    fn from_rusage(usage: &libc::rusage) -> Self {
        let micros = |tv: libc::timeval| tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64;

        // macOS reports bytes, Linux KiB
        #[cfg(target_os = "macos")]
        let max_rss_kb = usage.ru_maxrss as u64 / 1024;
        #[cfg(not(target_os = "macos"))]
        let max_rss_kb = usage.ru_maxrss as u64;

        ProcessUsage {
            max_rss_kb,
            cpu_time: Duration::from_micros(micros(usage.ru_utime) + micros(usage.ru_stime)),
        }
    }

    /// Average CPU usage over `wall` in percent of one core
    pub fn cpu_percent(&self, wall: Duration) -> f64 {
        if wall.is_zero() {
            return 0.0;
        }
        self.cpu_time.as_secs_f64() / wall.as_secs_f64() * 100.0
    }
}

/// Block until `pid` exits, returning its wait status and rusage
fn wait_for_exit(pid: libc::pid_t) -> std::io::Result<(libc::c_int, ProcessUsage)> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; zeroed is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: valid out-pointers; pid is our own unreaped child.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            return Ok((status, ProcessUsage::from_rusage(&usage)));
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn exit_code(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    }
}

/// SIGKILL every process left in the child's group
///
/// The child leads its group from before exec, so this reaches the child
/// itself while unreaped and anything it left running in the background.
fn kill_group(pid: libc::pid_t) {
    // SAFETY: signalling our own process group; ESRCH (already gone) is
    // harmless.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

/// Kills the process group if the run future is dropped before the child
/// was reaped
struct KillOnDrop {
    pid: libc::pid_t,
    armed: bool,
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("Execution abandoned, killing process group {}", self.pid);
            kill_group(self.pid);
        }
    }
}

/// Bytes read from one pipe so far
type Captured = Arc<Mutex<Vec<u8>>>;

/// Read a pipe to EOF into `sink`, keeping at most `cap + 1` bytes
fn drain_capped<R: Read>(mut reader: R, cap: usize, sink: &Mutex<Vec<u8>>) {
    let keep = cap.saturating_add(1);
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let Ok(mut kept) = sink.lock() else {
                    break;
                };
                let room = keep.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Blocking reader for one output pipe
struct PipeReader {
    handle: tokio::task::JoinHandle<()>,
    captured: Captured,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(pipe: R, cap: usize) -> Self {
        let captured = Captured::default();
        let sink = Arc::clone(&captured);
        let handle = tokio::task::spawn_blocking(move || drain_capped(pipe, cap, &sink));
        PipeReader { handle, captured }
    }

    /// Wait briefly for EOF, then return whatever was read
    async fn collect(self) -> Vec<u8> {
        match tokio::time::timeout(DRAIN_GRACE, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader failed: {}", e),
            Err(_) => warn!("Output pipe still open after process exit"),
        }
        self.captured
            .lock()
            .map(|mut bytes| std::mem::take(&mut *bytes))
            .unwrap_or_default()
    }
}

async fn collect(reader: Option<PipeReader>) -> Vec<u8> {
    match reader {
        Some(reader) => reader.collect().await,
        None => Vec::new(),
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn run(&self, ctx: &RunContext<'_>) -> Result<ExecutionResult> {
        let runtime = ctx.spec.runtime();
        let Some(program) = self.locate_runtime(runtime) else {
            return Ok(ctx.refused(
                ExecutionMethod::Error,
                FailureKind::SpawnFailure,
                format!("Runtime '{}' for {} not found on PATH", runtime, ctx.spec.language),
            ));
        };

        ctx.stage_source().await?;

        debug!(
            "Executing {} code locally with {} (dir: {})",
            ctx.spec.language,
            program.display(),
            ctx.exec_dir.display()
        );

        let start = Instant::now();
        let mut child = match self.build_command(ctx, &program).spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ctx.refused(
                    ExecutionMethod::Error,
                    FailureKind::SpawnFailure,
                    format!("Failed to spawn {}: {}", program.display(), e),
                ));
            }
        };

        let pid = libc::pid_t::try_from(child.id())
            .map_err(|_| Error::Sandbox(format!("Child pid {} out of range", child.id())))?;
        let mut guard = KillOnDrop { pid, armed: true };

        let cap = ctx.max_output_bytes;
        let stdout = child.stdout.take().map(|pipe| PipeReader::spawn(pipe, cap));
        let stderr = child.stderr.take().map(|pipe| PipeReader::spawn(pipe, cap));

        let mut waiter = tokio::task::spawn_blocking(move || wait_for_exit(pid));
        let waited = tokio::time::timeout(ctx.limits.timeout(), &mut waiter).await;
        let (joined, timed_out) = match waited {
            Ok(joined) => (joined, false),
            Err(_) => {
                warn!(
                    "Execution {} timed out after {}s, killing process group {}",
                    ctx.execution_id, ctx.limits.timeout_seconds, pid
                );
                kill_group(pid);
                (waiter.await, true)
            }
        };
        let elapsed = start.elapsed();
        // Background processes die with the run and release the pipes
        kill_group(pid);

        let (status, usage) = joined
            .map_err(|e| Error::Internal(format!("Wait task failed: {}", e)))?
            .map_err(|e| Error::Sandbox(format!("wait4 failed: {}", e)))?;
        guard.armed = false;
        // Reaped through wait4; std's handle must not wait again
        drop(child);

        let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));
        let (output, stdout_truncated) = decode_output(&stdout, cap);
        let (stderr, stderr_truncated) = decode_output(&stderr, cap);
        let code = exit_code(status);

        let memory_usage_mb = usage.max_rss_kb as f64 / 1024.0;
        let mut metadata = base_metadata(ctx.execution_id);
        metadata.insert("backend".into(), Value::from("local"));
        metadata.insert("returncode".into(), Value::from(code));
        metadata.insert("cpu_time_seconds".into(), Value::from(usage.cpu_time.as_secs_f64()));
        if stdout_truncated || stderr_truncated {
            metadata.insert("output_truncated".into(), Value::Bool(true));
        }
        if memory_usage_mb > ctx.limits.memory_mb as f64 {
            metadata.insert("memory_limit_exceeded".into(), Value::Bool(true));
        }

        let mut result = ExecutionResult {
            success: false,
            output,
            error: stderr,
            execution_time_seconds: elapsed.as_secs_f64(),
            memory_usage_mb,
            cpu_usage_percent: usage.cpu_percent(elapsed),
            language: ctx.language.to_string(),
            method: ExecutionMethod::Local,
            security_level: ctx.security_level,
            resource_limits: ctx.limits,
            exit_code: Some(code),
            failure: None,
            metadata,
        };

        if timed_out {
            result.method = ExecutionMethod::Timeout;
            result.failure = Some(FailureKind::Timeout);
            result.exit_code = None;
            let reason = format!("Execution timed out after {}s", ctx.limits.timeout_seconds);
            result.error = if result.error.is_empty() {
                reason
            } else {
                format!("{}\n{}", result.error, reason)
            };
            return Ok(result);
        }

        if ctx.enforce_file_quota(&mut result) {
            return Ok(result);
        }

        if code == 0 {
            result.success = true;
        } else {
            result.failure = Some(FailureKind::NonZeroExit);
            if result.error.is_empty() {
                result.error = format!("Process exited with code {}", code);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::limits::ResourceLimits;
    use crate::sandbox::policy::SecurityLevel;
    use crate::sandbox::registry::{Language, LanguageRegistry};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn have(program: &str) -> bool {
        which::which(program).is_ok()
    }

    async fn run(
        language: Language,
        code: &str,
        limits: ResourceLimits,
    ) -> (ExecutionResult, tempfile::TempDir) {
        let workspace = tempdir().unwrap();
        let execution_id = Uuid::new_v4();
        let exec_dir = workspace.path().join(execution_id.to_string());
        std::fs::create_dir(&exec_dir).unwrap();

        let registry = LanguageRegistry::default();
        let ctx = RunContext {
            execution_id,
            spec: registry.get(language).unwrap(),
            code,
            language: "test",
            security_level: SecurityLevel::Low,
            limits,
            workspace_dir: workspace.path(),
            exec_dir: &exec_dir,
            max_output_bytes: 1024,
        };
        let result = LocalBackend::new().run(&ctx).await.unwrap();
        (result, workspace)
    }

    #[test]
    fn test_drain_capped() {
        let data = vec![b'x'; 10_000];
        let sink = Mutex::new(Vec::new());
        drain_capped(&data[..], 100, &sink);
        assert_eq!(sink.lock().unwrap().len(), 101);

        let sink = Mutex::new(Vec::new());
        drain_capped(&b"abc"[..], 100, &sink);
        assert_eq!(*sink.lock().unwrap(), b"abc");
    }

    #[test]
    fn test_cpu_percent() {
        let usage = ProcessUsage {
            max_rss_kb: 0,
            cpu_time: Duration::from_millis(500),
        };
        assert_eq!(usage.cpu_percent(Duration::from_secs(1)), 50.0);
        assert_eq!(usage.cpu_percent(Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn test_python_execution() {
        if !have("python3") {
            return;
        }
        let (result, _ws) = run(Language::Python, "print(1+1)", ResourceLimits::default()).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.output.trim(), "2");
        assert_eq!(result.method, ExecutionMethod::Local);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.execution_time_seconds >= 0.0);
        assert!(result.memory_usage_mb > 0.0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_stdout() {
        if !have("python3") {
            return;
        }
        let code = "print('before')\nraise SystemExit(3)";
        let (result, _ws) = run(Language::Python, code, ResourceLimits::default()).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
        assert_eq!(result.exit_code, Some(3));
        assert!(result.output.contains("before"));
        assert!(result.error.contains("exited with code 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        if !have("python3") {
            return;
        }
        let limits = ResourceLimits::new(128, 50.0, 1, 1, 10).unwrap();
        let started = Instant::now();
        let (result, _ws) = run(Language::Python, "import time\ntime.sleep(30)", limits).await;

        assert!(!result.success);
        assert_eq!(result.method, ExecutionMethod::Timeout);
        assert_eq!(result.failure, Some(FailureKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        if !have("bash") || !have("sleep") {
            return;
        }
        let limits = ResourceLimits::new(128, 50.0, 1, 1, 10).unwrap();
        let code = "sleep 30 &\necho $! > child.pid\nwait";
        let workspace = tempdir().unwrap();
        let execution_id = Uuid::new_v4();
        let exec_dir = workspace.path().join(execution_id.to_string());
        std::fs::create_dir(&exec_dir).unwrap();
        let registry = LanguageRegistry::default();
        let ctx = RunContext {
            execution_id,
            spec: registry.get(Language::Bash).unwrap(),
            code,
            language: "bash",
            security_level: SecurityLevel::Low,
            limits,
            workspace_dir: workspace.path(),
            exec_dir: &exec_dir,
            max_output_bytes: 1024,
        };

        let result = LocalBackend::new().run(&ctx).await.unwrap();
        assert_eq!(result.method, ExecutionMethod::Timeout);

        let pid: i32 = std::fs::read_to_string(exec_dir.join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // SAFETY: signal 0 only probes for existence.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "background sleep {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_normal_exit_kills_background_and_keeps_output() {
        if !have("bash") || !have("sleep") {
            return;
        }
        let limits = ResourceLimits::new(128, 50.0, 10, 1, 10).unwrap();
        let code = "echo visible-output\nsleep 30 &\necho $! > child.pid\nexit 0";
        let workspace = tempdir().unwrap();
        let execution_id = Uuid::new_v4();
        let exec_dir = workspace.path().join(execution_id.to_string());
        std::fs::create_dir(&exec_dir).unwrap();
        let registry = LanguageRegistry::default();
        let ctx = RunContext {
            execution_id,
            spec: registry.get(Language::Bash).unwrap(),
            code,
            language: "bash",
            security_level: SecurityLevel::Low,
            limits,
            workspace_dir: workspace.path(),
            exec_dir: &exec_dir,
            max_output_bytes: 1024,
        };

        let started = Instant::now();
        let result = LocalBackend::new().run(&ctx).await.unwrap();
        assert!(result.success, "{:?}", result);
        assert_eq!(result.method, ExecutionMethod::Local);
        assert_eq!(result.output.trim(), "visible-output");
        assert!(started.elapsed() < DRAIN_GRACE);

        let pid: i32 = std::fs::read_to_string(exec_dir.join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // SAFETY: signal 0 only probes for existence.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "background sleep {} outlived the run", pid);
    }

    #[tokio::test]
    async fn test_output_truncation() {
        if !have("python3") {
            return;
        }
        let code = "print('x' * 5000)";
        let (result, _ws) = run(Language::Python, code, ResourceLimits::default()).await;
        assert!(result.success);
        assert!(result.output.ends_with("[output truncated]"));
        assert_eq!(result.metadata["output_truncated"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_file_quota() {
        if !have("python3") {
            return;
        }
        let limits = ResourceLimits::new(128, 50.0, 10, 1, 2).unwrap();
        let code = "for i in range(5):\n    open(f'f{i}.txt', 'w').write('x')";
        let (result, _ws) = run(Language::Python, code, limits).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::ResourceQuotaExceeded));
        assert_eq!(result.metadata["files_created"], Value::from(5u64));
    }

    #[tokio::test]
    async fn test_missing_runtime_is_spawn_failure() {
        let backend = LocalBackend {
            path_env: Some("/nonexistent-polysandbox-path".to_string()),
        };
        let workspace = tempdir().unwrap();
        let registry = LanguageRegistry::default();
        let ctx = RunContext {
            execution_id: Uuid::new_v4(),
            spec: registry.get(Language::Python).unwrap(),
            code: "print(1)",
            language: "python",
            security_level: SecurityLevel::Low,
            limits: ResourceLimits::default(),
            workspace_dir: workspace.path(),
            exec_dir: workspace.path(),
            max_output_bytes: 1024,
        };

        let result = backend.run(&ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.method, ExecutionMethod::Error);
        assert_eq!(result.failure, Some(FailureKind::SpawnFailure));
        assert!(result.error.contains("python3"));
    }
}
