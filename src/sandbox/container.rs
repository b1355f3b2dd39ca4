//! Docker container-based execution
//!
//! Each run gets an ephemeral container with no network, a read-only root
//! filesystem, all capabilities dropped and cgroup limits derived from the
//! request. The user's workspace is bind-mounted read-write so the staged
//! source is visible inside; the container is removed after the run, also
//! when the caller gives up on it.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;
use moka::future::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::error::{Error, Result};
use crate::sandbox::executor::{
    base_metadata, decode_output, ExecutionBackend, ExecutionMethod, ExecutionResult,
    FailureKind, RunContext,
};

const PING_TIMEOUT: Duration = Duration::from_secs(3);
/// Images checked or pulled recently; re-inspected after this
const IMAGE_CACHE_TTL: Duration = Duration::from_secs(600);

/// Docker container executor
pub struct ContainerBackend {
    /// Docker client
    docker: Docker,
    /// Container configuration
    config: ContainerConfig,
    /// Images known to be present locally
    ready_images: Cache<String, ()>,
}

impl std::fmt::Debug for ContainerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContainerBackend {
    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect(config: &ContainerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(Error::Container(format!("Docker ping failed: {}", e))),
            Err(_) => return Err(Error::Container("Docker ping timed out".to_string())),
        }

        info!("Container backend connected to Docker");

        Ok(ContainerBackend {
            docker,
            config: config.clone(),
            ready_images: Cache::builder()
                .max_capacity(64)
                .time_to_live(IMAGE_CACHE_TTL)
                .build(),
        })
    }

    /// Make sure `image` exists locally, pulling it within the pull budget
    ///
    /// Concurrent calls for the same image share one pull.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.ready_images
            .try_get_with(image.to_string(), self.inspect_or_pull(image))
            .await
            .map_err(|e| Error::Container(format!("Image {} unavailable: {}", image, e)))
    }

    async fn inspect_or_pull(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling Docker image: {}", image);
        let budget = Duration::from_secs(self.config.pull_timeout_secs);
        tokio::time::timeout(budget, self.pull(image))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Pulling {} exceeded {}s",
                    image, self.config.pull_timeout_secs
                ))
            })??;
        info!("Image pulled successfully: {}", image);
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::Container(format!("Failed to pull image: {}", e)));
                }
            }
        }
        Ok(())
    }

    /// Wait for a container to stop and return its exit code
    async fn wait_for_container(&self, name: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::Container(format!("Wait failed: {}", e))),
            None => Err(Error::Container("Container wait stream ended".to_string())),
        }
    }

    /// Collect container logs, at most `cap + 1` bytes per stream
    async fn get_container_logs(&self, name: &str, cap: usize) -> (Vec<u8>, Vec<u8>) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let keep = cap.saturating_add(1);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stream = self.docker.logs(name, Some(options));
        while let Some(result) = stream.next().await {
            let (target, message) = match result {
                Ok(LogOutput::StdOut { message }) => (&mut stdout, message),
                Ok(LogOutput::StdErr { message }) => (&mut stderr, message),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error reading logs: {}", e);
                    break;
                }
            };
            let room = keep.saturating_sub(target.len());
            target.extend_from_slice(&message[..message.len().min(room)]);
        }

        (stdout, stderr)
    }

    async fn oom_killed(&self, name: &str) -> bool {
        self.docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.oom_killed)
            .unwrap_or(false)
    }

    /// Sample stats in the background until aborted or the container stops
    fn spawn_sampler(&self, name: &str) -> (tokio::task::JoinHandle<()>, Arc<Mutex<UsageSummary>>) {
        let summary = Arc::new(Mutex::new(UsageSummary::default()));
        let docker = self.docker.clone();
        let name = name.to_string();
        let sink = Arc::clone(&summary);

        let handle = tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                one_shot: false,
            };
            let mut stream = docker.stats(&name, Some(options));
            while let Some(Ok(stats)) = stream.next().await {
                if let Ok(mut summary) = sink.lock() {
                    summary.record(&stats);
                }
            }
        });

        (handle, summary)
    }

    /// Prepare and start the container
    ///
    /// Errors from here mean the program never ran, so the caller may fall
    /// back to another backend.
    async fn run_container(&self, ctx: &RunContext<'_>) -> Result<ExecutionResult> {
        self.ensure_image(&ctx.spec.image).await?;
        ctx.stage_source().await?;

        let name = format!("polysandbox-{}", ctx.execution_id);
        let container_config = build_container_config(&self.config, ctx, host_user());

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        self.docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;
        let guard = ContainerGuard::new(self.docker.clone(), &name);
        debug!("Created container: {}", name);

        let start = Instant::now();
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        Ok(self.finish_run(ctx, &name, guard, start).await)
    }

    /// Wait for a started container and turn whatever happens into a result
    async fn finish_run(
        &self,
        ctx: &RunContext<'_>,
        name: &str,
        mut guard: ContainerGuard,
        start: Instant,
    ) -> ExecutionResult {
        let (sampler, usage) = self.spawn_sampler(name);

        let waited =
            tokio::time::timeout(ctx.limits.timeout(), self.wait_for_container(name)).await;
        let elapsed = start.elapsed();
        let outcome = match waited {
            Ok(Ok(code)) => WaitOutcome::Exited(code),
            Ok(Err(e)) => {
                warn!("Lost track of container {}: {}", name, e);
                WaitOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Container {} timed out after {}s, killing",
                    name, ctx.limits.timeout_seconds
                );
                WaitOutcome::TimedOut
            }
        };
        if !matches!(outcome, WaitOutcome::Exited(_)) {
            if let Err(e) = self
                .docker
                .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
                .await
            {
                debug!("Kill of {} failed: {}", name, e);
            }
        }
        sampler.abort();

        let (stdout, stderr) = self.get_container_logs(name, ctx.max_output_bytes).await;
        let oom_killed = matches!(outcome, WaitOutcome::Exited(_)) && self.oom_killed(name).await;

        match self.remove_container(name).await {
            Ok(()) => guard.disarm(),
            // The guard retries when it drops
            Err(e) => warn!("{}", e),
        }

        let usage = usage.lock().map(|u| *u).unwrap_or_default();
        let mut result = container_result(
            ctx,
            name,
            &outcome,
            (stdout.as_slice(), stderr.as_slice()),
            oom_killed,
            elapsed,
            usage,
        );
        if matches!(outcome, WaitOutcome::Exited(_)) {
            ctx.enforce_file_quota(&mut result);
        }
        result
    }

    /// Remove a container
    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| Error::Container(format!("Failed to remove container: {}", e)))?;

        debug!("Removed container: {}", name);
        Ok(())
    }
}

/// How waiting on a started container ended
#[derive(Debug, Clone, PartialEq)]
enum WaitOutcome {
    Exited(i64),
    TimedOut,
    /// The daemon stopped reporting on the container
    Failed(String),
}

/// Result for a container that was started
fn container_result(
    ctx: &RunContext<'_>,
    name: &str,
    outcome: &WaitOutcome,
    (stdout, stderr): (&[u8], &[u8]),
    oom_killed: bool,
    elapsed: Duration,
    usage: UsageSummary,
) -> ExecutionResult {
    let (output, stdout_truncated) = decode_output(stdout, ctx.max_output_bytes);
    let (error, stderr_truncated) = decode_output(stderr, ctx.max_output_bytes);
    let exit_code = match outcome {
        WaitOutcome::Exited(code) => Some(*code),
        _ => None,
    };

    let mut metadata = base_metadata(ctx.execution_id);
    metadata.insert("backend".into(), Value::from("docker"));
    metadata.insert("container".into(), Value::from(name));
    metadata.insert("image".into(), Value::from(ctx.spec.image.as_str()));
    if let Some(code) = exit_code {
        metadata.insert("returncode".into(), Value::from(code));
    }
    if stdout_truncated || stderr_truncated {
        metadata.insert("output_truncated".into(), Value::Bool(true));
    }
    if oom_killed {
        metadata.insert("oom_killed".into(), Value::Bool(true));
    }

    let mut result = ExecutionResult {
        success: exit_code == Some(0),
        output,
        error,
        execution_time_seconds: elapsed.as_secs_f64(),
        memory_usage_mb: usage.peak_memory_bytes as f64 / (1024.0 * 1024.0),
        cpu_usage_percent: usage.mean_cpu_percent(),
        language: ctx.language.to_string(),
        method: ExecutionMethod::Docker,
        security_level: ctx.security_level,
        resource_limits: ctx.limits,
        exit_code: exit_code.map(|c| c as i32),
        failure: None,
        metadata,
    };

    let append = |error: &mut String, reason: String| {
        *error = if error.is_empty() {
            reason
        } else {
            format!("{}\n{}", error, reason)
        };
    };

    match outcome {
        WaitOutcome::Exited(0) => {}
        WaitOutcome::Exited(code) => {
            result.failure = Some(FailureKind::NonZeroExit);
            if result.error.is_empty() {
                result.error = if *code == 137 && oom_killed {
                    "Killed: memory limit exceeded".to_string()
                } else {
                    format!("Container exited with code {}", code)
                };
            }
        }
        WaitOutcome::TimedOut => {
            result.method = ExecutionMethod::Timeout;
            result.failure = Some(FailureKind::Timeout);
            append(
                &mut result.error,
                format!("Execution timed out after {}s", ctx.limits.timeout_seconds),
            );
        }
        WaitOutcome::Failed(reason) => {
            result.method = ExecutionMethod::Error;
            result.failure = Some(FailureKind::BackendInfrastructureFailure);
            append(
                &mut result.error,
                format!("Container wait failed after start: {}", reason),
            );
        }
    }

    result
}

/// Host uid:gid, so files written to the bind mount stay owned by the
/// service user
fn host_user() -> String {
    // SAFETY: getuid/getgid cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    format!("{}:{}", uid, gid)
}

/// Container creation request for one run
fn build_container_config(
    config: &ContainerConfig,
    ctx: &RunContext<'_>,
    user: String,
) -> Config<String> {
    let mount = config.mount_path.trim_end_matches('/');
    let working_dir = format!("{}/{}", mount, ctx.exec_dir_name());
    let plan = ctx
        .limits
        .container_enforcement(config.cpu_period, config.pids_limit);

    let mut env: Vec<String> = vec![
        format!("HOME={}", working_dir),
        format!("TMPDIR={}", working_dir),
    ];
    env.extend(
        ctx.spec
            .env_for(&working_dir)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v)),
    );

    let host_config = HostConfig {
        memory: Some(plan.memory_bytes),
        // Equal to memory: no swap
        memory_swap: Some(plan.memory_bytes),
        cpu_period: Some(plan.cpu_period),
        cpu_quota: Some(plan.cpu_quota),
        pids_limit: Some(plan.pids_limit),
        ulimits: Some(vec![
            ResourcesUlimits {
                name: Some("fsize".to_string()),
                soft: Some(plan.file_size_bytes),
                hard: Some(plan.file_size_bytes),
            },
            ResourcesUlimits {
                name: Some("core".to_string()),
                soft: Some(0),
                hard: Some(0),
            },
        ]),
        network_mode: Some("none".to_string()),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        binds: Some(vec![format!("{}:{}:rw", ctx.workspace_dir.display(), mount)]),
        tmpfs: Some(HashMap::from([(
            "/tmp".to_string(),
            format!("rw,noexec,nosuid,size={}", config.tmpfs_size),
        )])),
        auto_remove: Some(false), // Removed manually after reading logs
        ..Default::default()
    };

    Config {
        image: Some(ctx.spec.image.clone()),
        cmd: Some(ctx.spec.command.clone()),
        env: Some(env),
        working_dir: Some(working_dir),
        user: Some(user),
        network_disabled: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Peak memory and CPU samples gathered while a container runs
#[derive(Debug, Clone, Copy, Default)]
struct UsageSummary {
    peak_memory_bytes: u64,
    cpu_percent_total: f64,
    cpu_samples: u32,
}

impl UsageSummary {
    fn record(&mut self, stats: &Stats) {
        let memory = stats
            .memory_stats
            .max_usage
            .or(stats.memory_stats.usage)
            .unwrap_or(0);
        let cpu = &stats.cpu_stats;
        let pre = &stats.precpu_stats;
        let percent = cpu_percent(
            (pre.cpu_usage.total_usage, cpu.cpu_usage.total_usage),
            pre.system_cpu_usage.zip(cpu.system_cpu_usage),
            cpu.online_cpus,
        );
        self.add_sample(memory, percent);
    }

    fn add_sample(&mut self, memory_bytes: u64, cpu_percent: Option<f64>) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(memory_bytes);
        if let Some(percent) = cpu_percent {
            self.cpu_percent_total += percent;
            self.cpu_samples += 1;
        }
    }

    fn mean_cpu_percent(&self) -> f64 {
        if self.cpu_samples == 0 {
            return 0.0;
        }
        self.cpu_percent_total / f64::from(self.cpu_samples)
    }
}

/// CPU usage between two consecutive samples, in percent of one core
///
/// Both pairs are `(previous, current)` cumulative counters.
fn cpu_percent(
    container: (u64, u64),
    system: Option<(u64, u64)>,
    online_cpus: Option<u64>,
) -> Option<f64> {
    let cpu_delta = container.1.checked_sub(container.0)?;
    let (pre_system, system) = system?;
    let system_delta = system.checked_sub(pre_system)?;
    if system_delta == 0 {
        return None;
    }
    let cpus = online_cpus.unwrap_or(1).max(1);
    Some(cpu_delta as f64 / system_delta as f64 * cpus as f64 * 100.0)
}

/// Force-removes the container if the run is abandoned midway
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, name: &str) -> Self {
        ContainerGuard {
            docker,
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to remove container {}", self.name);
            return;
        };
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match docker.remove_container(&name, Some(options)).await {
                Ok(()) => debug!("Removed abandoned container: {}", name),
                Err(e) => warn!("Failed to remove abandoned container {}: {}", name, e),
            }
        });
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        matches!(
            tokio::time::timeout(PING_TIMEOUT, self.docker.ping()).await,
            Ok(Ok(_))
        )
    }

    async fn run(&self, ctx: &RunContext<'_>) -> Result<ExecutionResult> {
        debug!(
            "Executing {} code in container (image: {})",
            ctx.spec.language, ctx.spec.image
        );
        self.run_container(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::limits::ResourceLimits;
    use crate::sandbox::policy::SecurityLevel;
    use crate::sandbox::registry::{Language, LanguageRegistry};
    use std::path::Path;
    use uuid::Uuid;

    fn context<'a>(
        registry: &'a LanguageRegistry,
        language: Language,
        exec_dir: &'a Path,
    ) -> RunContext<'a> {
        RunContext {
            execution_id: Uuid::new_v4(),
            spec: registry.get(language).unwrap(),
            code: "print(1)",
            language: "python",
            security_level: SecurityLevel::High,
            limits: ResourceLimits::new(64, 25.0, 10, 5, 20).unwrap(),
            workspace_dir: Path::new("/srv/ws/alice"),
            exec_dir,
            max_output_bytes: 1024,
        }
    }

    #[test]
    fn test_container_config_isolation() {
        let registry = LanguageRegistry::default();
        let exec_dir = Path::new("/srv/ws/alice/run-1");
        let ctx = context(&registry, Language::Python, exec_dir);
        let config = build_container_config(&ContainerConfig::default(), &ctx, "1000:1000".into());

        assert_eq!(config.image.as_deref(), Some("python:3.11-slim"));
        assert_eq!(
            config.cmd,
            Some(vec!["python3".to_string(), "main.py".to_string()])
        );
        assert_eq!(config.working_dir.as_deref(), Some("/workspace/run-1"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(config.network_disabled, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.cpu_quota, Some(25_000));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.binds,
            Some(vec!["/srv/ws/alice:/workspace:rw".to_string()])
        );
        assert!(host.tmpfs.unwrap()["/tmp"].contains("size=16m"));

        let ulimits = host.ulimits.unwrap();
        let fsize = ulimits
            .iter()
            .find(|u| u.name.as_deref() == Some("fsize"))
            .unwrap();
        assert_eq!(fsize.soft, Some(5 * 1024 * 1024));
        assert_eq!(fsize.hard, fsize.soft);
    }

    #[test]
    fn test_wait_failure_after_start_is_a_result() {
        let registry = LanguageRegistry::default();
        let exec_dir = Path::new("/srv/ws/alice/run-3");
        let ctx = context(&registry, Language::Python, exec_dir);

        let result = container_result(
            &ctx,
            "polysandbox-run-3",
            &WaitOutcome::Failed("connection reset".into()),
            (&b"partial"[..], &b""[..]),
            false,
            Duration::from_millis(40),
            UsageSummary::default(),
        );
        assert!(!result.success);
        assert_eq!(result.method, ExecutionMethod::Error);
        assert_eq!(result.failure, Some(FailureKind::BackendInfrastructureFailure));
        assert_eq!(result.output, "partial");
        assert!(result.error.contains("connection reset"));
        assert_eq!(result.exit_code, None);
        assert_eq!(result.metadata["container"], "polysandbox-run-3");
    }

    #[test]
    fn test_container_exit_outcomes() {
        let registry = LanguageRegistry::default();
        let exec_dir = Path::new("/srv/ws/alice/run-4");
        let ctx = context(&registry, Language::Python, exec_dir);
        let build = |outcome: WaitOutcome, oom: bool| {
            container_result(
                &ctx,
                "c",
                &outcome,
                (&b""[..], &b""[..]),
                oom,
                Duration::ZERO,
                UsageSummary::default(),
            )
        };

        let ok = build(WaitOutcome::Exited(0), false);
        assert!(ok.success);
        assert_eq!(ok.method, ExecutionMethod::Docker);
        assert_eq!(ok.exit_code, Some(0));

        let oom = build(WaitOutcome::Exited(137), true);
        assert_eq!(oom.failure, Some(FailureKind::NonZeroExit));
        assert!(oom.error.contains("memory limit"));
        assert_eq!(oom.metadata["oom_killed"], true);

        let slow = build(WaitOutcome::TimedOut, false);
        assert_eq!(slow.method, ExecutionMethod::Timeout);
        assert_eq!(slow.failure, Some(FailureKind::Timeout));
        assert_eq!(slow.exit_code, None);
    }

    #[test]
    fn test_container_env_resolves_placeholder() {
        let registry = LanguageRegistry::default();
        let exec_dir = Path::new("/srv/ws/alice/run-2");
        let ctx = context(&registry, Language::Go, exec_dir);
        let config = build_container_config(&ContainerConfig::default(), &ctx, "0:0".into());

        let env = config.env.unwrap();
        assert!(env.contains(&"GOCACHE=/workspace/run-2/.gocache".to_string()));
        assert!(env.contains(&"HOME=/workspace/run-2".to_string()));
    }

    #[test]
    fn test_usage_summary() {
        let mut summary = UsageSummary::default();
        summary.add_sample(10 * 1024 * 1024, cpu_percent((100, 200), Some((1000, 2000)), Some(2)));
        summary.add_sample(4 * 1024 * 1024, cpu_percent((200, 400), Some((2000, 3000)), Some(2)));

        assert_eq!(summary.peak_memory_bytes, 10 * 1024 * 1024);
        // (100/1000)*2*100 and (200/1000)*2*100
        assert!((summary.mean_cpu_percent() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_without_system_delta() {
        assert_eq!(cpu_percent((100, 200), Some((1000, 1000)), Some(2)), None);
        assert_eq!(cpu_percent((100, 200), None, Some(2)), None);
        assert_eq!(cpu_percent((300, 200), Some((0, 1000)), None), None);
        assert_eq!(UsageSummary::default().mean_cpu_percent(), 0.0);
    }
}
