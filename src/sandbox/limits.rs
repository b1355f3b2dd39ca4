//! Resource limits and their enforcement plans
//!
//! [`ResourceLimiter`] only builds values. Enforcement belongs to the
//! backends, which consume the plans derived here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::policy::{SecurityLevel, SecurityPolicyEngine};

const MB: u64 = 1024 * 1024;
/// Docker rejects CFS quotas below 1ms
const MIN_CPU_QUOTA: i64 = 1_000;
/// Longest CFS period the kernel accepts
const MAX_CPU_PERIOD: i64 = 1_000_000;

/// Bounds applied to one execution
///
/// Immutable once built: construct through [`ResourceLimits::new`] or
/// [`ResourceLimiter::build`], both of which check the ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory cap in MiB
    pub memory_mb: u64,
    /// CPU share in percent of one core, in (0, 100]
    pub cpu_percent: f64,
    /// Wall-clock timeout in seconds
    pub timeout_seconds: u64,
    /// Largest file the program may write, in MiB
    pub max_file_size_mb: u64,
    /// Number of files the program may create
    pub max_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            memory_mb: 128,
            cpu_percent: 50.0,
            timeout_seconds: 30,
            max_file_size_mb: 10,
            max_files: 50,
        }
    }
}

impl ResourceLimits {
    /// Build a validated set of limits
    pub fn new(
        memory_mb: u64,
        cpu_percent: f64,
        timeout_seconds: u64,
        max_file_size_mb: u64,
        max_files: u64,
    ) -> Result<Self> {
        let limits = ResourceLimits {
            memory_mb,
            cpu_percent,
            timeout_seconds,
            max_file_size_mb,
            max_files,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.memory_mb == 0 {
            return Err(Error::InvalidInput("memory_mb must be greater than 0".into()));
        }
        if !(self.cpu_percent > 0.0 && self.cpu_percent <= 100.0) {
            return Err(Error::InvalidInput(format!(
                "cpu_percent must be in (0, 100], got {}",
                self.cpu_percent
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidInput(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock timeout as a Duration
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Plan applied to a child process by the local backend
    pub fn local_enforcement(&self) -> LocalEnforcement {
        LocalEnforcement {
            // One second of slack so the wall-clock kill normally wins and
            // the result is reported as a timeout.
            cpu_seconds: self.timeout_seconds + 1,
            file_size_bytes: self.max_file_size_mb * MB,
        }
    }

    /// Plan applied to a container by the container backend
    ///
    /// When the share of `cpu_period` would fall under the minimum quota,
    /// the period is stretched so the ratio still matches `cpu_percent`.
    pub fn container_enforcement(&self, cpu_period: i64, pids_limit: i64) -> ContainerEnforcement {
        let memory_bytes = i64::try_from(self.memory_mb * MB).unwrap_or(i64::MAX);
        let share = self.cpu_percent / 100.0;

        let mut cpu_period = cpu_period.max(MIN_CPU_QUOTA);
        let mut cpu_quota = ((cpu_period as f64) * share).round() as i64;
        if cpu_quota < MIN_CPU_QUOTA {
            cpu_period = ((MIN_CPU_QUOTA as f64) / share).ceil().min(MAX_CPU_PERIOD as f64) as i64;
            cpu_quota = ((cpu_period as f64) * share).round() as i64;
        }

        ContainerEnforcement {
            memory_bytes,
            file_size_bytes: i64::try_from(self.max_file_size_mb * MB).unwrap_or(i64::MAX),
            cpu_period,
            cpu_quota: cpu_quota.max(MIN_CPU_QUOTA),
            pids_limit,
        }
    }
}

/// Process-level limits for the local backend
///
/// CPU time and file size are enforced with rlimits. Memory is only
/// observed after the fact: address-space limits break runtimes such as
/// Node that reserve large virtual ranges up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEnforcement {
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
}

/// cgroup settings for the container backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEnforcement {
    pub memory_bytes: i64,
    /// `fsize` ulimit
    pub file_size_bytes: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub pids_limit: i64,
}

/// Builds the limits for a request
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimiter;

impl ResourceLimiter {
    /// Caller override verbatim when present, the tier default otherwise
    pub fn build(
        policies: &SecurityPolicyEngine,
        level: SecurityLevel,
        override_limits: Option<ResourceLimits>,
    ) -> Result<ResourceLimits> {
        match override_limits {
            Some(limits) => {
                limits.validate()?;
                Ok(limits)
            }
            None => Ok(policies.policy(level).limits),
        }
    }
}
