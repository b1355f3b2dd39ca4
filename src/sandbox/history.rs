//! Execution history and aggregate statistics
//!
//! In-memory only; history is lost on restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::sandbox::executor::ExecutionResult;
use crate::sandbox::policy::SecurityLevel;

/// One finished (or refused) request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistoryRecord {
    pub execution_id: Uuid,
    pub user_id: String,
    pub language: String,
    pub execution_mode: ExecutionMode,
    pub security_level: SecurityLevel,
    pub timestamp: DateTime<Utc>,
    pub result: ExecutionResult,
}

/// Aggregate service statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStats {
    /// Users with a live workspace
    pub active_users: usize,
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    /// Languages this deployment accepts
    pub supported_languages: usize,
    pub docker_available: bool,
    pub timestamp: DateTime<Utc>,
}

/// History store keyed by execution ID
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    records: RwLock<HashMap<Uuid, ExecutionHistoryRecord>>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any previous one with the same ID
    pub async fn record(&self, record: ExecutionHistoryRecord) {
        self.records.write().await.insert(record.execution_id, record);
    }

    /// Most recent records first, optionally for one user only
    pub async fn query(&self, user_id: Option<&str>, limit: usize) -> Vec<ExecutionHistoryRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<ExecutionHistoryRecord> = records
            .values()
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect();
        drop(records);

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        matching
    }

    /// Drop every record of a user. Returns how many were removed.
    pub async fn remove_user(&self, user_id: &str) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.user_id != user_id);
        before - records.len()
    }

    /// (total, successful) counts
    pub async fn counts(&self) -> (usize, usize) {
        let records = self.records.read().await;
        let successful = records.values().filter(|r| r.result.success).count();
        (records.len(), successful)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::executor::{ExecutionMethod, FailureKind};
    use crate::sandbox::limits::ResourceLimits;
    use chrono::Duration;

    fn record(user: &str, success: bool, age_secs: i64) -> ExecutionHistoryRecord {
        let execution_id = Uuid::new_v4();
        let mut result = ExecutionResult::refused(
            execution_id,
            "python",
            SecurityLevel::Medium,
            ResourceLimits::default(),
            ExecutionMethod::Local,
            FailureKind::NonZeroExit,
            "",
        );
        result.success = success;
        ExecutionHistoryRecord {
            execution_id,
            user_id: user.to_string(),
            language: "python".to_string(),
            execution_mode: ExecutionMode::Local,
            security_level: SecurityLevel::Medium,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            result,
        }
    }

    #[tokio::test]
    async fn test_query_orders_newest_first() {
        let history = ExecutionHistory::new();
        let old = record("alice", true, 60);
        let new = record("alice", true, 1);
        history.record(old.clone()).await;
        history.record(new.clone()).await;
        history.record(record("bob", false, 30)).await;

        let alice = history.query(Some("alice"), 10).await;
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].execution_id, new.execution_id);
        assert_eq!(alice[1].execution_id, old.execution_id);

        let all = history.query(None, 2).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].execution_id, new.execution_id);
        assert_eq!(all[1].user_id, "bob");
    }

    #[tokio::test]
    async fn test_counts_and_remove_user() {
        let history = ExecutionHistory::new();
        history.record(record("alice", true, 3)).await;
        history.record(record("alice", false, 2)).await;
        history.record(record("bob", true, 1)).await;

        assert_eq!(history.counts().await, (3, 2));
        assert_eq!(history.remove_user("alice").await, 2);
        assert_eq!(history.counts().await, (1, 1));
        assert!(history.query(Some("alice"), 10).await.is_empty());
        assert_eq!(history.remove_user("nobody").await, 0);
    }

    #[tokio::test]
    async fn test_record_replaces_same_id() {
        let history = ExecutionHistory::new();
        assert_eq!(history.counts().await, (0, 0));
        let mut r = record("carol", false, 0);
        history.record(r.clone()).await;
        r.result.success = true;
        history.record(r.clone()).await;
        assert_eq!(history.counts().await, (1, 1));
        assert_eq!(history.query(Some("carol"), 10).await[0].execution_id, r.execution_id);
    }
}
