//! Per-user workspaces
//!
//! Each user gets one directory under the workspace root, created on first
//! use. Every execution stages its files in a subdirectory named after its
//! execution ID, so concurrent runs for the same user never share a path.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Directory name for a user ID
///
/// Unsafe characters are replaced and a hash of the raw ID is appended, so
/// `a/b` and `a_b` still land in different directories.
fn dir_name(user_id: &str) -> String {
    let mut clean: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if clean.is_empty() {
        clean.push_str("anonymous");
    }

    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    format!("{}-{:016x}", clean, hasher.finish())
}

/// Owns the per-user directories
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    users: RwLock<HashMap<String, PathBuf>>,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`; nothing is created on disk yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkspaceManager {
            root: root.into(),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get (creating if needed) the user's workspace directory
    pub async fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        if let Some(dir) = self.users.read().await.get(user_id) {
            return Ok(dir.clone());
        }

        let mut users = self.users.write().await;
        if let Some(dir) = users.get(user_id) {
            return Ok(dir.clone());
        }

        let dir = self.root.join(dir_name(user_id));
        tokio::fs::create_dir_all(&dir).await?;
        // Absolute path: the container backend bind-mounts it
        let dir = tokio::fs::canonicalize(&dir).await?;
        info!("Created workspace for user {}: {}", user_id, dir.display());

        users.insert(user_id.to_string(), dir.clone());
        Ok(dir)
    }

    /// Create the execution-scoped directory for one run
    pub async fn scratch(&self, user_id: &str, execution_id: Uuid) -> Result<ScratchDir> {
        let user_dir = self.user_dir(user_id).await?;
        let path = user_dir.join(execution_id.to_string());
        tokio::fs::create_dir(&path).await?;
        debug!("Created scratch directory {}", path.display());
        Ok(ScratchDir { path })
    }

    /// Delete the user's workspace. Returns whether one existed.
    pub async fn remove_user(&self, user_id: &str) -> Result<bool> {
        let removed = self.users.write().await.remove(user_id);
        // Also covers directories left over from a previous process
        let dir = removed.unwrap_or_else(|| self.root.join(dir_name(user_id)));

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed workspace for user {}: {}", user_id, dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of users with a live workspace
    pub async fn active_users(&self) -> usize {
        self.users.read().await.len()
    }
}

/// Execution-scoped directory, removed when dropped
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch directory {}: {}", self.path.display(), e);
            }
        }
    }
}
