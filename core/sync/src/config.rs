//! Sync configuration and the syncability policy derived from it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use gitvault_common::{RepoPath, Result};

use crate::retry::RetryConfig;

/// File name of the manifest inside the config directory.
pub const MANIFEST_FILE: &str = "sync-metadata.json";

/// Workspace layout files the host editor rewrites constantly.
const WORKSPACE_FILES: [&str; 2] = ["workspace.json", "workspace-mobile.json"];

/// What to do when both sides changed the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// Hand the conflicting pair to the resolution channel and wait.
    #[default]
    Ask,
    /// Remote content wins.
    OverwriteLocal,
    /// Local content wins.
    OverwriteRemote,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Vault-relative config directory (holds the manifest).
    pub config_dir: String,
    /// Whether files inside the config directory are synced.
    pub sync_config_dir: bool,
    /// Conflict resolution strategy.
    pub conflict_strategy: ConflictStrategy,
    /// Maximum number of retries for transient network errors.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Bound on concurrent per-file operations within a pass.
    pub concurrency: usize,
    /// Message for steady-state commits.
    pub commit_message: String,
    /// Extra vault-relative paths that are never synced.
    pub excluded: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_dir: ".vault".to_string(),
            sync_config_dir: false,
            conflict_strategy: ConflictStrategy::Ask,
            max_retries: 3,
            retry_delay_ms: 1000,
            concurrency: 8,
            commit_message: "Sync".to_string(),
            excluded: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Build the syncability policy.
    ///
    /// # Errors
    /// - `config_dir` or an excluded path is not a valid relative path
    pub fn policy(&self) -> Result<SyncPolicy> {
        let mut policy = SyncPolicy::new(RepoPath::parse(&self.config_dir)?, self.sync_config_dir)?;
        for path in &self.excluded {
            policy = policy.with_excluded(RepoPath::parse(path)?);
        }
        Ok(policy)
    }

    /// Retry configuration for remote reads.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_delay_ms))
    }
}

/// Decides which vault paths take part in sync.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    config_dir: RepoPath,
    manifest: RepoPath,
    excluded: Vec<RepoPath>,
    sync_config_dir: bool,
}

impl SyncPolicy {
    /// Create a policy for the given config directory.
    pub fn new(config_dir: RepoPath, sync_config_dir: bool) -> Result<Self> {
        let manifest = config_dir.join(MANIFEST_FILE)?;
        let mut excluded = Vec::with_capacity(WORKSPACE_FILES.len());
        for name in WORKSPACE_FILES {
            excluded.push(config_dir.join(name)?);
        }

        Ok(Self {
            config_dir,
            manifest,
            excluded,
            sync_config_dir,
        })
    }

    /// Never sync `path`.
    pub fn with_excluded(mut self, path: RepoPath) -> Self {
        self.excluded.push(path);
        self
    }

    /// Location of the manifest.
    pub fn manifest_path(&self) -> &RepoPath {
        &self.manifest
    }

    /// The config directory.
    pub fn config_dir(&self) -> &RepoPath {
        &self.config_dir
    }

    /// Whether config-directory contents are synced.
    pub fn syncs_config_dir(&self) -> bool {
        self.sync_config_dir
    }

    /// Whether `path` is the manifest.
    pub fn is_manifest(&self, path: &RepoPath) -> bool {
        *path == self.manifest
    }

    /// Whether `path` lies inside the config directory.
    pub fn is_config_path(&self, path: &RepoPath) -> bool {
        path.is_inside(&self.config_dir)
    }

    /// Syncability predicate.
    ///
    /// The manifest is always syncable. Excluded paths and anything under
    /// `.git/` never are. Config-directory paths are syncable only when
    /// config-directory syncing is on.
    pub fn is_syncable(&self, path: &RepoPath) -> bool {
        if self.is_manifest(path) {
            return true;
        }
        if path.is_root() || path.top_level() == Some(".git") {
            return false;
        }
        if self.excluded.iter().any(|e| e == path || path.is_inside(e)) {
            return false;
        }
        if self.is_config_path(path) {
            return self.sync_config_dir;
        }
        true
    }

    /// Config-directory filter applied to remote paths: drops config paths
    /// when config syncing is off, always keeping the manifest.
    pub fn allows_remote(&self, path: &RepoPath) -> bool {
        self.is_manifest(path) || self.sync_config_dir || !self.is_config_path(path)
    }
}
