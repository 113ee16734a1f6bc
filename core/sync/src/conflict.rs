//! Conflict detection and resolution.
//!
//! A conflict is a path both sides changed since the last sync, to different
//! content. The engine never merges; it either applies a precedence rule or
//! asks whoever holds the [`ConflictReceiver`] and waits for the answer.

use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use gitvault_common::{Error, RepoPath, Result};

use crate::config::ConflictStrategy;

/// One conflicting path with both versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictFile {
    pub file_path: RepoPath,
    pub remote_content: Vec<u8>,
    pub local_content: Vec<u8>,
}

/// Content chosen for a conflicting path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    pub file_path: RepoPath,
    pub content: Vec<u8>,
}

/// A batch of conflicts awaiting an answer.
#[derive(Debug)]
pub struct ConflictRequest {
    pub conflicts: Vec<ConflictFile>,
    reply: oneshot::Sender<Vec<ConflictResolution>>,
}

impl ConflictRequest {
    /// Answer the request. Must contain exactly one resolution per conflict.
    pub fn respond(self, resolutions: Vec<ConflictResolution>) {
        // The sync pass may have been abandoned.
        let _ = self.reply.send(resolutions);
    }
}

/// Receiving end handed to the UI.
pub type ConflictReceiver = mpsc::UnboundedReceiver<ConflictRequest>;

/// Sending end held by the engine.
#[derive(Debug, Clone)]
pub struct ConflictSender {
    tx: mpsc::UnboundedSender<ConflictRequest>,
}

/// Create a conflict resolution channel.
pub fn conflict_channel() -> (ConflictSender, ConflictReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConflictSender { tx }, rx)
}

impl ConflictSender {
    /// Send `conflicts` and wait for the resolutions.
    ///
    /// # Errors
    /// - The receiver is gone or dropped the request
    /// - The answer does not hold exactly one resolution per conflict
    pub async fn resolve(&self, conflicts: Vec<ConflictFile>) -> Result<Vec<ConflictResolution>> {
        let expected: Vec<RepoPath> = conflicts.iter().map(|c| c.file_path.clone()).collect();
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(ConflictRequest { conflicts, reply })
            .map_err(|_| Error::Conflict("No conflict resolver is listening".to_string()))?;
        let resolutions = rx
            .await
            .map_err(|_| Error::Conflict("Conflict resolution was abandoned".to_string()))?;

        validate_resolutions(&expected, &resolutions)?;
        Ok(resolutions)
    }
}

fn validate_resolutions(expected: &[RepoPath], resolutions: &[ConflictResolution]) -> Result<()> {
    if expected.len() != resolutions.len() {
        return Err(Error::Conflict(format!(
            "Expected {} resolutions, got {}",
            expected.len(),
            resolutions.len()
        )));
    }

    let wanted: HashSet<&RepoPath> = expected.iter().collect();
    let mut seen = HashSet::new();
    for resolution in resolutions {
        if !wanted.contains(&resolution.file_path) {
            return Err(Error::Conflict(format!(
                "Resolution for unknown path {}",
                resolution.file_path
            )));
        }
        if !seen.insert(&resolution.file_path) {
            return Err(Error::Conflict(format!(
                "Duplicate resolution for {}",
                resolution.file_path
            )));
        }
    }
    Ok(())
}

/// Three-way conflict check.
///
/// A conflict exists iff the remote moved away from the cached sha, the local
/// file moved away from it too, and the two did not land on the same content.
pub fn is_conflict(remote_sha: &str, cached_sha: Option<&str>, local_sha: &str) -> bool {
    let cached = cached_sha.unwrap_or_default();
    remote_sha != cached && local_sha != cached && local_sha != remote_sha
}

/// Applies the configured strategy to detected conflicts.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    channel: Option<ConflictSender>,
}

impl ConflictResolver {
    /// Create a new conflict resolver.
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            channel: None,
        }
    }

    /// Route `Ask` decisions through `channel`.
    pub fn with_channel(mut self, channel: ConflictSender) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Get the resolution strategy.
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve conflicts. Blocks on the channel for [`ConflictStrategy::Ask`].
    ///
    /// # Errors
    /// - `Ask` without a channel, or any channel error
    pub async fn resolve(&self, conflicts: Vec<ConflictFile>) -> Result<Vec<ConflictResolution>> {
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Resolving {} conflicts with {:?}", conflicts.len(), self.strategy);

        match self.strategy {
            ConflictStrategy::OverwriteLocal => Ok(conflicts
                .into_iter()
                .map(|c| ConflictResolution {
                    file_path: c.file_path,
                    content: c.remote_content,
                })
                .collect()),
            ConflictStrategy::OverwriteRemote => Ok(conflicts
                .into_iter()
                .map(|c| ConflictResolution {
                    file_path: c.file_path,
                    content: c.local_content,
                })
                .collect()),
            ConflictStrategy::Ask => match &self.channel {
                Some(channel) => channel.resolve(conflicts).await,
                None => Err(Error::Conflict(
                    "Conflicts need a decision but no resolver is attached".to_string(),
                )),
            },
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictStrategy::Ask)
    }
}
