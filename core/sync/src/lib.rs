//! GitVault Sync Engine
//!
//! This module keeps a local vault and a Git-hosted remote in step:
//! - Durable per-file metadata, mirrored to the remote as a manifest
//! - Change listener that marks local edits and deletions
//! - Bootstrap and steady-state sync passes, each publishing one commit
//! - Conflict detection with pluggable resolution
//! - Retry strategy with exponential backoff
//! - Manual and interval scheduling

pub mod actions;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod listener;
pub mod metadata;
pub mod retry;
pub mod scheduler;
pub mod store;

// Re-export main types
pub use actions::{determine_sync_actions, ActionKind, SyncAction};
pub use commit::{is_binary, CommitAssembler, CommitResult, PendingCommit};
pub use config::{ConflictStrategy, SyncConfig, SyncPolicy, MANIFEST_FILE};
pub use conflict::{
    conflict_channel, is_conflict, ConflictFile, ConflictReceiver, ConflictRequest,
    ConflictResolution, ConflictResolver, ConflictSender,
};
pub use engine::{PassKind, SyncEngine, SyncOutcome, SyncReport};
pub use listener::ChangeListener;
pub use metadata::{FileMetadata, FileState, Metadata};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SyncMode, SyncScheduler, SyncSchedulerHandle, Trigger};
pub use store::MetadataStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _config = SyncConfig::default();
        let _retry_config = RetryConfig::default();
        let _resolver = ConflictResolver::default();
        let _metadata = Metadata::new();
    }
}
