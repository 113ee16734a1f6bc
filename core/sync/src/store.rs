//! Metadata Store: the in-memory manifest plus its serialized write queue.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

use gitvault_common::{Error, RepoPath, Result};
use gitvault_storage::VaultFs;

use crate::metadata::Metadata;

type WriteRequest = oneshot::Sender<Result<()>>;

/// Durable record of per-file sync state.
///
/// Mutations go to memory; [`save`](Self::save) queues a write to the manifest
/// file. A single writer task drains the queue in order and serializes the
/// state as it is when the write runs, so a later save can never persist an
/// older snapshot than an earlier one.
#[derive(Clone)]
pub struct MetadataStore {
    state: Arc<RwLock<Metadata>>,
    writer: mpsc::UnboundedSender<WriteRequest>,
    manifest: RepoPath,
}

impl MetadataStore {
    /// Load the manifest at `manifest`, or start empty if there is none.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    ///
    /// # Errors
    /// - The manifest exists but cannot be read or parsed
    pub async fn load(fs: Arc<dyn VaultFs>, manifest: RepoPath) -> Result<Self> {
        let metadata = match fs.read(&manifest).await {
            Ok(data) => Metadata::from_json(&data)?,
            Err(Error::NotFound(_)) => {
                debug!("No manifest at {}, starting empty", manifest);
                Metadata::new()
            }
            Err(e) => return Err(e),
        };

        let state = Arc::new(RwLock::new(metadata));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::write_loop(fs, manifest.clone(), state.clone(), rx));

        Ok(Self {
            state,
            writer: tx,
            manifest,
        })
    }

    async fn write_loop(
        fs: Arc<dyn VaultFs>,
        manifest: RepoPath,
        state: Arc<RwLock<Metadata>>,
        mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    ) {
        while let Some(reply) = rx.recv().await {
            let json = state.read().await.to_json();
            let result = match json {
                Ok(json) => fs.write(&manifest, json.as_bytes()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!("Failed to persist manifest: {}", e);
            }
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }

    /// Persist the current state.
    ///
    /// Resolves once this write and every write queued before it finished.
    pub async fn save(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(tx)
            .map_err(|_| Error::Storage("Metadata writer stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Storage("Metadata writer stopped".to_string()))?
    }

    /// Location of the manifest.
    pub fn manifest_path(&self) -> &RepoPath {
        &self.manifest
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> Metadata {
        self.state.read().await.clone()
    }

    /// Read the state.
    pub async fn read<R>(&self, f: impl FnOnce(&Metadata) -> R) -> R {
        f(&*self.state.read().await)
    }

    /// Mutate the state in memory. Call [`save`](Self::save) to persist.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> R {
        f(&mut *self.state.write().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileMetadata;
    use gitvault_storage::{LocalFs, MemoryFs};
    use tempfile::TempDir;

    fn manifest() -> RepoPath {
        RepoPath::parse(".vault/sync-metadata.json").unwrap()
    }

    #[tokio::test]
    async fn test_missing_manifest_loads_empty() {
        let fs = Arc::new(MemoryFs::new());
        let store = MetadataStore::load(fs, manifest()).await.unwrap();
        assert_eq!(store.snapshot().await, Metadata::new());
    }

    #[tokio::test]
    async fn test_save_writes_latest_state() {
        let fs = Arc::new(MemoryFs::new());
        let store = MetadataStore::load(fs.clone(), manifest()).await.unwrap();

        let a = RepoPath::parse("a.md").unwrap();
        store
            .update(|m| m.insert(FileMetadata::new_local(a.clone(), 1)))
            .await;
        let first = store.save();
        store.update(|m| m.last_sync = 99).await;
        let second = store.save();

        first.await.unwrap();
        second.await.unwrap();

        let written = Metadata::from_json(&fs.get(".vault/sync-metadata.json").unwrap()).unwrap();
        assert_eq!(written.last_sync, 99);
        assert!(written.get(&a).unwrap().dirty);
    }

    #[tokio::test]
    async fn test_unreadable_manifest_is_an_error() {
        let fs = Arc::new(MemoryFs::new());
        fs.fail_io_for(".vault/sync-metadata.json");
        let store = MetadataStore::load(fs.clone(), manifest()).await;

        // Reading the failing manifest is an I/O error, not a missing file.
        assert!(matches!(store, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_save_failure_reaches_caller_and_keeps_memory() {
        let fs = Arc::new(MemoryFs::new());
        let store = MetadataStore::load(fs.clone(), manifest()).await.unwrap();
        fs.fail_io_for(".vault/sync-metadata.json");

        store.update(|m| m.last_sync = 5).await;
        assert!(store.save().await.is_err());
        assert_eq!(store.read(|m| m.last_sync).await, 5);
    }

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let temp = TempDir::new().unwrap();
        let fs: Arc<dyn VaultFs> = Arc::new(LocalFs::new(temp.path()).unwrap());

        let store = MetadataStore::load(fs.clone(), manifest()).await.unwrap();
        store.update(|m| m.last_sync = 1234).await;
        store.save().await.unwrap();

        let reloaded = MetadataStore::load(fs, manifest()).await.unwrap();
        assert_eq!(reloaded.read(|m| m.last_sync).await, 1234);
    }

    #[tokio::test]
    async fn test_empty_manifest_file_loads_empty() {
        let fs = Arc::new(MemoryFs::with_files([(".vault/sync-metadata.json", "")]));
        let store = MetadataStore::load(fs, manifest()).await.unwrap();
        assert_eq!(store.snapshot().await, Metadata::new());
    }
}
