//! Change Listener: keeps the Metadata Store in step with local edits.
//!
//! Never touches the network. Only marks entries dirty or tombstoned; the
//! next sync pass decides what to do with them.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gitvault_common::{now_millis, RepoPath, Result};
use gitvault_storage::{list_files_recursive, VaultEvent, VaultFs};

use crate::config::SyncPolicy;
use crate::metadata::FileMetadata;
use crate::store::MetadataStore;

/// Applies local file events to the Metadata Store.
pub struct ChangeListener {
    store: MetadataStore,
    fs: Arc<dyn VaultFs>,
    policy: SyncPolicy,
}

impl ChangeListener {
    /// Create a new change listener.
    pub fn new(store: MetadataStore, fs: Arc<dyn VaultFs>, policy: SyncPolicy) -> Self {
        Self { store, fs, policy }
    }

    /// Apply one event.
    ///
    /// # Errors
    /// - Persisting the store failed
    pub async fn handle(&self, event: VaultEvent) -> Result<()> {
        match event {
            VaultEvent::Create(path) | VaultEvent::Modify(path) => self.on_change(&path).await,
            VaultEvent::Delete(path) => self.on_delete(&path).await,
            VaultEvent::Rename { from, to } => {
                self.on_change(&to).await?;
                self.on_delete(&from).await
            }
        }
    }

    /// Drain `events` until the sender side closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<VaultEvent>) {
        info!("Change listener started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                warn!("Failed to record local change: {}", e);
            }
        }
        info!("Change listener stopped");
    }

    async fn on_change(&self, path: &RepoPath) -> Result<()> {
        if !self.policy.is_syncable(path) {
            return Ok(());
        }

        let now = now_millis();
        let swallowed = self
            .store
            .update(|m| match m.get_mut(path) {
                Some(entry) if entry.just_downloaded => {
                    entry.just_downloaded = false;
                    true
                }
                Some(entry) => {
                    entry.mark_modified(now);
                    false
                }
                None => {
                    m.insert(FileMetadata::new_local(path.clone(), now));
                    false
                }
            })
            .await;

        if swallowed {
            debug!("Ignoring own write to {}", path);
        } else {
            debug!("Marked {} dirty", path);
        }
        self.persist(path).await
    }

    async fn on_delete(&self, path: &RepoPath) -> Result<()> {
        if !self.policy.is_syncable(path) {
            return Ok(());
        }

        let now = now_millis();
        let tracked = self
            .store
            .update(|m| match m.get_mut(path) {
                Some(entry) => {
                    entry.mark_deleted(now);
                    true
                }
                None => false,
            })
            .await;

        if !tracked {
            return Ok(());
        }
        debug!("Tombstoned {}", path);
        self.persist(path).await
    }

    /// Writing the manifest raises an event for the manifest itself; saving
    /// in response would loop forever.
    async fn persist(&self, path: &RepoPath) -> Result<()> {
        if self.policy.is_manifest(path) {
            return Ok(());
        }
        self.store.save().await
    }

    /// Reconcile the store with what is on disk.
    ///
    /// Untracked syncable files enter the store dirty, tombstoned files that
    /// exist again are resurrected, and tracked files that vanished while
    /// nothing was listening are tombstoned. Stale `just_downloaded` flags are
    /// cleared since no engine write can be in flight. Returns the number of
    /// entries changed.
    pub async fn scan(&self) -> Result<usize> {
        let config_dir = self.policy.config_dir().clone();
        let skip_config = !self.policy.syncs_config_dir();
        let files = list_files_recursive(self.fs.as_ref(), &RepoPath::root(), |folder| {
            folder.top_level() == Some(".git")
                || (skip_config && *folder == config_dir)
        })
        .await?;

        let on_disk: Vec<RepoPath> = files
            .into_iter()
            .filter(|p| self.policy.is_syncable(p) && !self.policy.is_manifest(p))
            .collect();

        let now = now_millis();
        let changed = self
            .store
            .update(|m| {
                let mut changed = 0;
                for path in &on_disk {
                    match m.get_mut(path) {
                        Some(entry) if entry.is_deleted() => {
                            entry.mark_modified(now);
                            changed += 1;
                        }
                        Some(_) => {}
                        None => {
                            m.insert(FileMetadata::new_local(path.clone(), now));
                            changed += 1;
                        }
                    }
                }

                for entry in m.files.values_mut() {
                    if entry.just_downloaded {
                        entry.just_downloaded = false;
                        changed += 1;
                    }
                    if !entry.is_deleted()
                        && !self.policy.is_manifest(&entry.path)
                        && self.policy.is_syncable(&entry.path)
                        && on_disk.binary_search(&entry.path).is_err()
                    {
                        entry.mark_deleted(now);
                        changed += 1;
                    }
                }
                changed
            })
            .await;

        if changed > 0 {
            info!("Initial scan recorded {} changes", changed);
            self.store.save().await?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::metadata::FileState;
    use gitvault_storage::MemoryFs;

    fn path(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    async fn listener(fs: Arc<MemoryFs>) -> (ChangeListener, MetadataStore) {
        let policy = SyncConfig::default().policy().unwrap();
        let store = MetadataStore::load(fs.clone(), policy.manifest_path().clone())
            .await
            .unwrap();
        (ChangeListener::new(store.clone(), fs, policy), store)
    }

    #[tokio::test]
    async fn test_create_marks_dirty_and_persists() {
        let fs = Arc::new(MemoryFs::with_files([("a.md", "a")]));
        let (listener, store) = listener(fs.clone()).await;

        listener.handle(VaultEvent::Create(path("a.md"))).await.unwrap();

        let entry = store.read(|m| m.get(&path("a.md")).cloned()).await.unwrap();
        assert!(entry.dirty);
        assert_eq!(entry.sha, None);
        assert!(fs.get(".vault/sync-metadata.json").is_some());
    }

    #[tokio::test]
    async fn test_own_write_is_swallowed_once() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs).await;
        store
            .update(|m| m.insert(FileMetadata::new_downloaded(path("a.md"), "s".into(), 1)))
            .await;

        listener.handle(VaultEvent::Modify(path("a.md"))).await.unwrap();
        let entry = store.read(|m| m.get(&path("a.md")).cloned()).await.unwrap();
        assert!(!entry.just_downloaded);
        assert!(!entry.dirty);
        assert_eq!(entry.last_modified, 1);

        listener.handle(VaultEvent::Modify(path("a.md"))).await.unwrap();
        let entry = store.read(|m| m.get(&path("a.md")).cloned()).await.unwrap();
        assert!(entry.dirty);
    }

    #[tokio::test]
    async fn test_delete_tombstones_tracked_only() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs).await;
        store
            .update(|m| m.insert(FileMetadata::new_local(path("a.md"), 1)))
            .await;

        listener.handle(VaultEvent::Delete(path("a.md"))).await.unwrap();
        listener.handle(VaultEvent::Delete(path("never.md"))).await.unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.get(&path("a.md")).unwrap().is_deleted());
        assert!(snapshot.get(&path("never.md")).is_none());
    }

    #[tokio::test]
    async fn test_rename_is_create_then_delete() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs).await;
        store
            .update(|m| m.insert(FileMetadata::new_downloaded(path("old.md"), "s".into(), 1)))
            .await;

        listener
            .handle(VaultEvent::Rename {
                from: path("old.md"),
                to: path("new.md"),
            })
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.get(&path("new.md")).unwrap().dirty);
        assert!(snapshot.get(&path("old.md")).unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_unsyncable_paths_are_ignored() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs).await;

        listener.handle(VaultEvent::Create(path(".vault/workspace.json"))).await.unwrap();
        listener.handle(VaultEvent::Create(path(".vault/app.json"))).await.unwrap();
        listener.handle(VaultEvent::Create(path(".git/index"))).await.unwrap();

        assert!(store.snapshot().await.files.is_empty());
    }

    #[tokio::test]
    async fn test_manifest_event_does_not_persist() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs.clone()).await;

        listener
            .handle(VaultEvent::Modify(path(".vault/sync-metadata.json")))
            .await
            .unwrap();

        assert!(store.read(|m| m.get(&path(".vault/sync-metadata.json")).is_some()).await);
        assert!(fs.get(".vault/sync-metadata.json").is_none());
    }

    #[tokio::test]
    async fn test_scan_reconciles_with_disk() {
        let fs = Arc::new(MemoryFs::with_files([
            ("a.md", "a"),
            ("back.md", "b"),
            ("dir/c.md", "c"),
            (".vault/app.json", "{}"),
            (".git/HEAD", "ref"),
        ]));
        let (listener, store) = listener(fs).await;
        store
            .update(|m| {
                let mut back = FileMetadata::new_local(path("back.md"), 1);
                back.mark_deleted(2);
                m.insert(back);
                m.insert(FileMetadata::new_downloaded(path("gone.md"), "s".into(), 1));
            })
            .await;

        let changed = listener.scan().await.unwrap();
        // a.md, dir/c.md added; back.md resurrected; gone.md tombstoned and
        // its stale flag cleared.
        assert_eq!(changed, 5);

        let snapshot = store.snapshot().await;
        assert!(snapshot.get(&path("a.md")).unwrap().dirty);
        assert!(snapshot.get(&path("dir/c.md")).is_some());
        assert_eq!(snapshot.get(&path("back.md")).unwrap().state, FileState::Active);
        assert!(snapshot.get(&path("gone.md")).unwrap().is_deleted());
        assert!(snapshot.get(&path(".vault/app.json")).is_none());
        assert!(snapshot.get(&path(".git/HEAD")).is_none());

        // A second scan finds nothing new.
        assert_eq!(listener.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let fs = Arc::new(MemoryFs::new());
        let (listener, store) = listener(fs).await;
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(VaultEvent::Create(path("a.md"))).unwrap();
        tx.send(VaultEvent::Create(path("b.md"))).unwrap();
        drop(tx);
        listener.run(rx).await;

        assert_eq!(store.snapshot().await.files.len(), 2);
    }
}
