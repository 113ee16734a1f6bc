//! Core sync engine that orchestrates all sync operations.
//!
//! One pass fetches the remote tree and manifest, compares them with the
//! local store and disk, applies downloads and local deletions directly, and
//! publishes everything else as a single commit that also carries the
//! updated manifest.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use gitvault_common::{git_blob_sha, now_millis, Error, RepoPath, Result};
use gitvault_storage::{list_files_recursive, GitRemote, RemoteTree, VaultFs};

use crate::actions::{determine_sync_actions, ActionKind};
use crate::commit::{CommitAssembler, CommitResult, PendingCommit};
use crate::config::{SyncConfig, SyncPolicy};
use crate::conflict::{is_conflict, ConflictFile, ConflictResolution, ConflictResolver, ConflictSender};
use crate::metadata::{FileMetadata, FileState, Metadata};
use crate::retry::RetryExecutor;
use crate::store::MetadataStore;

/// Which kind of pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// First sync of this vault against the remote.
    Bootstrap,
    /// Three-way reconciliation against the remote manifest.
    Steady,
}

/// Summary of one pass.
#[derive(Debug)]
pub struct SyncReport {
    pub kind: PassKind,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub conflicts: usize,
    /// Per-file failures; these files keep their previous metadata.
    pub failed: Vec<(RepoPath, Error)>,
    /// New branch head, if the pass committed.
    pub commit: Option<String>,
    pub duration: Duration,
}

impl SyncReport {
    fn new(kind: PassKind) -> Self {
        Self {
            kind,
            uploaded: 0,
            downloaded: 0,
            deleted_local: 0,
            deleted_remote: 0,
            conflicts: 0,
            failed: Vec::new(),
            commit: None,
            duration: Duration::ZERO,
        }
    }

    /// Whether the pass changed nothing on either side.
    pub fn is_noop(&self) -> bool {
        self.commit.is_none() && self.downloaded == 0 && self.deleted_local == 0
    }

    fn record_failure(&mut self, path: RepoPath, err: Error) {
        warn!("Failed to sync {}: {}", path, err);
        self.failed.push((path, err));
    }
}

/// Result of a sync request.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass was already running.
    Skipped,
}

/// Releases the sync gate when dropped, including on error or cancellation.
struct SyncGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Main sync engine for reconciling a vault with its remote.
pub struct SyncEngine {
    /// Remote Git hosting API.
    remote: Arc<dyn GitRemote>,
    /// Local vault.
    fs: Arc<dyn VaultFs>,
    /// Durable per-file state.
    store: MetadataStore,
    /// Conflict resolver.
    resolver: ConflictResolver,
    /// Retry executor for remote reads.
    retry_executor: RetryExecutor,
    policy: SyncPolicy,
    config: SyncConfig,
    running: AtomicBool,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - The config does not describe a valid policy
    pub fn new(
        remote: Arc<dyn GitRemote>,
        fs: Arc<dyn VaultFs>,
        store: MetadataStore,
        config: SyncConfig,
    ) -> Result<Self> {
        let policy = config.policy()?;
        if store.manifest_path() != policy.manifest_path() {
            return Err(Error::InvalidInput(format!(
                "Store manifest {} does not match configured {}",
                store.manifest_path(),
                policy.manifest_path()
            )));
        }

        Ok(Self {
            remote,
            fs,
            store,
            resolver: ConflictResolver::new(config.conflict_strategy),
            retry_executor: RetryExecutor::new(config.retry_config()),
            policy,
            config,
            running: AtomicBool::new(false),
        })
    }

    /// Route `ask` conflict decisions through `channel`.
    pub fn with_conflict_channel(mut self, channel: ConflictSender) -> Self {
        self.resolver = ConflictResolver::new(self.config.conflict_strategy).with_channel(channel);
        self
    }

    /// Get the metadata store.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Get the syncability policy.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Whether a pass is running right now.
    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<SyncGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard {
                running: &self.running,
            })
    }

    /// Run the appropriate pass: bootstrap if this vault never synced,
    /// steady-state otherwise.
    pub async fn run_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            debug!("Sync already running, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let start = Instant::now();
        let never_synced = self.store.read(|m| m.last_sync == 0).await;
        let result = if never_synced {
            self.bootstrap().await
        } else {
            self.reconcile().await
        };
        Self::finish(result, start)
    }

    /// Bootstrap pass.
    ///
    /// # Errors
    /// - [`Error::UnsafeState`] if both the vault and the remote have files
    /// - Any remote error after retries
    pub async fn first_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        let start = Instant::now();
        Self::finish(self.bootstrap().await, start)
    }

    /// Steady-state pass.
    ///
    /// # Errors
    /// - [`Error::MissingManifest`] if the remote has no manifest
    /// - Any remote error after retries
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        let start = Instant::now();
        Self::finish(self.reconcile().await, start)
    }

    fn finish(result: Result<SyncReport>, start: Instant) -> Result<SyncOutcome> {
        match result {
            Ok(mut report) => {
                report.duration = start.elapsed();
                info!(
                    "{:?} sync completed in {:?}: {} uploaded, {} downloaded, {} deleted locally, {} deleted remotely, {} conflicts, {} failed",
                    report.kind,
                    report.duration,
                    report.uploaded,
                    report.downloaded,
                    report.deleted_local,
                    report.deleted_remote,
                    report.conflicts,
                    report.failed.len()
                );
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                error!("Sync failed after {:?}: {}", start.elapsed(), e);
                Err(e)
            }
        }
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    async fn fetch_tree(&self) -> Result<RemoteTree> {
        let branch = self.remote.branch();
        self.retry_executor
            .execute("get_tree", || self.remote.get_tree(branch))
            .await
    }

    async fn fetch_blob(&self, sha: &str) -> Result<Vec<u8>> {
        self.retry_executor
            .execute("get_blob", || self.remote.get_blob(sha))
            .await?
            .decode()
    }

    /// Fetch the contents of `items` concurrently. Any failure aborts.
    async fn fetch_blobs(&self, items: Vec<(RepoPath, String)>) -> Result<Vec<(RepoPath, String, Vec<u8>)>> {
        stream::iter(items)
            .map(|(path, sha)| async move {
                let data = self.fetch_blob(&sha).await?;
                Ok((path, sha, data))
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<Result<_>>>()
            .await
            .into_iter()
            .collect()
    }

    async fn bootstrap(&self) -> Result<SyncReport> {
        let mut report = SyncReport::new(PassKind::Bootstrap);
        let manifest_path = self.policy.manifest_path();
        info!("Starting first sync against {}", self.remote.name());

        let tree = match self.fetch_tree().await {
            Err(Error::EmptyRepository) => {
                info!("Remote repository is empty, creating {}", manifest_path);
                self.remote.create_file(manifest_path, b"", "First sync").await?;
                self.fetch_tree().await?
            }
            other => other?,
        };

        let config_dir = self.policy.config_dir().clone();
        let local_files = list_files_recursive(self.fs.as_ref(), &RepoPath::root(), |folder| {
            *folder == config_dir || folder.top_level() == Some(".git")
        })
        .await?;

        let remote_files: Vec<(RepoPath, String)> = tree
            .blobs()
            .filter_map(|item| RepoPath::parse(&item.path).ok().map(|p| (p, item.sha.clone())))
            .filter(|(path, _)| !self.policy.is_manifest(path))
            .collect();
        let remote_has_content = remote_files
            .iter()
            .any(|(path, _)| !self.policy.is_config_path(path));

        let mirrored = if remote_has_content && !local_files.is_empty() {
            self.mirrored_files(&local_files, &tree).await?
        } else {
            HashMap::new()
        };
        if local_files.len() > mirrored.len() && remote_has_content {
            return Err(Error::UnsafeState(
                "Both the vault and the remote already have files; refusing to merge them on first sync"
                    .to_string(),
            ));
        }

        let mut downloaded = HashSet::new();
        if remote_has_content {
            if let Some(item) = tree.get(&manifest_path.to_string()) {
                let sha = item.sha.clone();
                self.adopt_remote_tombstones(&sha).await?;
            }

            let wanted: Vec<(RepoPath, String)> = remote_files
                .into_iter()
                .filter(|(path, _)| {
                    self.policy.allows_remote(path)
                        && self.policy.is_syncable(path)
                        && !mirrored.contains_key(path)
                })
                .collect();
            let blobs = self.fetch_blobs(wanted).await?;
            let now = now_millis();
            for (path, sha, data) in blobs {
                match self.write_downloaded(&path, &sha, &data, now).await {
                    Ok(()) => {
                        report.downloaded += 1;
                        downloaded.insert(path);
                    }
                    Err(e) => report.record_failure(path, e),
                }
            }
            if !mirrored.is_empty() {
                info!("{} files already match the remote, resuming first sync", mirrored.len());
                self.store
                    .update(|m| {
                        for (path, sha) in &mirrored {
                            match m.get_mut(path) {
                                Some(entry) if !entry.is_deleted() => {
                                    entry.mark_synced(sha.clone());
                                    entry.just_downloaded = false;
                                }
                                _ => {
                                    let mut entry = FileMetadata::new_local(path.clone(), now);
                                    entry.mark_synced(sha.clone());
                                    m.insert(entry);
                                }
                            }
                        }
                    })
                    .await;
                downloaded.extend(mirrored.into_keys());
            }
            self.store.save().await?;
        }

        let candidates: Vec<RepoPath> = self
            .store
            .read(|m| {
                m.active_paths()
                    .filter(|p| {
                        !self.policy.is_manifest(p)
                            && self.policy.is_syncable(p)
                            && !downloaded.contains(*p)
                    })
                    .cloned()
                    .collect()
            })
            .await;

        let mut pending = PendingCommit::default();
        self.read_uploads(candidates, &mut pending, &mut report).await;

        let result = self.commit(pending, &tree, &mut report).await?;
        self.merge_commit(&result).await?;
        Ok(report)
    }

    /// Local files whose content already equals the remote blob at the same
    /// path, as left behind by a first sync that failed before its commit.
    /// Maps each to its blob id.
    async fn mirrored_files(
        &self,
        local_files: &[RepoPath],
        tree: &RemoteTree,
    ) -> Result<HashMap<RepoPath, String>> {
        let candidates: Vec<(RepoPath, String)> = local_files
            .iter()
            .filter_map(|path| {
                tree.get(&path.to_string())
                    .filter(|item| item.is_blob())
                    .map(|item| (path.clone(), item.sha.clone()))
            })
            .collect();

        let read: Vec<(RepoPath, String, Result<Vec<u8>>)> = stream::iter(candidates)
            .map(|(path, sha)| async move {
                let data = self.fs.read(&path).await;
                (path, sha, data)
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut mirrored = HashMap::new();
        for (path, sha, data) in read {
            if git_blob_sha(&data?) == sha {
                mirrored.insert(path, sha);
            }
        }
        Ok(mirrored)
    }

    /// Keep tombstones another device published, so our first manifest does
    /// not forget them.
    async fn adopt_remote_tombstones(&self, manifest_sha: &str) -> Result<()> {
        let remote_meta = Metadata::from_json(&self.fetch_blob(manifest_sha).await?)?;
        self.store
            .update(|m| {
                for remote in remote_meta.files.values().filter(|r| r.is_deleted()) {
                    if m.get(&remote.path).is_none() {
                        let mut entry = remote.clone();
                        entry.dirty = false;
                        entry.just_downloaded = false;
                        m.insert(entry);
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn reconcile(&self) -> Result<SyncReport> {
        let mut report = SyncReport::new(PassKind::Steady);
        let manifest_path = self.policy.manifest_path();

        let tree = self.fetch_tree().await?;
        let manifest_item = tree
            .get(&manifest_path.to_string())
            .ok_or_else(|| Error::MissingManifest(manifest_path.to_string()))?;
        let remote_meta = Metadata::from_json(&self.fetch_blob(&manifest_item.sha).await?)?;
        let local = self.store.snapshot().await;

        let (local_hashes, mut skip) = self.hash_local(&local, &mut report).await;

        let conflicts = self
            .collect_conflicts(&tree, &remote_meta, &local, &local_hashes, &mut skip, &mut report)
            .await?;
        report.conflicts = conflicts.len();
        skip.extend(conflicts.iter().map(|c| c.file_path.clone()));
        let resolutions = self.resolver.resolve(conflicts).await?;

        let actions = determine_sync_actions(
            &remote_meta.files,
            &local.files,
            &local_hashes,
            &skip,
            &self.policy,
        );
        for action in &actions {
            debug!("Planned {}", action);
        }

        let acted: HashSet<&RepoPath> = actions.iter().map(|a| &a.path).collect();
        let adopted = self
            .adopt_agreed_state(&remote_meta, &local_hashes, &skip, &acted)
            .await;

        if actions.is_empty() && resolutions.is_empty() {
            if adopted > 0 {
                self.store.save().await?;
            }
            info!("Nothing to sync");
            return Ok(report);
        }

        let mut downloads = Vec::new();
        let mut uploads = Vec::new();
        let mut pending = PendingCommit::default();
        for action in actions {
            match action.kind {
                ActionKind::Download => downloads.push(action.path),
                ActionKind::Upload => uploads.push(action.path),
                ActionKind::DeleteLocal => {
                    let at = remote_meta
                        .get(&action.path)
                        .and_then(FileMetadata::deleted_at)
                        .unwrap_or_else(now_millis);
                    match self.delete_local(&action.path, at).await {
                        Ok(()) => report.deleted_local += 1,
                        Err(e) => report.record_failure(action.path, e),
                    }
                }
                ActionKind::DeleteRemote => {
                    if tree.get(&action.path.to_string()).is_some() {
                        pending.deletions.push(action.path);
                    } else {
                        debug!("{} is already gone from the remote tree", action.path);
                    }
                }
            }
        }

        let wanted: Vec<(RepoPath, String)> = downloads
            .into_iter()
            .filter_map(|path| {
                let sha = tree
                    .get(&path.to_string())
                    .map(|item| item.sha.clone())
                    .or_else(|| remote_meta.get(&path).and_then(|r| r.sha.clone()));
                match sha {
                    Some(sha) => Some((path, sha)),
                    None => {
                        report.record_failure(
                            path.clone(),
                            Error::NotFound(format!("{} is not in the remote tree", path)),
                        );
                        None
                    }
                }
            })
            .collect();
        for (path, sha, data) in self.fetch_blobs(wanted).await? {
            let modified = remote_meta
                .get(&path)
                .map(|r| r.last_modified)
                .unwrap_or_else(now_millis);
            match self.write_downloaded(&path, &sha, &data, modified).await {
                Ok(()) => report.downloaded += 1,
                Err(e) => report.record_failure(path, e),
            }
        }
        self.store.save().await?;

        self.read_uploads(uploads, &mut pending, &mut report).await;
        pending.uploads.extend(
            resolutions
                .iter()
                .map(|r| (r.file_path.clone(), r.content.clone())),
        );

        let result = self.commit(pending, &tree, &mut report).await?;
        self.merge_commit(&result).await?;
        self.write_resolutions(&resolutions, &result, &mut report).await?;
        Ok(report)
    }

    /// Hash every active local file. Returns the hashes and the paths that
    /// must be left alone this pass.
    async fn hash_local(
        &self,
        local: &Metadata,
        report: &mut SyncReport,
    ) -> (HashMap<RepoPath, String>, HashSet<RepoPath>) {
        let paths: Vec<RepoPath> = local
            .active_paths()
            .filter(|p| !self.policy.is_manifest(p) && self.policy.is_syncable(p))
            .cloned()
            .collect();

        let results: Vec<(RepoPath, Result<Vec<u8>>)> = stream::iter(paths)
            .map(|path| async move {
                let data = self.fs.read(&path).await;
                (path, data)
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut hashes = HashMap::new();
        let mut skip = HashSet::new();
        for (path, result) in results {
            match result {
                Ok(data) => {
                    hashes.insert(path, git_blob_sha(&data));
                }
                Err(Error::NotFound(_)) => {
                    debug!("{} is tracked but missing on disk", path);
                    skip.insert(path);
                }
                Err(e) => {
                    skip.insert(path.clone());
                    report.record_failure(path, e);
                }
            }
        }
        (hashes, skip)
    }

    async fn collect_conflicts(
        &self,
        tree: &RemoteTree,
        remote_meta: &Metadata,
        local: &Metadata,
        local_hashes: &HashMap<RepoPath, String>,
        skip: &mut HashSet<RepoPath>,
        report: &mut SyncReport,
    ) -> Result<Vec<ConflictFile>> {
        let mut candidates = Vec::new();
        for (path, remote) in &remote_meta.files {
            if self.policy.is_manifest(path)
                || skip.contains(path)
                || !self.policy.is_syncable(path)
                || !self.policy.allows_remote(path)
            {
                continue;
            }
            let Some(cached) = local.get(path) else {
                continue;
            };
            if remote.is_deleted() || cached.is_deleted() {
                continue;
            }
            let (Some(remote_sha), Some(local_sha)) = (remote.sha.as_deref(), local_hashes.get(path))
            else {
                continue;
            };

            if is_conflict(remote_sha, cached.sha.as_deref(), local_sha) {
                let blob_sha = tree
                    .get(&path.to_string())
                    .map(|item| item.sha.clone())
                    .unwrap_or_else(|| remote_sha.to_string());
                candidates.push((path.clone(), blob_sha));
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        info!("Detected {} conflicts", candidates.len());

        let remote_contents = self.fetch_blobs(candidates).await?;
        let mut conflicts = Vec::with_capacity(remote_contents.len());
        for (path, _, remote_content) in remote_contents {
            match self.fs.read(&path).await {
                Ok(local_content) => conflicts.push(ConflictFile {
                    file_path: path,
                    remote_content,
                    local_content,
                }),
                Err(e) => {
                    skip.insert(path.clone());
                    report.record_failure(path, e);
                }
            }
        }
        conflicts.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(conflicts)
    }

    /// Record state both sides already agree on without any transfer: a
    /// cached sha that lags behind identical content, or a remote tombstone
    /// for a path this vault never tracked. Returns the number of entries
    /// changed.
    async fn adopt_agreed_state(
        &self,
        remote_meta: &Metadata,
        local_hashes: &HashMap<RepoPath, String>,
        skip: &HashSet<RepoPath>,
        acted: &HashSet<&RepoPath>,
    ) -> usize {
        self.store
            .update(|m| {
                let mut changed = 0;
                for (path, remote) in &remote_meta.files {
                    if self.policy.is_manifest(path) || skip.contains(path) || acted.contains(path) {
                        continue;
                    }
                    if m.get(path).is_none() {
                        if remote.is_deleted() {
                            let mut entry = remote.clone();
                            entry.dirty = false;
                            entry.just_downloaded = false;
                            m.insert(entry);
                            changed += 1;
                        }
                        continue;
                    }

                    let Some(entry) = m.get_mut(path) else {
                        continue;
                    };
                    let (Some(remote_sha), Some(local_sha)) = (&remote.sha, local_hashes.get(path))
                    else {
                        continue;
                    };
                    if !entry.is_deleted()
                        && !remote.is_deleted()
                        && remote_sha == local_sha
                        && (entry.sha.as_ref() != Some(remote_sha) || entry.dirty)
                    {
                        entry.mark_synced(remote_sha.clone());
                        changed += 1;
                    }
                }
                changed
            })
            .await
    }

    /// Write remote content to disk, flagging the entry first so the change
    /// listener ignores the resulting event.
    async fn write_downloaded(&self, path: &RepoPath, sha: &str, data: &[u8], modified: i64) -> Result<()> {
        let previous = self
            .store
            .update(|m| {
                let previous = m.get(path).cloned();
                m.insert(FileMetadata::new_downloaded(path.clone(), sha.to_string(), modified));
                previous
            })
            .await;

        if let Err(e) = self.fs.write(path, data).await {
            self.store
                .update(|m| match previous {
                    Some(entry) => m.insert(entry),
                    None => {
                        m.files.remove(path);
                    }
                })
                .await;
            return Err(e);
        }
        debug!("Downloaded {}", path);
        Ok(())
    }

    async fn delete_local(&self, path: &RepoPath, at: i64) -> Result<()> {
        match self.fs.remove(path).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.store
            .update(|m| {
                if let Some(entry) = m.get_mut(path) {
                    entry.state = FileState::Deleted { at };
                    entry.dirty = false;
                }
            })
            .await;
        debug!("Deleted {} locally", path);
        Ok(())
    }

    async fn read_uploads(&self, paths: Vec<RepoPath>, pending: &mut PendingCommit, report: &mut SyncReport) {
        let results: Vec<(RepoPath, Result<Vec<u8>>)> = stream::iter(paths)
            .map(|path| async move {
                let data = self.fs.read(&path).await;
                (path, data)
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        for (path, result) in results {
            match result {
                Ok(data) => pending.uploads.push((path, data)),
                Err(e) => report.record_failure(path, e),
            }
        }
    }

    async fn commit(&self, pending: PendingCommit, tree: &RemoteTree, report: &mut SyncReport) -> Result<CommitResult> {
        let staged = self.store.snapshot().await;
        let message = match report.kind {
            PassKind::Bootstrap => "First sync",
            PassKind::Steady => self.config.commit_message.as_str(),
        };

        let result = CommitAssembler::new(self.remote.as_ref(), &self.retry_executor, self.concurrency())
            .commit(
                pending,
                staged,
                self.policy.manifest_path(),
                &tree.sha,
                message,
                now_millis(),
            )
            .await?;

        report.uploaded += result.recorded.len();
        report.deleted_remote += result.deleted;
        report.commit = Some(result.commit_sha.clone());
        Ok(result)
    }

    /// Apply what the commit published to the store and persist it.
    async fn merge_commit(&self, result: &CommitResult) -> Result<()> {
        self.store
            .update(|m| {
                for (path, sha) in &result.recorded {
                    match m.get_mut(path) {
                        Some(entry) => entry.mark_synced(sha.clone()),
                        None => {
                            if let Some(entry) = result.manifest.get(path) {
                                m.insert(entry.clone());
                            }
                        }
                    }
                }
                let manifest = self.policy.manifest_path();
                m.ensure_manifest_entry(manifest, result.manifest.last_sync);
                m.last_sync = result.manifest.last_sync;
            })
            .await;
        self.store.save().await
    }

    /// Write committed conflict resolutions to disk.
    async fn write_resolutions(
        &self,
        resolutions: &[ConflictResolution],
        result: &CommitResult,
        report: &mut SyncReport,
    ) -> Result<()> {
        if resolutions.is_empty() {
            return Ok(());
        }

        let committed: HashMap<&RepoPath, &String> = result.recorded.iter().map(|(p, s)| (p, s)).collect();
        let now = now_millis();
        for resolution in resolutions {
            let Some(sha) = committed.get(&resolution.file_path) else {
                continue;
            };
            if let Err(e) = self
                .write_downloaded(&resolution.file_path, sha, &resolution.content, now)
                .await
            {
                report.record_failure(resolution.file_path.clone(), e);
            }
        }
        self.store.save().await
    }
}
