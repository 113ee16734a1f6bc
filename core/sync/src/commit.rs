//! Commit assembly.
//!
//! Turns a set of uploads and remote deletions plus the updated manifest into
//! one commit on the branch. Text content goes inline in the tree request;
//! anything else is created as a blob first and referenced by id.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use gitvault_common::{git_blob_sha, Error, RepoPath, Result};
use gitvault_storage::{encode_base64, GitRemote, TreeEntry};

use crate::metadata::{FileMetadata, Metadata};
use crate::retry::RetryExecutor;

/// Extensions that are always treated as binary, whatever the bytes say.
const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "tif", "tiff", "heic", "avif",
    // audio
    "mp3", "wav", "ogg", "flac", "m4a", "aac", "opus", "3gp",
    // video
    "mp4", "mov", "avi", "mkv", "webm", "ogv",
    // archives
    "zip", "gz", "tgz", "tar", "7z", "rar", "bz2", "xz",
    // documents
    "pdf", "epub", "docx", "xlsx", "pptx", "odt",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // executables
    "exe", "dll", "so", "dylib", "wasm", "bin",
];

/// Whether `content` must be uploaded as a base64 blob.
pub fn is_binary(path: &RepoPath, content: &[u8]) -> bool {
    if let Some(ext) = path.extension() {
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }
    content.contains(&0) || std::str::from_utf8(content).is_err()
}

/// Changes to commit in one pass.
#[derive(Debug, Default)]
pub struct PendingCommit {
    /// Paths with the content to upload.
    pub uploads: Vec<(RepoPath, Vec<u8>)>,
    /// Paths to remove from the remote tree.
    pub deletions: Vec<RepoPath>,
}

/// Outcome of a successful commit.
#[derive(Debug)]
pub struct CommitResult {
    /// Id of the new branch head.
    pub commit_sha: String,
    /// Blob ids recorded for uploaded paths.
    pub recorded: Vec<(RepoPath, String)>,
    /// Paths removed from the remote tree.
    pub deleted: usize,
    /// Manifest state that was committed.
    pub manifest: Metadata,
}

/// Builds and publishes commits against one remote.
pub struct CommitAssembler<'a> {
    remote: &'a dyn GitRemote,
    retry: &'a RetryExecutor,
    concurrency: usize,
}

impl<'a> CommitAssembler<'a> {
    /// Create a new assembler.
    pub fn new(remote: &'a dyn GitRemote, retry: &'a RetryExecutor, concurrency: usize) -> Self {
        Self {
            remote,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Hash one file into a tree entry, creating a blob for binary content.
    ///
    /// Returns the entry and the blob id it will have on the remote.
    pub async fn prepare_entry(&self, path: &RepoPath, content: Vec<u8>) -> Result<(TreeEntry, String)> {
        if is_binary(path, &content) {
            let encoded = encode_base64(&content);
            let sha = self
                .retry
                .execute("create_blob", || self.remote.create_blob(&encoded))
                .await?;
            debug!("Created blob {} for {}", sha, path);
            return Ok((TreeEntry::blob(path.to_string(), sha.clone()), sha));
        }

        let sha = git_blob_sha(&content);
        let text = String::from_utf8(content)
            .map_err(|e| Error::InvalidInput(format!("{} is not text: {}", path, e)))?;
        Ok((TreeEntry::text(path.to_string(), text), sha))
    }

    /// Commit `pending` on top of `base_tree`.
    ///
    /// `staged` is a copy of the local metadata; recorded hashes, the
    /// manifest entry and `last_sync` are applied to it and the result is
    /// committed as the manifest at `manifest_path`. The caller merges the
    /// returned state into its store only on success.
    ///
    /// # Errors
    /// - An upload could not be prepared (blob creation ran out of retries);
    ///   no partial commit is made
    /// - Any tree, commit or branch call failed; nothing was published
    pub async fn commit(
        &self,
        pending: PendingCommit,
        mut staged: Metadata,
        manifest_path: &RepoPath,
        base_tree: &str,
        message: &str,
        now: i64,
    ) -> Result<CommitResult> {
        let PendingCommit { uploads, deletions } = pending;

        let prepared: Vec<(RepoPath, TreeEntry, String)> = stream::iter(uploads)
            .map(|(path, content)| async move {
                match self.prepare_entry(&path, content).await {
                    Ok((entry, sha)) => Ok((path, entry, sha)),
                    Err(e) => {
                        warn!("Abandoning commit, {} could not be prepared: {}", path, e);
                        Err(e)
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut entries = Vec::with_capacity(prepared.len() + deletions.len() + 1);
        let mut recorded = Vec::with_capacity(prepared.len());
        for (path, entry, sha) in prepared {
            entries.push(entry);
            recorded.push((path, sha));
        }
        let deleted = deletions.len();
        entries.extend(deletions.iter().map(|p| TreeEntry::delete(p.to_string())));

        for (path, sha) in &recorded {
            match staged.get_mut(path) {
                Some(meta) => meta.mark_synced(sha.clone()),
                None => {
                    let mut meta = FileMetadata::new_local(path.clone(), now);
                    meta.mark_synced(sha.clone());
                    staged.insert(meta);
                }
            }
        }
        staged.ensure_manifest_entry(manifest_path, now);
        staged.last_sync = now;
        entries.push(TreeEntry::text(manifest_path.to_string(), staged.to_json()?));

        // Tree creation is content-addressed, so retrying it is harmless.
        let tree_sha = self
            .retry
            .execute("create_tree", || self.remote.create_tree(&entries, base_tree))
            .await?;
        let parent = self
            .retry
            .execute("get_branch_head_sha", || self.remote.get_branch_head_sha())
            .await?;
        let commit_sha = self.remote.create_commit(message, &tree_sha, &parent).await?;
        self.remote.update_branch_head(&commit_sha).await?;

        info!(
            "Committed {} ({} entries) on {}",
            commit_sha,
            entries.len(),
            self.remote.branch()
        );

        Ok(CommitResult {
            commit_sha,
            recorded,
            deleted,
            manifest: staged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitvault_storage::{EntrySource, MemoryRemote, RemoteOp};

    fn path(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    #[test]
    fn test_content_probe() {
        assert!(!is_binary(&path("a.md"), b"# Title\n"));
        assert!(!is_binary(&path("data.json"), "{\"k\": \"ü\"}".as_bytes()));
        assert!(is_binary(&path("pic.PNG"), b"not really a png"));
        assert!(is_binary(&path("blob.dat"), &[0x66, 0x00, 0x67]));
        assert!(is_binary(&path("latin1.txt"), &[0xe9, 0x74, 0xe9]));
    }

    #[tokio::test]
    async fn test_binary_goes_through_blob_creation() {
        let remote = MemoryRemote::with_files([("a.md", "alpha")]);
        let retry = RetryExecutor::default();
        let assembler = CommitAssembler::new(&remote, &retry, 4);
        let tree = remote.get_tree("main").await.unwrap();
        let manifest = path(".vault/sync-metadata.json");

        let pending = PendingCommit {
            uploads: vec![
                (path("img.png"), vec![137, 80, 78, 71, 0, 1]),
                (path("b.md"), b"beta".to_vec()),
            ],
            deletions: vec![path("a.md")],
        };
        let result = assembler
            .commit(pending, Metadata::new(), &manifest, &tree.sha, "Sync", 100)
            .await
            .unwrap();

        assert_eq!(remote.calls(RemoteOp::CreateBlob), 1);
        let request = &remote.tree_requests()[0];
        let image = request.iter().find(|e| e.path == "img.png").unwrap();
        assert!(matches!(image.source, EntrySource::Sha(_)));
        let text = request.iter().find(|e| e.path == "b.md").unwrap();
        assert_eq!(text.source, EntrySource::Content("beta".to_string()));

        assert_eq!(remote.file("img.png").unwrap(), vec![137, 80, 78, 71, 0, 1]);
        assert_eq!(remote.file("a.md"), None);
        assert_eq!(remote.head(), Some(result.commit_sha));
        assert_eq!(result.deleted, 1);

        let committed = Metadata::from_json(&remote.file(".vault/sync-metadata.json").unwrap()).unwrap();
        assert_eq!(committed.last_sync, 100);
        assert_eq!(
            committed.get(&path("b.md")).unwrap().sha.as_deref(),
            Some(git_blob_sha(b"beta").as_str())
        );
        assert_eq!(committed.get(&manifest).unwrap().sha, None);
    }

    #[tokio::test]
    async fn test_blob_failure_abandons_whole_commit() {
        let remote = MemoryRemote::with_files([("a.md", "alpha")]);
        let head = remote.head();
        remote.fail_next(RemoteOp::CreateBlob, 10);

        let retry = RetryExecutor::new(
            crate::retry::RetryConfig::new(2).with_initial_delay(std::time::Duration::from_millis(1)),
        );
        let assembler = CommitAssembler::new(&remote, &retry, 4);
        let tree = remote.get_tree("main").await.unwrap();
        let pending = PendingCommit {
            uploads: vec![
                (path("img.png"), vec![137, 80, 78, 71, 0, 1]),
                (path("b.md"), b"beta".to_vec()),
            ],
            deletions: Vec::new(),
        };

        let result = assembler
            .commit(pending, Metadata::new(), &path(".vault/sync-metadata.json"), &tree.sha, "Sync", 1)
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(remote.calls(RemoteOp::CreateBlob), 3);
        assert_eq!(remote.calls(RemoteOp::CreateTree), 0);
        assert_eq!(remote.head(), head);
        assert_eq!(remote.file("b.md"), None);
    }

    #[tokio::test]
    async fn test_failed_commit_publishes_nothing() {
        let remote = MemoryRemote::with_files([("a.md", "alpha")]);
        let head = remote.head();
        remote.fail_next(RemoteOp::CreateCommit, 1);

        let retry = RetryExecutor::default();
        let assembler = CommitAssembler::new(&remote, &retry, 4);
        let tree = remote.get_tree("main").await.unwrap();
        let pending = PendingCommit {
            uploads: vec![(path("b.md"), b"beta".to_vec())],
            deletions: Vec::new(),
        };

        let result = assembler
            .commit(pending, Metadata::new(), &path(".vault/sync-metadata.json"), &tree.sha, "Sync", 1)
            .await;
        assert!(result.is_err());
        // Commit creation is not retried.
        assert_eq!(remote.calls(RemoteOp::CreateCommit), 1);
        assert_eq!(remote.head(), head);
    }
}
