//! Host file-system boundary for the synced vault.
//!
//! Implementations:
//! - `LocalFs` - the vault directory on disk, via tokio::fs
//! - `MemoryFs` - in-memory tree for tests
//!
//! All paths are vault-relative [`RepoPath`]s; the vault root is
//! [`RepoPath::root`].

use async_trait::async_trait;

use gitvault_common::{RepoPath, Result};

/// Direct children of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Files directly inside the folder.
    pub files: Vec<RepoPath>,
    /// Sub-folders directly inside the folder.
    pub folders: Vec<RepoPath>,
}

/// Local file-system capability consumed by the sync engine.
#[async_trait]
pub trait VaultFs: Send + Sync {
    /// List the direct children of a folder.
    ///
    /// # Errors
    /// - Folder not found
    async fn list(&self, path: &RepoPath) -> Result<Listing>;

    /// Read a file's raw bytes.
    async fn read(&self, path: &RepoPath) -> Result<Vec<u8>>;

    /// Write a file, creating parent folders as needed.
    async fn write(&self, path: &RepoPath, content: &[u8]) -> Result<()>;

    /// Check if a file or folder exists.
    async fn exists(&self, path: &RepoPath) -> Result<bool>;

    /// Create a folder and its parents.
    async fn mkdir(&self, path: &RepoPath) -> Result<()>;

    /// Remove a file.
    ///
    /// # Errors
    /// - File not found
    async fn remove(&self, path: &RepoPath) -> Result<()>;
}

/// Recursively collect every file under `root`, skipping folders for which
/// `skip_folder` returns true.
pub async fn list_files_recursive<F, P>(
    fs: &F,
    root: &RepoPath,
    skip_folder: P,
) -> Result<Vec<RepoPath>>
where
    F: VaultFs + ?Sized,
    P: Fn(&RepoPath) -> bool,
{
    let mut files = Vec::new();
    let mut pending = vec![root.clone()];

    while let Some(folder) = pending.pop() {
        let listing = fs.list(&folder).await?;
        files.extend(listing.files);
        pending.extend(listing.folders.into_iter().filter(|f| !skip_folder(f)));
    }

    files.sort();
    Ok(files)
}
