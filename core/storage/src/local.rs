//! Local filesystem vault.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::fs::{Listing, VaultFs};
use gitvault_common::{Error, RepoPath, Result};

/// Local filesystem vault rooted at a directory.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Create a vault view over `root`.
    ///
    /// # Errors
    /// - Root does not exist or is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "Vault directory not found: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a RepoPath to a filesystem path.
    fn to_fs_path(&self, path: &RepoPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }
}

fn not_found(err: std::io::Error, path: &RepoPath) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("File not found: {}", path))
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl VaultFs for LocalFs {
    async fn list(&self, path: &RepoPath) -> Result<Listing> {
        let fs_path = self.to_fs_path(path);

        let mut listing = Listing::default();
        let mut entries = fs::read_dir(&fs_path)
            .await
            .map_err(|e| not_found(e, path))?;

        while let Some(entry) = entries.next_entry().await? {
            // Names that are not valid UTF-8 cannot be represented remotely.
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let child = path.join(&name)?;
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                listing.folders.push(child);
            } else if file_type.is_file() {
                listing.files.push(child);
            }
        }

        listing.files.sort();
        listing.folders.sort();
        Ok(listing)
    }

    async fn read(&self, path: &RepoPath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);
        fs::read(&fs_path).await.map_err(|e| not_found(e, path))
    }

    async fn write(&self, path: &RepoPath, content: &[u8]) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&fs_path, content).await?;
        Ok(())
    }

    async fn exists(&self, path: &RepoPath) -> Result<bool> {
        Ok(fs::try_exists(self.to_fs_path(path)).await?)
    }

    async fn mkdir(&self, path: &RepoPath) -> Result<()> {
        fs::create_dir_all(self.to_fs_path(path)).await?;
        Ok(())
    }

    async fn remove(&self, path: &RepoPath) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Cannot remove directory: {}",
                path
            )));
        }

        fs::remove_file(&fs_path).await.map_err(|e| not_found(e, path))
    }
}
