//! In-memory vault for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::RwLock;

use crate::fs::{Listing, VaultFs};
use gitvault_common::{Error, RepoPath, Result};

#[derive(Default)]
struct Tree {
    files: BTreeMap<RepoPath, Vec<u8>>,
    folders: BTreeSet<RepoPath>,
    failing: HashSet<RepoPath>,
}

impl Tree {
    fn add_parents(&mut self, path: &RepoPath) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if p.is_root() {
                break;
            }
            parent = p.parent();
            self.folders.insert(p);
        }
    }
}

/// In-memory vault.
///
/// Useful for testing. Folders are implied by the files inside them and
/// kept after those files are removed, like on a real disk.
#[derive(Default)]
pub struct MemoryFs {
    tree: RwLock<Tree>,
}

impl MemoryFs {
    /// Create a new empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vault pre-populated with `files`.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<Vec<u8>>,
    {
        let vault = Self::new();
        {
            let mut tree = vault.tree.write().unwrap();
            for (path, content) in files {
                let path = RepoPath::parse(path.as_ref()).expect("valid test path");
                tree.add_parents(&path);
                tree.files.insert(path, content.into());
            }
        }
        vault
    }

    /// Make every read and write of `path` fail with an I/O error.
    pub fn fail_io_for(&self, path: &str) {
        let path = RepoPath::parse(path).expect("valid test path");
        self.tree.write().unwrap().failing.insert(path);
    }

    /// Synchronous read for assertions.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let path = RepoPath::parse(path).ok()?;
        self.tree.read().unwrap().files.get(&path).cloned()
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.tree
            .read()
            .unwrap()
            .files
            .keys()
            .map(|p| p.to_string())
            .collect()
    }

    fn check_failing(tree: &Tree, path: &RepoPath) -> Result<()> {
        if tree.failing.contains(path) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("simulated failure for {}", path),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VaultFs for MemoryFs {
    async fn list(&self, path: &RepoPath) -> Result<Listing> {
        let tree = self.tree.read().unwrap();

        if !path.is_root() && !tree.folders.contains(path) {
            return Err(Error::NotFound(format!("Folder not found: {}", path)));
        }

        let is_child = |p: &RepoPath| p.parent().as_ref() == Some(path);
        Ok(Listing {
            files: tree.files.keys().filter(|p| is_child(p)).cloned().collect(),
            folders: tree.folders.iter().filter(|p| is_child(p)).cloned().collect(),
        })
    }

    async fn read(&self, path: &RepoPath) -> Result<Vec<u8>> {
        let tree = self.tree.read().unwrap();
        Self::check_failing(&tree, path)?;
        tree.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn write(&self, path: &RepoPath, content: &[u8]) -> Result<()> {
        let mut tree = self.tree.write().unwrap();
        Self::check_failing(&tree, path)?;
        tree.add_parents(path);
        tree.files.insert(path.clone(), content.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &RepoPath) -> Result<bool> {
        let tree = self.tree.read().unwrap();
        Ok(path.is_root() || tree.files.contains_key(path) || tree.folders.contains(path))
    }

    async fn mkdir(&self, path: &RepoPath) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let mut tree = self.tree.write().unwrap();
        tree.add_parents(path);
        tree.folders.insert(path.clone());
        Ok(())
    }

    async fn remove(&self, path: &RepoPath) -> Result<()> {
        let mut tree = self.tree.write().unwrap();
        Self::check_failing(&tree, path)?;
        tree.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::list_files_recursive;

    #[tokio::test]
    async fn test_write_read_remove() {
        let vault = MemoryFs::new();
        let path = RepoPath::parse("dir/test.md").unwrap();

        vault.write(&path, b"hello").await.unwrap();
        assert_eq!(vault.read(&path).await.unwrap(), b"hello");
        assert!(vault.exists(&RepoPath::parse("dir").unwrap()).await.unwrap());

        vault.remove(&path).await.unwrap();
        assert!(!vault.exists(&path).await.unwrap());
        assert!(matches!(vault.read(&path).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let vault = MemoryFs::with_files([
            ("a.md", "a"),
            ("x/y/z.md", "z"),
            (".vault/app.json", "{}"),
        ]);

        let all = list_files_recursive(&vault, &RepoPath::root(), |_| false)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let listing = vault.list(&RepoPath::parse("x").unwrap()).await.unwrap();
        assert!(listing.files.is_empty());
        assert_eq!(listing.folders, vec![RepoPath::parse("x/y").unwrap()]);
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let vault = MemoryFs::with_files([("locked.md", "x")]);
        vault.fail_io_for("locked.md");

        let path = RepoPath::parse("locked.md").unwrap();
        assert!(matches!(vault.read(&path).await, Err(Error::Io(_))));
    }
}
