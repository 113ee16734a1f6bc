//! In-memory Git remote for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use crate::remote::{
    decode_base64, Blob, EntrySource, GitRemote, ObjectKind, RemoteTree, TreeEntry, TreeItem,
    FILE_MODE,
};
use gitvault_common::{git_blob_sha, Error, RepoPath, Result};

/// Remote operations, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    GetTree,
    GetBlob,
    CreateBlob,
    CreateFile,
    CreateTree,
    GetBranchHead,
    CreateCommit,
    UpdateBranchHead,
}

#[derive(Debug, Clone)]
struct Commit {
    tree: String,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    /// Flattened trees: path -> blob id.
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, Commit>,
    head: Option<String>,
    calls: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, u32>,
    tree_requests: Vec<Vec<TreeEntry>>,
    sequence: u64,
}

impl State {
    fn enter(&mut self, op: RemoteOp) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network(format!("simulated {:?} failure", op)));
            }
        }
        Ok(())
    }

    fn store_blob(&mut self, data: Vec<u8>) -> String {
        let sha = git_blob_sha(&data);
        self.blobs.insert(sha.clone(), data);
        sha
    }

    fn store_tree(&mut self, files: BTreeMap<String, String>) -> String {
        let listing: String = files
            .iter()
            .map(|(path, sha)| format!("{} {}\n", sha, path))
            .collect();
        let sha = git_blob_sha(format!("tree\n{}", listing).as_bytes());
        self.trees.insert(sha.clone(), files);
        sha
    }

    fn store_commit(&mut self, tree: &str, parent: Option<&str>, message: &str) -> String {
        self.sequence += 1;
        let sha = git_blob_sha(
            format!("commit {} {:?} {} {}", tree, parent, message, self.sequence).as_bytes(),
        );
        self.commits.insert(
            sha.clone(),
            Commit {
                tree: tree.to_string(),
            },
        );
        sha
    }

    fn head_files(&self) -> BTreeMap<String, String> {
        self.head
            .as_ref()
            .and_then(|head| self.commits.get(head))
            .and_then(|commit| self.trees.get(&commit.tree))
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory Git remote.
///
/// Mirrors the behaviour the engine relies on: real Git blob ids, an empty
/// repository that rejects tree reads until the first commit, base-tree
/// merging, and a branch head that only moves on `update_branch_head`.
pub struct MemoryRemote {
    branch: String,
    state: Mutex<State>,
}

impl MemoryRemote {
    /// Create a remote with no commits.
    pub fn new() -> Self {
        Self {
            branch: "main".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Create a remote whose branch has one commit holding `files`.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let remote = Self::new();
        remote.push_files(
            files
                .into_iter()
                .map(|(p, c)| (p.into(), Some(c.into())))
                .collect(),
            "Initial commit",
        );
        remote
    }

    /// Commit changes as another device would. `None` removes the path.
    pub fn push_files(&self, changes: Vec<(String, Option<Vec<u8>>)>, message: &str) {
        let mut state = self.state.lock().unwrap();
        let mut files = state.head_files();
        for (path, content) in changes {
            match content {
                Some(data) => {
                    let sha = state.store_blob(data);
                    files.insert(path, sha);
                }
                None => {
                    files.remove(&path);
                }
            }
        }
        let tree = state.store_tree(files);
        let parent = state.head.clone();
        let commit = state.store_commit(&tree, parent.as_deref(), message);
        state.head = Some(commit);
    }

    /// Content of `path` at the branch head.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let files = state.head_files();
        files.get(path).and_then(|sha| state.blobs.get(sha)).cloned()
    }

    /// All file paths at the branch head.
    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().head_files().into_keys().collect()
    }

    /// Branch head commit id, if any.
    pub fn head(&self) -> Option<String> {
        self.state.lock().unwrap().head.clone()
    }

    /// How many times `op` was invoked.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Entries of every `create_tree` request, in order.
    pub fn tree_requests(&self) -> Vec<Vec<TreeEntry>> {
        self.state.lock().unwrap().tree_requests.clone()
    }

    /// Make the next `times` invocations of `op` fail with a network error.
    pub fn fail_next(&self, op: RemoteOp, times: u32) {
        self.state.lock().unwrap().failures.insert(op, times);
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitRemote for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn get_tree(&self, branch: &str) -> Result<RemoteTree> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::GetTree)?;

        if branch != self.branch {
            return Err(Error::NotFound(format!("Branch not found: {}", branch)));
        }
        let head = state.head.clone().ok_or(Error::EmptyRepository)?;
        let tree_sha = state
            .commits
            .get(&head)
            .map(|c| c.tree.clone())
            .ok_or_else(|| Error::NotFound(format!("Commit not found: {}", head)))?;
        let files = state.trees.get(&tree_sha).cloned().unwrap_or_default();

        let mut folders = BTreeSet::new();
        for path in files.keys() {
            let mut parent = RepoPath::parse(path)?.parent();
            while let Some(p) = parent {
                if p.is_root() {
                    break;
                }
                parent = p.parent();
                folders.insert(p.to_string());
            }
        }

        let mut items: Vec<TreeItem> = folders
            .into_iter()
            .map(|path| TreeItem {
                path,
                mode: "040000".to_string(),
                kind: ObjectKind::Tree,
                sha: String::new(),
                url: None,
            })
            .collect();
        items.extend(files.into_iter().map(|(path, sha)| TreeItem {
            url: Some(format!("memory://blobs/{}", sha)),
            path,
            mode: FILE_MODE.to_string(),
            kind: ObjectKind::Blob,
            sha,
        }));

        Ok(RemoteTree {
            sha: tree_sha,
            items,
        })
    }

    async fn get_blob(&self, sha: &str) -> Result<Blob> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::GetBlob)?;
        state
            .blobs
            .get(sha)
            .map(|data| Blob::from_bytes(sha, data))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", sha)))
    }

    async fn create_blob(&self, content_base64: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::CreateBlob)?;
        let data = decode_base64(content_base64)?;
        Ok(state.store_blob(data))
    }

    async fn create_file(&self, path: &RepoPath, content: &[u8], message: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.enter(RemoteOp::CreateFile)?;
            if state.head_files().contains_key(&path.to_string()) {
                return Err(Error::Storage(format!("File already exists: {}", path)));
            }
        }
        self.push_files(vec![(path.to_string(), Some(content.to_vec()))], message);
        Ok(())
    }

    async fn create_tree(&self, entries: &[TreeEntry], base_tree: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::CreateTree)?;

        let mut files = state
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Base tree not found: {}", base_tree)))?;

        for entry in entries {
            match &entry.source {
                EntrySource::Sha(sha) => {
                    if !state.blobs.contains_key(sha) {
                        return Err(Error::Storage(format!(
                            "Tree entry {} references unknown blob {}",
                            entry.path, sha
                        )));
                    }
                    files.insert(entry.path.clone(), sha.clone());
                }
                EntrySource::Content(content) => {
                    let sha = state.store_blob(content.as_bytes().to_vec());
                    files.insert(entry.path.clone(), sha);
                }
                EntrySource::Delete => {
                    files.remove(&entry.path);
                }
            }
        }

        state.tree_requests.push(entries.to_vec());
        Ok(state.store_tree(files))
    }

    async fn get_branch_head_sha(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::GetBranchHead)?;
        state.head.clone().ok_or(Error::EmptyRepository)
    }

    async fn create_commit(&self, message: &str, tree_sha: &str, parent_sha: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::CreateCommit)?;

        if !state.trees.contains_key(tree_sha) {
            return Err(Error::NotFound(format!("Tree not found: {}", tree_sha)));
        }
        if !state.commits.contains_key(parent_sha) {
            return Err(Error::NotFound(format!("Parent commit not found: {}", parent_sha)));
        }
        Ok(state.store_commit(tree_sha, Some(parent_sha), message))
    }

    async fn update_branch_head(&self, sha: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter(RemoteOp::UpdateBranchHead)?;

        if !state.commits.contains_key(sha) {
            return Err(Error::NotFound(format!("Commit not found: {}", sha)));
        }
        state.head = Some(sha.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::encode_base64;

    #[tokio::test]
    async fn test_empty_repository_rejects_tree_reads() {
        let remote = MemoryRemote::new();
        assert!(matches!(remote.get_tree("main").await, Err(Error::EmptyRepository)));

        let path = RepoPath::parse(".vault/sync-metadata.json").unwrap();
        remote.create_file(&path, b"", "First sync").await.unwrap();

        let tree = remote.get_tree("main").await.unwrap();
        assert!(tree.get(".vault/sync-metadata.json").is_some());
        assert!(tree.get(".vault").map(|i| i.kind) == Some(ObjectKind::Tree));
    }

    #[tokio::test]
    async fn test_tree_commit_and_branch_update() {
        let remote = MemoryRemote::with_files([("a.md", "alpha"), ("b.md", "beta")]);
        let tree = remote.get_tree("main").await.unwrap();
        assert_eq!(tree.get("a.md").unwrap().sha, git_blob_sha(b"alpha"));

        let image_sha = remote.create_blob(&encode_base64(&[0, 1, 2])).await.unwrap();
        let entries = vec![
            TreeEntry::text("c.md", "gamma"),
            TreeEntry::blob("img.png", image_sha),
            TreeEntry::delete("b.md"),
        ];
        let new_tree = remote.create_tree(&entries, &tree.sha).await.unwrap();
        let parent = remote.get_branch_head_sha().await.unwrap();
        let commit = remote.create_commit("Sync", &new_tree, &parent).await.unwrap();

        // Nothing visible until the branch moves.
        assert_eq!(remote.paths(), vec!["a.md", "b.md"]);

        remote.update_branch_head(&commit).await.unwrap();
        assert_eq!(remote.paths(), vec!["a.md", "c.md", "img.png"]);
        assert_eq!(remote.file("img.png").unwrap(), vec![0, 1, 2]);
        assert_eq!(remote.calls(RemoteOp::CreateCommit), 1);
    }

    #[tokio::test]
    async fn test_unknown_blob_reference_is_rejected() {
        let remote = MemoryRemote::with_files([("a.md", "alpha")]);
        let tree = remote.get_tree("main").await.unwrap();
        let result = remote
            .create_tree(&[TreeEntry::blob("x.bin", "0000")], &tree.sha)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = MemoryRemote::with_files([("a.md", "alpha")]);
        remote.fail_next(RemoteOp::GetTree, 1);

        assert!(matches!(remote.get_tree("main").await, Err(Error::Network(_))));
        assert!(remote.get_tree("main").await.is_ok());
        assert_eq!(remote.calls(RemoteOp::GetTree), 2);
    }
}
