//! Remote Git hosting boundary.
//!
//! The sync engine only speaks to the remote through [`GitRemote`]: a tree
//! listing, blob fetch/create, tree and commit creation, and branch head
//! updates. Everything is keyed by Git object ids (hex SHA-1).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use gitvault_common::{Error, RepoPath, Result};

/// File mode used for every regular file the engine writes.
pub const FILE_MODE: &str = "100644";

/// Git object type of a tree item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    /// Submodule reference.
    Commit,
}

/// One entry of a recursive remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    /// Repository-relative path.
    pub path: String,
    /// Git file mode (e.g. `100644`).
    pub mode: String,
    /// Object type.
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// Object id.
    pub sha: String,
    /// API URL of the object, when the remote provides one.
    #[serde(default)]
    pub url: Option<String>,
}

impl TreeItem {
    /// Check if this item is a file blob.
    pub fn is_blob(&self) -> bool {
        self.kind == ObjectKind::Blob
    }
}

/// The remote's view of the branch at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RemoteTree {
    /// Id of the root tree object the items were listed from.
    pub sha: String,
    /// All items, recursively.
    pub items: Vec<TreeItem>,
}

impl RemoteTree {
    /// Find the item at `path`.
    pub fn get(&self, path: &str) -> Option<&TreeItem> {
        self.items.iter().find(|item| item.path == path)
    }

    /// Iterate over file blobs only.
    pub fn blobs(&self) -> impl Iterator<Item = &TreeItem> {
        self.items.iter().filter(|item| item.is_blob())
    }
}

/// Blob content as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Object id.
    pub sha: String,
    /// Base64 content; may contain line breaks.
    pub content: String,
}

impl Blob {
    /// Build a blob from raw bytes.
    pub fn from_bytes(sha: impl Into<String>, data: &[u8]) -> Self {
        Self {
            sha: sha.into(),
            content: STANDARD.encode(data),
        }
    }

    /// Decode the base64 content into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_base64(&self.content)
    }
}

/// Encode raw bytes as standard base64.
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64, tolerating the line breaks the remote inserts.
pub fn decode_base64(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::Serialization(format!("Invalid base64 content: {}", e)))
}

/// What a tree entry points at.
///
/// An entry carries exactly one of these, so inline content and a blob
/// reference can never be sent together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// Reference an existing blob.
    Sha(String),
    /// Inline UTF-8 content; the remote creates the blob.
    Content(String),
    /// Remove the path from the base tree.
    Delete,
}

/// An entry submitted to [`GitRemote::create_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    pub kind: ObjectKind,
    pub source: EntrySource,
}

impl TreeEntry {
    /// Regular file pointing at an existing blob.
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: ObjectKind::Blob,
            source: EntrySource::Sha(sha.into()),
        }
    }

    /// Regular file with inline text content.
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: ObjectKind::Blob,
            source: EntrySource::Content(content.into()),
        }
    }

    /// Deletion of `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE.to_string(),
            kind: ObjectKind::Blob,
            source: EntrySource::Delete,
        }
    }
}

impl Serialize for TreeEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("mode", &self.mode)?;
        map.serialize_entry("type", &self.kind)?;
        match &self.source {
            EntrySource::Sha(sha) => map.serialize_entry("sha", sha)?,
            EntrySource::Content(content) => map.serialize_entry("content", content)?,
            EntrySource::Delete => map.serialize_entry("sha", &Option::<String>::None)?,
        }
        map.end()
    }
}

/// Remote Git hosting API consumed by the sync engine.
///
/// Implementations handle authentication themselves. Only `create_commit`,
/// `update_branch_head` and `create_file` mutate branch history; callers must
/// not retry them blindly.
#[async_trait]
pub trait GitRemote: Send + Sync {
    /// Short name of the remote (e.g. "github", "memory").
    fn name(&self) -> &str;

    /// Branch all branch-level calls operate on.
    fn branch(&self) -> &str;

    /// List the full tree of `branch` recursively.
    ///
    /// # Errors
    /// - [`Error::EmptyRepository`] if the repository has no commits
    async fn get_tree(&self, branch: &str) -> Result<RemoteTree>;

    /// Fetch a blob by object id.
    async fn get_blob(&self, sha: &str) -> Result<Blob>;

    /// Create a blob from base64 content and return its id.
    async fn create_blob(&self, content_base64: &str) -> Result<String>;

    /// Create a single file with its own commit on the branch.
    ///
    /// Works against a repository without history, unlike tree creation.
    async fn create_file(&self, path: &RepoPath, content: &[u8], message: &str) -> Result<()>;

    /// Create a tree from `base_tree` plus `entries` and return its id.
    async fn create_tree(&self, entries: &[TreeEntry], base_tree: &str) -> Result<String>;

    /// Id of the commit the branch currently points at.
    async fn get_branch_head_sha(&self) -> Result<String>;

    /// Create a commit and return its id.
    async fn create_commit(&self, message: &str, tree_sha: &str, parent_sha: &str)
        -> Result<String>;

    /// Move the branch to `sha`.
    async fn update_branch_head(&self, sha: &str) -> Result<()>;
}
