//! Per-file sync metadata and the manifest document.
//!
//! The manifest is stored as JSON inside the synced tree, so its shape is
//! shared with every other device syncing the same repository:
//!
//! ```json
//! {
//!   "lastSync": 1700000000000,
//!   "files": {
//!     "notes/a.md": {
//!       "path": "notes/a.md", "sha": "…", "dirty": false,
//!       "justDownloaded": false, "lastModified": 1700000000000
//!     }
//!   }
//! }
//! ```
//!
//! Tombstoned entries additionally carry `"deleted": true` and `"deletedAt"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gitvault_common::{RepoPath, Result};

/// Whether a tracked file still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Active,
    /// Removed locally at `at` (epoch ms). Entries are never dropped.
    Deleted { at: i64 },
}

/// Sync state of one tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFileMetadata", into = "RawFileMetadata")]
pub struct FileMetadata {
    pub path: RepoPath,
    /// Last known remote blob id; `None` until first pushed.
    pub sha: Option<String>,
    /// Local change pending upload.
    pub dirty: bool,
    /// The engine wrote this file; the next local event for it is ours.
    pub just_downloaded: bool,
    /// Local edit time (epoch ms).
    pub last_modified: i64,
    pub state: FileState,
}

impl FileMetadata {
    /// Entry for a file that appeared locally.
    pub fn new_local(path: RepoPath, last_modified: i64) -> Self {
        Self {
            path,
            sha: None,
            dirty: true,
            just_downloaded: false,
            last_modified,
            state: FileState::Active,
        }
    }

    /// Entry for a file the engine just wrote from the remote.
    pub fn new_downloaded(path: RepoPath, sha: String, last_modified: i64) -> Self {
        Self {
            path,
            sha: Some(sha),
            dirty: false,
            just_downloaded: true,
            last_modified,
            state: FileState::Active,
        }
    }

    /// Check if this entry is a tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, FileState::Deleted { .. })
    }

    /// Deletion time, if tombstoned.
    pub fn deleted_at(&self) -> Option<i64> {
        match self.state {
            FileState::Deleted { at } => Some(at),
            FileState::Active => None,
        }
    }

    /// Record a local edit. Resurrects a tombstone.
    pub fn mark_modified(&mut self, now: i64) {
        self.dirty = true;
        self.last_modified = now;
        self.state = FileState::Active;
    }

    /// Tombstone the entry.
    pub fn mark_deleted(&mut self, now: i64) {
        self.state = FileState::Deleted { at: now };
    }

    /// Record that `sha` is now on the remote.
    pub fn mark_synced(&mut self, sha: String) {
        self.sha = Some(sha);
        self.dirty = false;
    }
}

/// Wire shape of [`FileMetadata`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileMetadata {
    path: RepoPath,
    sha: Option<String>,
    #[serde(default)]
    dirty: bool,
    #[serde(default)]
    just_downloaded: bool,
    #[serde(default)]
    last_modified: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<i64>,
}

impl From<RawFileMetadata> for FileMetadata {
    fn from(raw: RawFileMetadata) -> Self {
        // A tombstone written without a time sorts as deleted at its last edit.
        let state = if raw.deleted {
            FileState::Deleted {
                at: raw.deleted_at.unwrap_or(raw.last_modified),
            }
        } else {
            FileState::Active
        };

        Self {
            path: raw.path,
            sha: raw.sha,
            dirty: raw.dirty,
            just_downloaded: raw.just_downloaded,
            last_modified: raw.last_modified,
            state,
        }
    }
}

impl From<FileMetadata> for RawFileMetadata {
    fn from(meta: FileMetadata) -> Self {
        Self {
            deleted: meta.is_deleted(),
            deleted_at: meta.deleted_at(),
            path: meta.path,
            sha: meta.sha,
            dirty: meta.dirty,
            just_downloaded: meta.just_downloaded,
            last_modified: meta.last_modified,
        }
    }
}

/// The manifest: every tracked path plus the last successful sync time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Epoch ms of the last successful commit; 0 if never synced.
    #[serde(default)]
    pub last_sync: i64,
    #[serde(default)]
    pub files: BTreeMap<RepoPath, FileMetadata>,
}

impl Metadata {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest. Empty input is an empty manifest.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Get a file entry.
    pub fn get(&self, path: &RepoPath) -> Option<&FileMetadata> {
        self.files.get(path)
    }

    /// Get a mutable file entry.
    pub fn get_mut(&mut self, path: &RepoPath) -> Option<&mut FileMetadata> {
        self.files.get_mut(path)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, meta: FileMetadata) {
        self.files.insert(meta.path.clone(), meta);
    }

    /// Make sure the manifest tracks itself, with no recorded sha.
    pub fn ensure_manifest_entry(&mut self, manifest: &RepoPath, now: i64) {
        let entry = self
            .files
            .entry(manifest.clone())
            .or_insert_with(|| FileMetadata::new_local(manifest.clone(), now));
        entry.sha = None;
        entry.state = FileState::Active;
    }

    /// Tracked paths that are not tombstoned.
    pub fn active_paths(&self) -> impl Iterator<Item = &RepoPath> {
        self.files
            .values()
            .filter(|m| !m.is_deleted())
            .map(|m| &m.path)
    }

    /// Entries with local changes pending upload.
    pub fn dirty(&self) -> impl Iterator<Item = &FileMetadata> {
        self.files.values().filter(|m| m.dirty && !m.is_deleted())
    }

    /// Tombstoned entries.
    pub fn deleted(&self) -> impl Iterator<Item = &FileMetadata> {
        self.files.values().filter(|m| m.is_deleted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    #[test]
    fn test_json_shape() {
        let mut metadata = Metadata::new();
        metadata.last_sync = 42;
        metadata.insert(FileMetadata::new_downloaded(path("a.md"), "abc".into(), 10));
        let mut gone = FileMetadata::new_local(path("b.md"), 5);
        gone.mark_deleted(20);
        metadata.insert(gone);

        let value: serde_json::Value = serde_json::from_str(&metadata.to_json().unwrap()).unwrap();
        assert_eq!(value["lastSync"], 42);
        assert_eq!(value["files"]["a.md"]["sha"], "abc");
        assert_eq!(value["files"]["a.md"]["justDownloaded"], true);
        assert!(value["files"]["a.md"].get("deleted").is_none());
        assert_eq!(value["files"]["b.md"]["sha"], serde_json::Value::Null);
        assert_eq!(value["files"]["b.md"]["deleted"], true);
        assert_eq!(value["files"]["b.md"]["deletedAt"], 20);
    }

    #[test]
    fn test_parse_foreign_manifest() {
        let json = r#"{
            "lastSync": 7,
            "files": {
                "x.md": {"path": "x.md", "sha": null, "dirty": true,
                         "justDownloaded": false, "lastModified": 3,
                         "deleted": true, "deletedAt": 9}
            }
        }"#;
        let metadata = Metadata::from_json(json.as_bytes()).unwrap();
        let entry = metadata.get(&path("x.md")).unwrap();
        assert_eq!(entry.state, FileState::Deleted { at: 9 });
        assert_eq!(metadata.last_sync, 7);
    }

    #[test]
    fn test_empty_document_is_empty_manifest() {
        assert_eq!(Metadata::from_json(b"").unwrap(), Metadata::new());
        assert_eq!(Metadata::from_json(b"  \n").unwrap(), Metadata::new());
        assert!(Metadata::from_json(b"{not json").is_err());
    }

    #[test]
    fn test_modify_resurrects_tombstone() {
        let mut entry = FileMetadata::new_downloaded(path("a.md"), "s".into(), 1);
        entry.mark_deleted(5);
        assert!(entry.is_deleted());

        entry.mark_modified(8);
        assert_eq!(entry.state, FileState::Active);
        assert!(entry.dirty);
        assert_eq!(entry.last_modified, 8);
    }

    #[test]
    fn test_manifest_entry_has_no_sha() {
        let manifest = path(".vault/sync-metadata.json");
        let mut metadata = Metadata::new();
        metadata.insert(FileMetadata::new_downloaded(manifest.clone(), "old".into(), 1));

        metadata.ensure_manifest_entry(&manifest, 2);
        assert_eq!(metadata.get(&manifest).unwrap().sha, None);
    }
}
