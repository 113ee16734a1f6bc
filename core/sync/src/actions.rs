//! Action determination for steady-state passes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use gitvault_common::RepoPath;

use crate::config::SyncPolicy;
use crate::metadata::FileMetadata;

/// What a pass does for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Upload => "upload",
            ActionKind::Download => "download",
            ActionKind::DeleteLocal => "delete_local",
            ActionKind::DeleteRemote => "delete_remote",
        };
        f.write_str(name)
    }
}

/// An action on a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncAction {
    pub path: RepoPath,
    pub kind: ActionKind,
}

impl SyncAction {
    pub fn new(kind: ActionKind, path: RepoPath) -> Self {
        Self { path, kind }
    }

    pub fn upload(path: RepoPath) -> Self {
        Self::new(ActionKind::Upload, path)
    }

    pub fn download(path: RepoPath) -> Self {
        Self::new(ActionKind::Download, path)
    }

    pub fn delete_local(path: RepoPath) -> Self {
        Self::new(ActionKind::DeleteLocal, path)
    }

    pub fn delete_remote(path: RepoPath) -> Self {
        Self::new(ActionKind::DeleteRemote, path)
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.path)
    }
}

/// Decide what to do for every path outside `skip`.
///
/// `remote_files` is the remote manifest, `local_files` the local store and
/// `local_hashes` the freshly computed blob ids of files present on disk.
/// Tracked local files without a fresh hash are left alone. The manifest
/// itself never gets an action. Result is sorted by path.
pub fn determine_sync_actions(
    remote_files: &BTreeMap<RepoPath, FileMetadata>,
    local_files: &BTreeMap<RepoPath, FileMetadata>,
    local_hashes: &HashMap<RepoPath, String>,
    skip: &HashSet<RepoPath>,
    policy: &SyncPolicy,
) -> Vec<SyncAction> {
    let paths: BTreeSet<&RepoPath> = remote_files.keys().chain(local_files.keys()).collect();

    let mut actions = Vec::new();
    for path in paths {
        if policy.is_manifest(path) || skip.contains(path) {
            continue;
        }
        if !policy.is_syncable(path) || !policy.allows_remote(path) {
            continue;
        }

        let remote = remote_files.get(path);
        let local = local_files.get(path);
        let local_hash = local_hashes.get(path).map(String::as_str);

        let action = match (remote, local) {
            (Some(remote), Some(local)) => decide_both(remote, local, local_hash),
            (Some(remote), None) => (!remote.is_deleted()).then_some(ActionKind::Download),
            (None, Some(local)) => {
                (!local.is_deleted() && local_hash.is_some()).then_some(ActionKind::Upload)
            }
            (None, None) => None,
        };

        if let Some(kind) = action {
            actions.push(SyncAction::new(kind, path.clone()));
        }
    }
    actions
}

fn decide_both(
    remote: &FileMetadata,
    local: &FileMetadata,
    local_hash: Option<&str>,
) -> Option<ActionKind> {
    match (remote.deleted_at(), local.deleted_at()) {
        (Some(_), Some(_)) => None,
        (Some(remote_deleted_at), None) => {
            local_hash?;
            if remote_deleted_at > local.last_modified {
                Some(ActionKind::DeleteLocal)
            } else if local.last_modified > remote_deleted_at {
                Some(ActionKind::Upload)
            } else {
                None
            }
        }
        (None, Some(local_deleted_at)) => {
            if local_deleted_at > remote.last_modified {
                Some(ActionKind::DeleteRemote)
            } else if remote.last_modified > local_deleted_at {
                Some(ActionKind::Download)
            } else {
                None
            }
        }
        (None, None) => {
            let local_hash = local_hash?;
            if remote.sha.as_deref() == Some(local_hash) {
                None
            } else if local.sha.as_deref() != Some(local_hash) {
                Some(ActionKind::Upload)
            } else {
                Some(ActionKind::Download)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::metadata::FileState;

    fn path(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    fn entry(p: &str, sha: Option<&str>, last_modified: i64) -> FileMetadata {
        FileMetadata {
            path: path(p),
            sha: sha.map(str::to_string),
            dirty: false,
            just_downloaded: false,
            last_modified,
            state: FileState::Active,
        }
    }

    fn deleted(p: &str, sha: Option<&str>, last_modified: i64, at: i64) -> FileMetadata {
        FileMetadata {
            state: FileState::Deleted { at },
            ..entry(p, sha, last_modified)
        }
    }

    fn files(entries: Vec<FileMetadata>) -> BTreeMap<RepoPath, FileMetadata> {
        entries.into_iter().map(|e| (e.path.clone(), e)).collect()
    }

    fn hashes(pairs: &[(&str, &str)]) -> HashMap<RepoPath, String> {
        pairs.iter().map(|(p, h)| (path(p), h.to_string())).collect()
    }

    fn run(
        remote: Vec<FileMetadata>,
        local: Vec<FileMetadata>,
        local_hashes: &[(&str, &str)],
    ) -> Vec<SyncAction> {
        let policy = SyncConfig::default().policy().unwrap();
        determine_sync_actions(
            &files(remote),
            &files(local),
            &hashes(local_hashes),
            &HashSet::new(),
            &policy,
        )
    }

    #[test]
    fn test_identical_hash_means_no_action() {
        let actions = run(
            vec![entry("note.md", Some("h1"), 5)],
            vec![entry("note.md", Some("h0"), 9)],
            &[("note.md", "h1")],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_remote_deletion_precedence() {
        // Local edit is newer than the remote deletion.
        let actions = run(
            vec![deleted("note.md", Some("h1"), 500, 1000)],
            vec![entry("note.md", Some("h1"), 2000)],
            &[("note.md", "h2")],
        );
        assert_eq!(actions, vec![SyncAction::upload(path("note.md"))]);

        // Remote deletion is newer than the local edit.
        let actions = run(
            vec![deleted("note.md", Some("h1"), 500, 2000)],
            vec![entry("note.md", Some("h1"), 1000)],
            &[("note.md", "h2")],
        );
        assert_eq!(actions, vec![SyncAction::delete_local(path("note.md"))]);
    }

    #[test]
    fn test_remote_deletion_applies_to_unchanged_content() {
        let actions = run(
            vec![deleted("note.md", Some("h1"), 500, 2000)],
            vec![entry("note.md", Some("h1"), 1000)],
            &[("note.md", "h1")],
        );
        assert_eq!(actions, vec![SyncAction::delete_local(path("note.md"))]);
    }

    #[test]
    fn test_local_deletion_precedence() {
        let actions = run(
            vec![entry("note.md", Some("h1"), 1000)],
            vec![deleted("note.md", Some("h1"), 500, 2000)],
            &[],
        );
        assert_eq!(actions, vec![SyncAction::delete_remote(path("note.md"))]);

        let actions = run(
            vec![entry("note.md", Some("h2"), 3000)],
            vec![deleted("note.md", Some("h1"), 500, 2000)],
            &[],
        );
        assert_eq!(actions, vec![SyncAction::download(path("note.md"))]);
    }

    #[test]
    fn test_equal_timestamps_do_nothing() {
        let actions = run(
            vec![deleted("a.md", Some("h1"), 0, 1000)],
            vec![entry("a.md", Some("h1"), 1000)],
            &[("a.md", "h2")],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_both_deleted() {
        let actions = run(
            vec![deleted("a.md", Some("h1"), 0, 10)],
            vec![deleted("a.md", Some("h1"), 0, 20)],
            &[],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_divergence_picks_direction() {
        let actions = run(
            vec![
                entry("local-edit.md", Some("h1"), 0),
                entry("remote-edit.md", Some("r2"), 0),
            ],
            vec![
                entry("local-edit.md", Some("h1"), 0),
                entry("remote-edit.md", Some("r1"), 0),
            ],
            &[("local-edit.md", "h2"), ("remote-edit.md", "r1")],
        );
        assert_eq!(
            actions,
            vec![
                SyncAction::upload(path("local-edit.md")),
                SyncAction::download(path("remote-edit.md")),
            ]
        );
    }

    #[test]
    fn test_one_sided_paths() {
        let actions = run(
            vec![
                entry("new-remote.md", Some("r"), 0),
                deleted("old-remote.md", Some("r"), 0, 5),
            ],
            vec![
                entry("new-local.md", None, 0),
                deleted("old-local.md", None, 0, 5),
            ],
            &[("new-local.md", "l")],
        );
        assert_eq!(
            actions,
            vec![
                SyncAction::upload(path("new-local.md")),
                SyncAction::download(path("new-remote.md")),
            ]
        );
    }

    #[test]
    fn test_manifest_config_and_skipped_paths_are_ignored() {
        let policy = SyncConfig::default().policy().unwrap();
        let remote = files(vec![
            entry(".vault/sync-metadata.json", None, 0),
            entry(".vault/app.json", Some("c"), 0),
            entry("conflicted.md", Some("r"), 0),
        ]);
        let skip: HashSet<RepoPath> = [path("conflicted.md")].into_iter().collect();

        let actions =
            determine_sync_actions(&remote, &BTreeMap::new(), &HashMap::new(), &skip, &policy);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_tracked_file_without_hash_is_left_alone() {
        let actions = run(
            vec![entry("a.md", Some("r2"), 0)],
            vec![entry("a.md", Some("r1"), 0)],
            &[],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SyncAction::delete_local(path("note.md")).to_string(),
            "delete_local(note.md)"
        );
    }
}
