//! File watcher bridging OS notifications into [`VaultEvent`]s.
//!
//! Uses notify-debouncer-mini so a save that touches a file several times
//! produces one event.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

use gitvault_common::{Error, RepoPath, Result};

/// Debounce window for file-system notifications.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// A change to a file in the vault, relative to the vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    /// A file was created.
    Create(RepoPath),
    /// A file's content changed.
    Modify(RepoPath),
    /// A file was removed.
    Delete(RepoPath),
    /// A file moved from `from` to `to`.
    Rename { from: RepoPath, to: RepoPath },
}

impl VaultEvent {
    /// Path the event applies to (the destination for renames).
    pub fn path(&self) -> &RepoPath {
        match self {
            VaultEvent::Create(p) | VaultEvent::Modify(p) | VaultEvent::Delete(p) => p,
            VaultEvent::Rename { to, .. } => to,
        }
    }
}

/// Watches a vault directory and forwards events to a channel.
///
/// The debouncer cannot tell creation from modification or pair up the
/// halves of a rename, so it reports `Modify` for paths that exist after the
/// window and `Delete` for paths that do not. The listener treats create and
/// modify identically, and a rename arrives as its two halves.
pub struct VaultWatcher {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl VaultWatcher {
    /// Start watching `root` recursively, sending events to `tx`.
    pub fn new(root: impl AsRef<Path>, tx: mpsc::UnboundedSender<VaultEvent>) -> Result<Self> {
        // FSEvents reports canonical paths, so strip against the canonical root.
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let callback_root = root.clone();

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(vault_event) = Self::process_event(&event.path, &callback_root) {
                            if tx.send(vault_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )
        .map_err(|e| Error::Storage(format!("Failed to start watcher: {}", e)))?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Storage(format!("Failed to watch {}: {}", root.display(), e)))?;

        Ok(Self {
            root,
            _debouncer: debouncer,
        })
    }

    /// Watched directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn process_event(path: &Path, root: &Path) -> Option<VaultEvent> {
        let relative = path.strip_prefix(root).ok()?;
        let components = relative
            .components()
            .map(|c| c.as_os_str().to_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        let repo_path = RepoPath::from_components(components).ok()?;
        if repo_path.is_root() {
            return None;
        }

        if path.is_dir() {
            return None;
        }

        let event = if path.exists() {
            VaultEvent::Modify(repo_path)
        } else {
            VaultEvent::Delete(repo_path)
        };

        debug!("File event: {:?}", event);
        Some(event)
    }
}
