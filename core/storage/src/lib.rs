//! Storage boundaries for gitvault.
//!
//! Two collaborators sit behind traits so the sync engine never touches a
//! concrete backend:
//! - [`GitRemote`] - the Git hosting API (GitHub REST, or in memory)
//! - [`VaultFs`] - the local vault directory (tokio::fs, or in memory)
//!
//! The [`watcher`] module turns OS file notifications into [`VaultEvent`]s.

pub mod fs;
pub mod github;
pub mod local;
pub mod memory;
pub mod memory_fs;
pub mod remote;
pub mod watcher;

pub use fs::{list_files_recursive, Listing, VaultFs};
pub use github::{GitHubClient, GitHubConfig};
pub use local::LocalFs;
pub use memory::{MemoryRemote, RemoteOp};
pub use memory_fs::MemoryFs;
pub use remote::{
    decode_base64, encode_base64, Blob, EntrySource, GitRemote, ObjectKind, RemoteTree,
    TreeEntry, TreeItem, FILE_MODE,
};
pub use watcher::{VaultEvent, VaultWatcher};
