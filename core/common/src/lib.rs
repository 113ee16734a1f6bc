//! Common utilities and types shared across gitvault crates.
//!
//! This module provides the error type, repository-relative paths and the
//! Git object hashing used by both the remote boundary and the sync engine.

pub mod error;
pub mod hash;
pub mod types;

pub use error::{Error, Result};
pub use hash::git_blob_sha;
pub use types::{now_millis, RepoPath};
