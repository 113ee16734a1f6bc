//! GitHub remote for gitvault.
//!
//! Talks to the Git database endpoints of the GitHub REST API:
//! - recursive tree listing and blob fetch
//! - blob, tree and commit creation
//! - branch ref reads and fast-forward updates
//! - single-file creation for bootstrapping an empty repository

pub mod client;

pub use client::{GitHubClient, GitHubConfig, GITHUB_API_BASE};
