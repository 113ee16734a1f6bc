//! Common error types for gitvault.

use thiserror::Error;

/// Top-level error type for gitvault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, timeout or server-side (5xx) error.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote rejected the request because a rate limit was exhausted.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Credentials missing, invalid or expired.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials valid but not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The remote repository has no commits yet.
    #[error("Remote repository is empty")]
    EmptyRepository,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Both replicas are in a state that cannot be reconciled automatically.
    #[error("Unsafe sync state: {0}")]
    UnsafeState(String),

    /// The remote tree has no manifest although a sync happened before.
    #[error("Remote manifest is missing: {0}")]
    MissingManifest(String),

    /// Conflict resolution failed or returned an invalid answer.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Only transport-level trouble and rate limiting qualify; everything
    /// else needs a changed input or manual intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::RateLimited(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
