//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every kind is [`Clone`]: a single failed round-trip may be handed to
//! several coalesced waiters (see `kbsync-cache`), each of which raises its
//! own copy into its own error tree.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::sync::Arc;

/// A remote error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone)]
pub enum ErrorKind {
    /// Resource (or folder) does not exist on the remote
    #[display("resource not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Listing a resource that isn't a directory
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Identifier is malformed or escapes the store root
    #[display("invalid resource id: {_0}")]
    InvalidId(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(Arc<IoError>),
    /// Network-related error (timeouts, connection resets, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Stored job state could not be read or written
    #[display("invalid job state: {_0}")]
    JobState(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}
