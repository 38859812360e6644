//! Engine Error Types
//!
//! Errors surfaced by [`Session`](crate::Session). Each kind names the
//! component that failed; the component's own error is the child frame.

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A folder listing failed. See [`kbsync_cache::error::ErrorKind`].
    #[display("folder listing failed")]
    Cache,
    /// A folder toggle was refused. See
    /// [`selection::error::ErrorKind`](crate::selection::error::ErrorKind).
    #[display("selection change refused")]
    Selection,
    /// Updating the job or its statuses failed. See
    /// [`reconcile::error::ErrorKind`](crate::reconcile::error::ErrorKind).
    #[display("indexing request failed")]
    Reconcile,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cache | Self::Reconcile => true,
            Self::Selection => false,
        }
    }
}
