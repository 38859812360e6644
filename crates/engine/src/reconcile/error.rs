//! Error types for the [`reconcile`](super) module.
//!
//! A batch that never finishes is not an error: it ends with its ids in
//! [`IndexStatus::Timeout`](super::IndexStatus::Timeout).

use derive_more::{Display, Error};

/// A reconcile error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reconcile operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Adding to or removing from the job's membership (or triggering the
    /// sync afterwards) failed. The affected ids are marked as errored.
    #[display("failed to update membership of job {_0}")]
    MembershipUpdateFailed(#[error(not(source))] String),
    /// One status poll failed. Poll loops log this and try again on the next
    /// tick.
    #[display("failed to poll statuses for batch {_0}")]
    StatusPollFailed(#[error(not(source))] String),
    /// Fetching the job's membership or statuses for a resync failed.
    #[display("failed to resync statuses of job {_0}")]
    ResyncFailed(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MembershipUpdateFailed(_) => true,
            Self::StatusPollFailed(_) => true,
            Self::ResyncFailed(_) => true,
        }
    }
}
