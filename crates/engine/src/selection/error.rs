//! Error types for the [`selection`](super) module.

use derive_more::{Display, Error};

/// A selection error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for selection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a folder toggle was refused. In every case the selection is exactly
/// what it was before the call.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Walking the folder would visit more nodes than allowed.
    #[display("folder {folder} has more than {limit} descendants")]
    SelectionTooLarge {
        #[error(not(source))]
        folder: String,
        #[error(not(source))]
        limit: usize,
    },
    /// A descendant folder could not be listed.
    #[display("failed to list descendants of {_0}")]
    Fetch(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SelectionTooLarge { .. } => false,
            Self::Fetch(_) => true,
        }
    }
}
