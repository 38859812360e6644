//! CLI Error Types

use derive_more::{Display, Error};

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Loading or validating the configuration failed.
    #[display("configuration error")]
    Config,
    /// Neither `--root` nor `remote.root` names a directory to serve.
    #[display("no remote root configured; pass --root or set remote.root")]
    MissingRoot,
    /// The remote could not be opened.
    #[display("could not open remote")]
    Remote,
    /// An id given on the command line does not exist on the remote.
    #[display("no resource with id {_0}")]
    UnknownResource(#[error(not(source))] String),
    /// The engine refused or failed an operation.
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
}
