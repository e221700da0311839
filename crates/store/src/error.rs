//! Store Error Types

use derive_more::{Display, Error};
use std::sync::Arc;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
/// One failure delivered to every caller whose mutation was part of the same
/// batched write.
pub type SharedError = Arc<Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Serialized store could not be read back. The store starts cold.
    #[display("corrupt store data: {_0}")]
    Format(#[error(not(source))] String),
    /// Serialized store was written by an incompatible version.
    #[display("incompatible store version {_0}")]
    IncompatibleVersion(#[error(not(source))] u64),
    /// The user id cannot name an on-disk scope.
    #[display("invalid user session: {_0:?}")]
    InvalidSession(#[error(not(source))] String),
    /// The disk cache rejected a read or write.
    #[display("disk cache error")]
    Storage,
    /// The store's worker has shut down.
    #[display("store is closed")]
    Closed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
