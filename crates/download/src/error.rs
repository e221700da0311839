//! Download Error Types

use derive_more::{Display, Error};
use std::sync::Arc;

/// A download error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for download operations.
pub type Result<T> = std::result::Result<T, Error>;
/// One failure delivered to every requester of the same URL.
pub type SharedError = Arc<Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure, non-2xx status or empty body. Worth retrying later.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Payload does not match the expected SHA-256 digest.
    #[display("integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
    /// URL could not be interpreted (bad `data:` payload, unsupported scheme).
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Payload is corrupt or not what the item handler expected.
    #[display("invalid payload: {_0}")]
    Format(#[error(not(source))] String),
    /// Reading a local file failed.
    #[display("disk cache error")]
    Storage,
    /// Item handler failed to preprocess the downloaded payload.
    #[display("failed to preprocess {_0}")]
    Preprocess(#[error(not(source))] String),
    /// Item handler failed to turn the payload into a value.
    #[display("failed to transform {_0}")]
    Transform(#[error(not(source))] String),
    /// The same URL was requested with handlers producing different types.
    #[display("cached value for {_0} has a different type")]
    TypeMismatch(#[error(not(source))] String),
    /// The download task ended without delivering a result.
    #[display("download cancelled: {_0}")]
    Cancelled(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Storage | Self::Cancelled(_))
    }
}

