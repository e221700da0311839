//! Archive Error Types

use derive_more::{Display, Error};
use trove_compress::error::{Error as CompressionError, ErrorKind as CompressionErrorKind};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every parse failure means the buffer is not a usable archive; none of them
/// are worth retrying with the same input.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The buffer ended in the middle of an entry.
    #[display("archive truncated at offset {_0}")]
    Truncated(#[error(not(source))] usize),
    /// The buffer length is not a multiple of the 4-byte alignment.
    #[display("archive misaligned: {_0} bytes")]
    Misaligned(#[error(not(source))] usize),
    /// An entry path is not valid UTF-8.
    #[display("entry path at offset {_0} is not valid UTF-8")]
    InvalidPath(#[error(not(source))] usize),
    /// Two entries share the same path.
    #[display("duplicate entry path: {_0}")]
    DuplicatePath(#[error(not(source))] String),
    /// A path or payload does not fit in a 32-bit length prefix.
    #[display("entry too large: {_0}")]
    TooLarge(#[error(not(source))] String),
    /// A required entry is absent.
    #[display("missing entry: {_0}")]
    MissingEntry(#[error(not(source))] String),
    /// An entry payload was requested as text but is not valid UTF-8.
    #[display("entry payload is not valid UTF-8: {_0}")]
    NotText(#[error(not(source))] String),
    /// The compressed frame around the archive could not be decoded.
    #[display("compression error: {_0}")]
    Compression(CompressionErrorKind),
}
impl ErrorKind {
    /// Convert a compression error into an archive error, keeping the
    /// compress crate's frame as a child in the error tree.
    #[track_caller]
    pub fn compression(err: CompressionError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Compression(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Compression(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
