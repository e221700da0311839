//! Configuration Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A source could not be read or did not match the expected shape
    #[display("failed to load configuration")]
    Load,
    /// Values parsed but make no sense together
    #[display("invalid configuration: {_0}")]
    InvalidConfig(#[error(not(source))] String),
}

impl ErrorKind {
    /// Configuration errors need a human; nothing to retry.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
