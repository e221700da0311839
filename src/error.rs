//! Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration could not be loaded or is invalid
    #[display("configuration error")]
    Config,
    /// The cache directory could not be opened
    #[display("disk cache unavailable")]
    Storage,
    /// No HTTP client was given and none is built in
    #[display("no HTTP client available")]
    MissingHttpClient,
    /// A persistent store could not be opened
    #[display("failed to open store {_0}")]
    Store(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
