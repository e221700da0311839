use derive_more::{Display, Error};
use std::sync::Arc;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;
/// Outcome of one resolution or load, delivered to every observer sharing it.
pub type SharedError = Arc<Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Neither the module resources nor the local resolver know the asset.
    #[display("asset not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The asset location could not be resolved for a reason retrying won't fix.
    #[display("failed to resolve {_0}")]
    Unresolved(#[error(not(source))] String),
    /// Network-origin failure. Retried on the next consumer action.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    #[display("no asset loader for {_0}")]
    NoLoader(#[error(not(source))] String),
    /// The loader failed or produced nothing usable.
    #[display("failed to load {_0}")]
    Load(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
