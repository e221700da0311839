use derive_more::{Display, Error};
use trove_download::{ErrorKind as DownloadErrorKind, SharedError};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[display("no manifest registered for module {_0}")]
    ManifestNotFound(#[error(not(source))] String),
    #[display("invalid manifest: {_0}")]
    InvalidManifest(#[error(not(source))] String),
    #[display("failed to load {module}: {kind}")]
    Download {
        module: String,
        #[error(not(source))]
        kind: DownloadErrorKind,
    },
}

impl ErrorKind {
    /// Wrap a downloader failure shared between coalesced requesters.
    ///
    /// The shared error cannot be moved into the error tree, so only its kind
    /// is kept; the downloader has already logged the full tree.
    #[track_caller]
    pub fn download(module: &str, err: &SharedError) -> Error {
        Self::Download {
            module: module.to_string(),
            kind: (***err).clone(),
        }
        .into()
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}
