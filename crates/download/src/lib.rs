//! Single-flight downloader.
//!
//! [`RemoteDownloader::enqueue`] resolves a URL through, in order, the
//! in-memory item cache, an in-flight download of the same URL, the URL
//! itself for `file://` and `data:` URLs, the disk cache, and finally the
//! network. What to do with the downloaded bytes is up to an [`ItemHandler`].

mod downloader;
pub mod error;
mod handler;
pub mod http;
mod memory;
mod record;

pub use crate::downloader::{DEFAULT_MEMORY_TTL, DownloadRequest, LoadSource, Loaded, RemoteDownloader};
pub use crate::error::{Error, ErrorKind, Result, SharedError};
pub use crate::handler::{BytesHandler, ItemHandler};
#[cfg(any(test, feature = "mock"))]
pub use crate::http::MockHttpClient;
#[cfg(feature = "reqwest")]
pub use crate::http::ReqwestHttpClient;
pub use crate::http::{HttpClient, HttpClientHandle, HttpRequest, HttpResponse};

/// Hex-encoded SHA-256 digest, the format used for expected hashes.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
