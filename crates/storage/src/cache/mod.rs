//! Disk cache trait and implementations.
//!
//! A [`DiskCache`] is a flat key/value view over a directory: paths in,
//! bytes out. Every cache can hand out a [`scoped`](DiskCache::scoped) child
//! that is confined to a subdirectory, which is how per-user and per-module
//! storage is kept apart.

mod encrypted;
mod local;
#[cfg(any(test, feature = "mock"))]
mod memory;

pub use self::encrypted::{ENCRYPTION_KEY_NAME, EncryptedDiskCache};
pub use self::local::LocalDiskCache;
#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryDiskCache;
use crate::DiskCacheHandle;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub(crate) type PathStream<'a> = Pin<Box<dyn Stream<Item = Result<PathBuf>> + Send + 'a>>;

const FILE_URL_SCHEME: &str = "file://";

/// Unified interface for disk caches.
///
/// # Path Handling
/// All paths are relative to the cache's scope and are validated using
/// [`validate_path`](crate::validate_path) before use. Writes can never leave
/// the scope. Reads may climb out of it with `..` only when the scope was
/// created with `allow_read_outside_scope`, and never above the cache root.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trove_storage::{DiskCache, error::Result};
///
/// async fn size_of_module(cache: &dyn DiskCache, name: &str) -> Result<usize> {
///     let path = format!("module-{name}");
///     if cache.exists(Path::new(&path)).await? {
///         Ok(cache.load(Path::new(&path)).await?.len())
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait DiskCache: Send + Sync {
    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist (directories count as missing files).
    async fn load(&self, path: &Path) -> Result<Bytes>;

    /// Read a file addressed by an absolute `file://` URL (or bare absolute
    /// path), as produced by [`absolute_url()`](Self::absolute_url).
    ///
    /// Returns [`InvalidUrl`](crate::error::ErrorKind::InvalidUrl) if the URL
    /// does not resolve inside the cache root.
    async fn load_absolute_url(&self, url: &str) -> Result<Bytes>;

    /// Write file contents, creating parent directories as needed.
    async fn store(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Remove a file or a whole directory.
    ///
    /// Returns `false` when there was nothing to remove.
    async fn remove(&self, path: &Path) -> Result<bool>;

    /// List every file below a directory (the empty path is the scope root).
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.list_stream(path).try_collect().await
    }

    /// Stream every file below a directory, relative to the scope.
    ///
    /// Asking for the contents of a directory that doesn't exist results in
    /// an empty stream, not an error.
    fn list_stream<'a>(&'a self, path: &'a Path) -> PathStream<'a>;

    /// `file://` URL of a cached path.
    fn absolute_url(&self, path: &Path) -> Result<String>;

    /// Cache confined to `subpath` of this cache's scope.
    fn scoped(&self, subpath: &Path, allow_read_outside_scope: bool) -> Result<DiskCacheHandle>;
}

pub(crate) fn file_url(absolute: &Path) -> String {
    format!("{FILE_URL_SCHEME}{}", absolute.display())
}

/// Turn a `file://` URL or absolute path into a path relative to `root`.
pub(crate) fn root_relative(url: &str, root: &Path) -> Result<PathBuf> {
    let absolute = Path::new(url.strip_prefix(FILE_URL_SCHEME).unwrap_or(url));
    if !absolute.is_absolute() {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    }
    let Ok(relative) = absolute.strip_prefix(root) else {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    };
    crate::path::validate(relative).map_err(|err| err.raise(ErrorKind::InvalidUrl(url.to_string())))
}
