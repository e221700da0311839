//! In-memory disk cache for testing.

use super::{DiskCache, PathStream, file_url, root_relative};
use crate::DiskCacheHandle;
use crate::error::{ErrorKind, Result};
use crate::path::{Scope, validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

const MEMORY_ROOT: &str = "/";

#[derive(Default)]
struct Shared {
    files: RwLock<HashMap<PathBuf, Bytes>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

/// In-memory disk cache for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`] shared between every
/// scope created from the same cache, so a scoped view and its parent see the
/// same data. Writes can be made to fail on demand to exercise error paths.
///
/// # Examples
///
/// ```
/// use trove_storage::{DiskCache, MemoryDiskCache};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = MemoryDiskCache::with_files([
///     ("module-home", b"archive".to_vec()),
/// ]);
/// assert!(cache.exists(Path::new("module-home")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryDiskCache {
    shared: Arc<Shared>,
    scope: Scope,
}

impl MemoryDiskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Bytes>)>) -> Self {
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MemoryDiskCache::with_files: invalid path {}", path.display());
            };
            map.insert(validated, data.into());
        }
        let shared = Shared { files: RwLock::new(map), ..Default::default() };
        Self { shared: Arc::new(shared), scope: Scope::default() }
    }

    /// Make every subsequent `store` fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `store` calls across all scopes.
    pub fn write_count(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// Every stored path, relative to the cache root.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.shared.files.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    async fn read_file(&self, root_relative: &Path, requested: &Path) -> Result<Bytes> {
        match self.shared.files.read().await.get(root_relative) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(requested.to_path_buf())),
        }
    }
}

#[async_trait]
impl DiskCache for MemoryDiskCache {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let relative = self.scope.read_path(path)?;
        let files = self.shared.files.read().await;
        Ok(files.keys().any(|key| key.starts_with(&relative)))
    }

    async fn load(&self, path: &Path) -> Result<Bytes> {
        let relative = self.scope.read_path(path)?;
        self.read_file(&relative, path).await
    }

    async fn load_absolute_url(&self, url: &str) -> Result<Bytes> {
        let relative = root_relative(url, Path::new(MEMORY_ROOT))?;
        self.read_file(&relative, &relative).await
    }

    async fn store(&self, path: &Path, data: Bytes) -> Result<()> {
        let relative = self.scope.write_path(path)?;
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            let io = std::io::Error::other("simulated write failure");
            exn::bail!(ErrorKind::Io(io));
        }
        self.shared.files.write().await.insert(relative, data);
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        let relative = self.scope.write_path(path)?;
        let mut files = self.shared.files.write().await;
        let before = files.len();
        files.retain(|key, _| !key.starts_with(&relative));
        Ok(files.len() != before)
    }

    fn list_stream<'a>(&'a self, path: &'a Path) -> PathStream<'a> {
        let directory = match self.scope.list_path(path) {
            Ok(directory) => directory,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let matching: Vec<PathBuf> = {
                let files = self.shared.files.read().await;
                files
                    .keys()
                    .filter(|key| key.starts_with(&directory))
                    .filter_map(|key| self.scope.strip(key).map(Path::to_path_buf))
                    .collect()
            };
            for path in matching {
                yield Ok(path);
            }
        })
    }

    fn absolute_url(&self, path: &Path) -> Result<String> {
        Ok(file_url(&Path::new(MEMORY_ROOT).join(self.scope.read_path(path)?)))
    }

    fn scoped(&self, subpath: &Path, allow_read_outside_scope: bool) -> Result<DiskCacheHandle> {
        let scope = self.scope.child(subpath, allow_read_outside_scope)?;
        Ok(Arc::new(Self { shared: Arc::clone(&self.shared), scope }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_files() {
        let cache = MemoryDiskCache::with_files([("a/b", Bytes::from_static(b"1"))]);
        assert!(cache.exists(Path::new("a/b")).await.unwrap());
        assert!(cache.exists(Path::new("a")).await.unwrap());
        assert_eq!(cache.load(Path::new("a/b")).await.unwrap(), Bytes::from_static(b"1"));
        assert!(cache.load(Path::new("a")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_scopes_share_storage() {
        let cache = MemoryDiskCache::new();
        let scoped = cache.scoped(Path::new("user"), false).unwrap();
        scoped.store(Path::new("store"), Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(cache.paths().await, vec![PathBuf::from("user/store")]);
        assert_eq!(cache.write_count(), 1);
        assert_eq!(scoped.list(Path::new("")).await.unwrap(), vec![PathBuf::from("store")]);
    }

    #[tokio::test]
    async fn test_remove_directory() {
        let cache = MemoryDiskCache::with_files([
            ("dir/a", Bytes::from_static(b"1")),
            ("dir/b", Bytes::from_static(b"2")),
            ("dirt", Bytes::from_static(b"3")),
        ]);
        assert!(cache.remove(Path::new("dir")).await.unwrap());
        assert_eq!(cache.paths().await, vec![PathBuf::from("dirt")]);
        assert!(!cache.remove(Path::new("dir")).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let cache = MemoryDiskCache::new();
        cache.set_fail_writes(true);
        let err = cache.store(Path::new("x"), Bytes::new()).await.unwrap_err();
        assert!(err.is_retryable());
        cache.set_fail_writes(false);
        cache.store(Path::new("x"), Bytes::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_absolute_url_roundtrip() {
        let cache = MemoryDiskCache::new();
        let scoped = cache.scoped(Path::new("res.dir"), false).unwrap();
        scoped.store(Path::new("img.png"), Bytes::from_static(b"png")).await.unwrap();
        let url = scoped.absolute_url(Path::new("img.png")).unwrap();
        assert_eq!(url, "file:///res.dir/img.png");
        assert_eq!(cache.load_absolute_url(&url).await.unwrap(), Bytes::from_static(b"png"));
    }
}
