//! Local filesystem disk cache.
//!
//! Files are stored below a configured root directory and accessed via
//! `tokio::fs` for async I/O.

use super::{DiskCache, PathStream, file_url, root_relative};
use crate::DiskCacheHandle;
use crate::error::{ErrorKind, Result};
use crate::path::Scope;
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(PathBuf),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem disk cache.
///
/// # Examples
///
/// ```no_run
/// use trove_storage::LocalDiskCache;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = LocalDiskCache::new("/var/cache/trove")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalDiskCache {
    /// Cache root; nothing outside of it is ever touched
    root: PathBuf,
    scope: Scope,
}

impl LocalDiskCache {
    /// Create a disk cache rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it only happens once at startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { root, scope: Scope::default() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn read_file(&self, root_relative: &Path, requested: &Path) -> Result<Bytes> {
        let absolute = self.root.join(root_relative);
        let data = fs::read(&absolute).await.map_err(|e| match e.kind() {
            // Reading a directory is reported as "not a file"; to callers it's a miss.
            std::io::ErrorKind::IsADirectory => ErrorKind::NotFound(requested.to_path_buf()),
            _ => Self::map_io_error(e, requested),
        })?;
        Ok(Bytes::from(data))
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?;
        if file_type.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if !file_type.is_file() {
            // Note: silently drop what is most likely a broken symlink.
            return Ok(WalkEntry::Skip);
        }
        let relative = path.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", path.display(), self.root.display()))
        })?;
        match self.scope.strip(relative) {
            Some(scoped) => Ok(WalkEntry::File(scoped.to_path_buf())),
            None => Ok(WalkEntry::Skip),
        }
    }
}

#[async_trait]
impl DiskCache for LocalDiskCache {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let absolute = self.root.join(self.scope.read_path(path)?);
        Ok(fs::try_exists(&absolute).await.map_err(ErrorKind::Io)?)
    }

    async fn load(&self, path: &Path) -> Result<Bytes> {
        let relative = self.scope.read_path(path)?;
        self.read_file(&relative, path).await
    }

    async fn load_absolute_url(&self, url: &str) -> Result<Bytes> {
        let relative = root_relative(url, &self.root)?;
        self.read_file(&relative, &relative).await
    }

    async fn store(&self, path: &Path, data: Bytes) -> Result<()> {
        let absolute = self.root.join(self.scope.write_path(path)?);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        fs::write(&absolute, &data).await.map_err(|e| Self::map_io_error(e, path))?;
        tracing::trace!(path = %path.display(), bytes = data.len(), "Stored file in disk cache");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        let absolute = self.root.join(self.scope.write_path(path)?);
        let metadata = match fs::symlink_metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Self::map_io_error(e, path).into()),
        };
        let removed = match metadata.is_dir() {
            true => fs::remove_dir_all(&absolute).await,
            false => fs::remove_file(&absolute).await,
        };
        match removed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    fn list_stream<'a>(&'a self, path: &'a Path) -> PathStream<'a> {
        let start = match self.scope.list_path(path) {
            Ok(relative) => self.root.join(relative),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let mut stack = vec![start];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    fn absolute_url(&self, path: &Path) -> Result<String> {
        Ok(file_url(&self.root.join(self.scope.read_path(path)?)))
    }

    fn scoped(&self, subpath: &Path, allow_read_outside_scope: bool) -> Result<DiskCacheHandle> {
        let scope = self.scope.child(subpath, allow_read_outside_scope)?;
        tracing::trace!(scope = %scope.prefix().display(), "Created scoped disk cache");
        Ok(Arc::new(Self { root: self.root.clone(), scope }))
    }
}
