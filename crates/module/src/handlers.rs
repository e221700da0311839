//! Item handlers for module and resource archives.

use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use trove_archive::{Archive, ArchiveBuilder};
use trove_download::{ErrorKind, ItemHandler, Result};
use trove_storage::DiskCacheHandle;

fn open_archive(data: Bytes, decompression_disabled: bool, local_filename: &str) -> Result<Archive> {
    let archive = if decompression_disabled {
        Archive::parse(data)
    } else {
        Archive::decompress(data)
    };
    archive.map_err(|err| err.raise(ErrorKind::Format(format!("{local_filename} is not a valid archive"))))
}

/// Modules stay compressed on disk and are decompressed on every load.
#[derive(Debug, Default)]
pub(crate) struct ModuleHandler {
    decompression_disabled: AtomicBool,
}

impl ModuleHandler {
    pub fn set_decompression_disabled(&self, disabled: bool) {
        self.decompression_disabled.store(disabled, Ordering::Relaxed);
    }
}

#[async_trait]
impl ItemHandler for ModuleHandler {
    type Output = Archive;

    fn description(&self) -> &str {
        "module"
    }

    async fn transform(&self, local_filename: &str, data: Bytes) -> Result<Archive> {
        open_archive(data, self.decompression_disabled.load(Ordering::Relaxed), local_filename)
    }
}

/// Logical resource name to `file://` URL of the extracted resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleResources {
    urls: BTreeMap<String, String>,
}

impl ModuleResources {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.urls.iter().map(|(name, url)| (name.as_str(), url.as_str()))
    }

    fn insert(&mut self, local_filename: &str, name: String, url: String) {
        if self.urls.contains_key(&name) {
            tracing::error!(name = %name, local_filename, "Duplicate entry in resource archive");
            return;
        }
        self.urls.insert(name, url);
    }
}

/// Name a resource can be looked up by without its directory, extension or
/// density suffix: `images/close-button@2x.png` becomes `close_button`.
pub fn sanitize_asset_filename(path: &str) -> Option<String> {
    let stem = Path::new(path).file_stem()?.to_str()?;
    let stem = match stem.rfind('@') {
        Some(index) => &stem[..index],
        None => stem,
    };
    Some(stem.replace('-', "_"))
}

/// Directory the entries of a resource archive are extracted into.
fn extraction_directory(local_filename: &str) -> PathBuf {
    Path::new(local_filename).with_extension("dir")
}

/// Resource archives are extracted into one file per entry. What gets cached
/// as the download record is a small archive mapping entry names to the
/// extracted files.
pub(crate) struct ResourcesHandler {
    disk: DiskCacheHandle,
    decompression_disabled: AtomicBool,
}

impl ResourcesHandler {
    pub fn new(disk: DiskCacheHandle) -> Self {
        Self {
            disk,
            decompression_disabled: AtomicBool::new(false),
        }
    }

    pub fn set_decompression_disabled(&self, disabled: bool) {
        self.decompression_disabled.store(disabled, Ordering::Relaxed);
    }

    async fn remove_stale(&self, path: &Path) {
        if let Err(err) = self.disk.remove(path).await {
            tracing::warn!(path = %path.display(), error = ?err, "Failed to remove stale resources");
        }
    }
}

#[async_trait]
impl ItemHandler for ResourcesHandler {
    type Output = ModuleResources;

    fn description(&self) -> &str {
        "resources"
    }

    async fn preprocess(&self, local_filename: &str, data: Bytes) -> Result<Bytes> {
        let directory = extraction_directory(local_filename);
        self.remove_stale(Path::new(local_filename)).await;
        self.remove_stale(&directory).await;

        let archive = open_archive(data, self.decompression_disabled.load(Ordering::Relaxed), local_filename)?;
        let mut index = ArchiveBuilder::with_capacity(archive.len());
        for entry in archive.entries() {
            let cache_path = directory.join(&entry.path);
            self.disk
                .store(&cache_path, entry.data.clone())
                .await
                .map_err(|err| err.raise(ErrorKind::Storage))?;
            index
                .add_entry(entry.path.clone(), cache_path.to_string_lossy().into_owned().into_bytes())
                .map_err(|err| err.raise(ErrorKind::Format(format!("invalid entry in {local_filename}"))))?;
        }
        tracing::debug!(local_filename, resources = archive.len(), "Extracted resources");
        let index = index
            .build()
            .map_err(|err| err.raise(ErrorKind::Format(format!("failed to index {local_filename}"))))?;
        Ok(Bytes::from(index))
    }

    async fn transform(&self, local_filename: &str, data: Bytes) -> Result<ModuleResources> {
        let index = Archive::parse(data)
            .map_err(|err| err.raise(ErrorKind::Format(format!("invalid resource index for {local_filename}"))))?;
        let mut resources = ModuleResources::default();
        for entry in index.entries() {
            let cache_path = std::str::from_utf8(&entry.data)
                .or_raise(|| ErrorKind::Format(format!("invalid cache path for {}", entry.path)))?;
            let cache_path = Path::new(cache_path);
            let exists = self
                .disk
                .exists(cache_path)
                .await
                .map_err(|err| err.raise(ErrorKind::Storage))?;
            if !exists {
                exn::bail!(ErrorKind::Format(format!(
                    "resource {} is missing from the disk cache",
                    cache_path.display()
                )));
            }
            let url = self
                .disk
                .absolute_url(cache_path)
                .map_err(|err| err.raise(ErrorKind::Storage))?;
            resources.insert(local_filename, entry.path.clone(), url.clone());
            match sanitize_asset_filename(&entry.path) {
                Some(alias) if alias != entry.path => resources.insert(local_filename, alias, url),
                Some(_) => {},
                None => tracing::error!(path = %entry.path, local_filename, "Invalid resource filename"),
            }
        }
        Ok(resources)
    }
}
