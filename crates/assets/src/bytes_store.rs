use crate::error::{ErrorKind, Result};
use crate::key::{AssetLocation, LoadSpecs, OutputType};
use crate::loader::{AssetLoader, BytesAsset, LoadedAssetHandle};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Scheme of in-memory assets: `bytes://<id>`.
pub const BYTES_SCHEME: &str = "bytes";

/// Holds the content of assets created from bytes, and loads it back as a
/// bytes loader for the `bytes` scheme. Factories for other output types get
/// it as their downloader like any other bytes loader.
#[derive(Default)]
pub(crate) struct AssetBytesStore {
    entries: Mutex<HashMap<u64, Bytes>>,
    next_id: AtomicU64,
}

impl AssetBytesStore {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(self: &Arc<Self>, bytes: Bytes) -> BytesEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries().insert(id, bytes);
        BytesEntry {
            id,
            store: Arc::downgrade(self),
        }
    }

    fn get(&self, url: &str) -> Option<Bytes> {
        let id: u64 = url.strip_prefix("bytes://")?.parse().ok()?;
        self.entries().get(&id).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Keeps one entry of the store alive.
pub(crate) struct BytesEntry {
    pub id: u64,
    store: Weak<AssetBytesStore>,
}

impl Drop for BytesEntry {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.entries().remove(&self.id);
            tracing::trace!(id = self.id, "released in-memory asset bytes");
        }
    }
}

#[async_trait]
impl AssetLoader for AssetBytesStore {
    fn schemes(&self) -> Vec<String> {
        vec![BYTES_SCHEME.to_string()]
    }

    fn output_type(&self) -> OutputType {
        OutputType::Bytes
    }

    async fn load(&self, location: &AssetLocation, _specs: &LoadSpecs) -> Result<LoadedAssetHandle> {
        match self.get(&location.url) {
            Some(bytes) => Ok(Arc::new(BytesAsset(bytes))),
            None => exn::bail!(ErrorKind::NotFound(location.url.clone())),
        }
    }
}
