use crate::error::{Error, ErrorKind, Result};
use crate::key::{AssetLocation, LoadSpecs, OutputType};
use crate::loader::{AssetLoader, BytesAsset, LoadedAssetHandle};
use async_trait::async_trait;
use std::sync::Arc;
use trove_download::{BytesHandler, DownloadRequest, RemoteDownloader, SharedError, sha256_hex};

const SCHEMES: [&str; 4] = ["http", "https", "file", "data"];

/// Loads assets as bytes through the [`RemoteDownloader`]. Remote assets are
/// cached on disk like any other download; `file://` URLs (extracted module
/// resources) are read from the disk cache and `data:` URLs decoded inline.
pub struct BytesAssetLoader {
    downloader: RemoteDownloader,
    handler: Arc<BytesHandler>,
}

impl BytesAssetLoader {
    pub fn new(downloader: RemoteDownloader) -> Self {
        Self {
            downloader,
            handler: Arc::new(BytesHandler),
        }
    }

    /// Disk cache filename for an asset URL.
    fn local_filename(url: &str) -> String {
        format!("asset-{}", sha256_hex(url.as_bytes()))
    }
}

fn load_error(url: &str, err: &SharedError) -> Error {
    if err.is_retryable() {
        ErrorKind::Network(format!("{url}: {}", ***err)).into()
    } else {
        ErrorKind::Load(format!("{url}: {}", ***err)).into()
    }
}

#[async_trait]
impl AssetLoader for BytesAssetLoader {
    fn schemes(&self) -> Vec<String> {
        SCHEMES.iter().map(|scheme| scheme.to_string()).collect()
    }

    fn output_type(&self) -> OutputType {
        OutputType::Bytes
    }

    async fn load(&self, location: &AssetLocation, _specs: &LoadSpecs) -> Result<LoadedAssetHandle> {
        let request = DownloadRequest::new(Self::local_filename(&location.url), location.url.clone());
        let loaded = self
            .downloader
            .enqueue(request, Arc::clone(&self.handler))
            .await
            .map_err(|err| load_error(&location.url, &err))?;
        Ok(Arc::new(BytesAsset((*loaded.value).clone())))
    }
}
