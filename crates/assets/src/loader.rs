use crate::error::{ErrorKind, Result};
use crate::key::{AssetLocation, LoadSpecs, OutputType};
use crate::observer::LoadOutcome;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A loaded asset, in whatever form its loader produces.
pub trait LoadedAsset: Send + Sync + fmt::Debug {
    /// Raw content, for assets that have one.
    fn bytes(&self) -> Option<Bytes> {
        None
    }
}

pub type LoadedAssetHandle = Arc<dyn LoadedAsset>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesAsset(pub Bytes);

impl LoadedAsset for BytesAsset {
    fn bytes(&self) -> Option<Bytes> {
        Some(self.0.clone())
    }
}

/// Lets a loader replace the result of a load it already answered, for
/// example when the content behind the URL changes.
///
/// Every published result is delivered to the consumers sharing the load.
/// Results published before the load itself returns arrive after its return
/// value.
#[derive(Clone, Debug)]
pub struct LoadUpdates {
    sender: mpsc::UnboundedSender<LoadOutcome>,
}

impl LoadUpdates {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<LoadOutcome>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns `false` once nobody consumes the load any more.
    pub fn publish(&self, result: Result<LoadedAssetHandle>) -> bool {
        self.sender.send(result.map_err(Arc::new)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Loads assets of one output type for a set of URL schemes.
///
/// Dropping the future returned by [`load`](AssetLoader::load) cancels the load.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    fn schemes(&self) -> Vec<String>;

    fn output_type(&self) -> OutputType;

    async fn load(&self, location: &AssetLocation, specs: &LoadSpecs) -> Result<LoadedAssetHandle>;

    /// Entry point used by the assets manager. Loaders whose result can
    /// change keep `updates` and publish newer results through it.
    async fn load_with_updates(
        &self,
        location: &AssetLocation,
        specs: &LoadSpecs,
        _updates: LoadUpdates,
    ) -> Result<LoadedAssetHandle> {
        self.load(location, specs).await
    }

    fn supports(&self, scheme: &str, output_type: OutputType) -> bool {
        self.output_type() == output_type && self.schemes().iter().any(|supported| supported == scheme)
    }
}

/// Fetches the raw bytes behind a URL. Handed to loaders built by an
/// [`AssetLoaderFactory`].
#[async_trait]
pub trait AssetDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes>;
}

/// Builds loaders for an output type on top of a downloader, for schemes that
/// only have a bytes loader.
pub trait AssetLoaderFactory: Send + Sync {
    fn output_type(&self) -> OutputType;

    fn create(&self, scheme: &str, downloader: Arc<dyn AssetDownloader>) -> Arc<dyn AssetLoader>;
}

/// Any bytes loader can serve as a downloader.
pub(crate) struct LoaderDownloader(pub Arc<dyn AssetLoader>);

#[async_trait]
impl AssetDownloader for LoaderDownloader {
    async fn download(&self, url: &str) -> Result<Bytes> {
        let location = AssetLocation::new(url, false);
        let loaded = self.0.load(&location, &LoadSpecs::new(OutputType::Bytes)).await?;
        match loaded.bytes() {
            Some(bytes) => Ok(bytes),
            None => exn::bail!(ErrorKind::Load(format!("{url} has no bytes content"))),
        }
    }
}

/// Identity comparison for shared trait objects.
pub(crate) fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
