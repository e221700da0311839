use crate::key::OutputType;
use crate::loader::{AssetDownloader, AssetLoader, AssetLoaderFactory, LoaderDownloader, same};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

enum DownloaderSource {
    Registered(Arc<dyn AssetDownloader>),
    Loader(Arc<dyn AssetLoader>),
}

impl DownloaderSource {
    fn is(&self, other: &DownloaderSource) -> bool {
        match (self, other) {
            (Self::Registered(a), Self::Registered(b)) => same(a, b),
            (Self::Loader(a), Self::Loader(b)) => same(a, b),
            _ => false,
        }
    }

    fn downloader(&self) -> Arc<dyn AssetDownloader> {
        match self {
            Self::Registered(downloader) => Arc::clone(downloader),
            Self::Loader(loader) => Arc::new(LoaderDownloader(Arc::clone(loader))),
        }
    }
}

struct BuiltLoader {
    scheme: String,
    output_type: OutputType,
    source: DownloaderSource,
    loader: Arc<dyn AssetLoader>,
}

#[derive(Default)]
struct Registry {
    loaders: Vec<Arc<dyn AssetLoader>>,
    factories: Vec<Arc<dyn AssetLoaderFactory>>,
    downloaders: HashMap<String, Arc<dyn AssetDownloader>>,
    built: Vec<BuiltLoader>,
}

impl Registry {
    fn downloader_source(&self, scheme: &str) -> Option<DownloaderSource> {
        if let Some(downloader) = self.downloaders.get(scheme) {
            return Some(DownloaderSource::Registered(Arc::clone(downloader)));
        }
        self.loaders
            .iter()
            .rev()
            .find(|loader| loader.supports(scheme, OutputType::Bytes))
            .map(|loader| DownloaderSource::Loader(Arc::clone(loader)))
    }
}

/// Registry of asset loaders.
///
/// Registered loaders take precedence, most recent first. Otherwise a loader
/// is built by a factory for the output type on top of the downloader for the
/// scheme, and reused for as long as that downloader stays the same.
#[derive(Default)]
pub struct AssetLoaderManager {
    registry: Mutex<Registry>,
}

impl AssetLoaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_asset_loader(&self, loader: Arc<dyn AssetLoader>) {
        self.registry().loaders.push(loader);
    }

    pub fn unregister_asset_loader(&self, loader: &Arc<dyn AssetLoader>) {
        self.registry().loaders.retain(|registered| !same(registered, loader));
    }

    pub fn register_asset_loader_factory(&self, factory: Arc<dyn AssetLoaderFactory>) {
        self.registry().factories.push(factory);
    }

    /// Downloader handed to factories building loaders for `scheme`, instead
    /// of the scheme's bytes loader.
    pub fn register_downloader_for_scheme(&self, scheme: impl Into<String>, downloader: Arc<dyn AssetDownloader>) {
        self.registry().downloaders.insert(scheme.into(), downloader);
    }

    pub fn resolve_asset_loader(&self, scheme: &str, output_type: OutputType) -> Option<Arc<dyn AssetLoader>> {
        let mut registry = self.registry();
        if let Some(loader) = registry.loaders.iter().rev().find(|loader| loader.supports(scheme, output_type)) {
            return Some(Arc::clone(loader));
        }

        let factory = registry
            .factories
            .iter()
            .rev()
            .find(|factory| factory.output_type() == output_type)
            .cloned()?;
        let source = registry.downloader_source(scheme)?;
        let cached = registry.built.iter().find(|built| {
            built.scheme == scheme && built.output_type == output_type && built.source.is(&source)
        });
        if let Some(built) = cached {
            return Some(Arc::clone(&built.loader));
        }

        tracing::debug!(scheme, %output_type, "Building asset loader from factory");
        let loader = factory.create(scheme, source.downloader());
        registry.built.push(BuiltLoader {
            scheme: scheme.to_string(),
            output_type,
            source,
            loader: Arc::clone(&loader),
        });
        Some(loader)
    }
}
