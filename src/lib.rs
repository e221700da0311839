//! Fetches, verifies, caches and serves modules and assets, and persists
//! small key/value records.
//!
//! [`Trove`] wires the individual crates together from a [`Config`]:
//!
//! ```no_run
//! # async fn run() -> trove::Result<()> {
//! let config = trove::Config::load(None).map_err(|err| err.raise(trove::ErrorKind::Config))?;
//! let trove = trove::Trove::builder(config).build()?;
//! let _preferences = trove.open_store("preferences", None)?;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use crate::error::{Error, ErrorKind, Result};
pub use trove_assets as assets;
pub use trove_config::Config;
pub use trove_download as download;
pub use trove_module as module;
pub use trove_storage as storage;
pub use trove_store as store;

use std::path::Path;
use std::sync::Arc;
use trove_assets::{AssetLoaderManager, AssetsManager, BytesAssetLoader, LocalAssetResolver, NotificationDispatcher};
use trove_download::{HttpClientHandle, RemoteDownloader};
use trove_module::ModuleManager;
use trove_storage::{DiskCacheHandle, KeychainHandle, LocalDiskCache};
use trove_store::{PersistentStore, StoreOptions, UserSession};

/// Scope of the disk cache holding downloads, module records and extracted
/// resources.
pub const DOWNLOADS_SCOPE: &str = "downloads";
/// Scope of the disk cache holding persistent stores.
pub const STORES_SCOPE: &str = "stores";

pub struct TroveBuilder {
    config: Config,
    disk: Option<DiskCacheHandle>,
    http: Option<HttpClientHandle>,
    keychain: Option<KeychainHandle>,
    local_resolver: Option<Arc<dyn LocalAssetResolver>>,
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
}

impl TroveBuilder {
    /// Replaces the filesystem cache rooted at `config.cache_dir`.
    pub fn disk_cache(mut self, disk: DiskCacheHandle) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn http_client(mut self, http: HttpClientHandle) -> Self {
        self.http = Some(http);
        self
    }

    /// Encrypts persistent stores at rest with a key kept in `keychain`.
    pub fn keychain(mut self, keychain: KeychainHandle) -> Self {
        self.keychain = Some(keychain);
        self
    }

    pub fn local_resolver(mut self, local: Arc<dyn LocalAssetResolver>) -> Self {
        self.local_resolver = Some(local);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Trove> {
        self.config.validate().map_err(|err| err.raise(ErrorKind::Config))?;
        let disk = match self.disk {
            Some(disk) => disk,
            None => Arc::new(LocalDiskCache::new(&self.config.cache_dir).map_err(|err| err.raise(ErrorKind::Storage))?),
        };
        let http = match self.http {
            Some(http) => http,
            None => default_http_client()?,
        };
        let downloads = disk
            .scoped(Path::new(DOWNLOADS_SCOPE), false)
            .map_err(|err| err.raise(ErrorKind::Storage))?;
        let stores = disk
            .scoped(Path::new(STORES_SCOPE), false)
            .map_err(|err| err.raise(ErrorKind::Storage))?;

        let downloader = RemoteDownloader::with_memory_ttl(downloads, http, self.config.memory_ttl());
        let modules = Arc::new(ModuleManager::new(downloader.clone(), self.config.device_density));
        modules.set_decompression_disabled(self.config.downloader.decompression_disabled);

        let loaders = Arc::new(AssetLoaderManager::new());
        loaders.register_asset_loader(Arc::new(BytesAssetLoader::new(downloader.clone())));
        let mut assets = AssetsManager::builder(Arc::clone(&loaders)).module_manager(Arc::clone(&modules));
        if let Some(local) = self.local_resolver {
            assets = assets.local_resolver(local);
        }
        if let Some(dispatcher) = self.dispatcher {
            assets = assets.dispatcher(dispatcher);
        }

        tracing::info!(cache_dir = %self.config.cache_dir.display(), "trove ready");
        Ok(Trove {
            downloader,
            modules,
            assets: assets.build(),
            stores,
            keychain: self.keychain,
            config: self.config,
        })
    }
}

#[cfg(feature = "reqwest")]
fn default_http_client() -> Result<HttpClientHandle> {
    let client = trove_download::ReqwestHttpClient::new().map_err(|err| err.raise(ErrorKind::MissingHttpClient))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "reqwest"))]
fn default_http_client() -> Result<HttpClientHandle> {
    exn::bail!(ErrorKind::MissingHttpClient)
}

/// Every component, sharing one disk cache and one downloader.
pub struct Trove {
    config: Config,
    downloader: RemoteDownloader,
    modules: Arc<ModuleManager>,
    assets: AssetsManager,
    stores: DiskCacheHandle,
    keychain: Option<KeychainHandle>,
}

impl Trove {
    pub fn builder(config: Config) -> TroveBuilder {
        TroveBuilder {
            config,
            disk: None,
            http: None,
            keychain: None,
            local_resolver: None,
            dispatcher: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn downloader(&self) -> &RemoteDownloader {
        &self.downloader
    }

    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    pub fn assets(&self) -> &AssetsManager {
        &self.assets
    }

    pub fn asset_loaders(&self) -> &Arc<AssetLoaderManager> {
        self.assets.loaders()
    }

    /// Opens the store file `name`, scoped to `session`, with the
    /// persistence settings from the configuration.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open_store(&self, name: &str, session: Option<UserSession>) -> Result<PersistentStore> {
        let options = StoreOptions {
            max_weight: self.config.persistence.max_weight,
            debounce: self.config.debounce(),
            batch_writes_disabled: self.config.persistence.batch_writes_disabled,
        };
        PersistentStore::new(name, Arc::clone(&self.stores), session, self.keychain.clone(), options)
            .map_err(|err| err.raise(ErrorKind::Store(name.to_string())))
    }
}
