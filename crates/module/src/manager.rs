use crate::error::{ErrorKind, Result};
use crate::handlers::{ModuleHandler, ModuleResources, ResourcesHandler};
use crate::manifest::Manifest;
use exn::OptionExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use trove_archive::Archive;
use trove_download::{DownloadRequest, LoadSource, Loaded, RemoteDownloader};

pub const MODULE_PREFIX: &str = "module-";
pub const RESOURCES_PREFIX: &str = "resources-";

/// Loads modules and their resources from the manifests registered for them.
pub struct ModuleManager {
    downloader: RemoteDownloader,
    device_density: f64,
    manifests: Mutex<HashMap<String, Arc<Manifest>>>,
    module_handler: Arc<ModuleHandler>,
    resources_handler: Arc<ResourcesHandler>,
    empty_resources: Arc<ModuleResources>,
}

impl ModuleManager {
    /// Resources are extracted into the downloader's disk cache.
    pub fn new(downloader: RemoteDownloader, device_density: f64) -> Self {
        let resources_handler = ResourcesHandler::new(Arc::clone(downloader.disk_cache()));
        Self {
            downloader,
            device_density,
            manifests: Mutex::new(HashMap::new()),
            module_handler: Arc::new(ModuleHandler::default()),
            resources_handler: Arc::new(resources_handler),
            empty_resources: Arc::new(ModuleResources::default()),
        }
    }

    fn manifests(&self) -> MutexGuard<'_, HashMap<String, Arc<Manifest>>> {
        self.manifests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_density(&self) -> f64 {
        self.device_density
    }

    /// Replaces any manifest previously registered under `module`.
    pub fn register_manifest(&self, module: impl Into<String>, manifest: Manifest) {
        self.manifests().insert(module.into(), Arc::new(manifest));
    }

    pub fn registered_manifest(&self, module: &str) -> Option<Arc<Manifest>> {
        self.manifests().get(module).cloned()
    }

    fn require_manifest(&self, module: &str) -> Result<Arc<Manifest>> {
        self.registered_manifest(module)
            .ok_or_raise(|| ErrorKind::ManifestNotFound(module.to_string()))
    }

    /// Applies to both modules and resource archives.
    pub fn set_decompression_disabled(&self, disabled: bool) {
        self.module_handler.set_decompression_disabled(disabled);
        self.resources_handler.set_decompression_disabled(disabled);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load_module(&self, module: &str) -> Result<Loaded<Archive>> {
        let manifest = self.require_manifest(module)?;
        let request = DownloadRequest::new(format!("{MODULE_PREFIX}{module}"), manifest.artifact.url.clone())
            .with_expected_hash(manifest.artifact.sha256.clone());
        self.downloader
            .enqueue(request, Arc::clone(&self.module_handler))
            .await
            .map_err(|err| ErrorKind::download(module, &err))
    }

    /// Resources of the asset variant closest to the device density. A
    /// manifest without asset variants has no resources.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load_resources(&self, module: &str) -> Result<Loaded<ModuleResources>> {
        let manifest = self.require_manifest(module)?;
        let Some(asset) = manifest.best_asset(self.device_density) else {
            return Ok(Loaded {
                value: Arc::clone(&self.empty_resources),
                source: LoadSource::Memory,
            });
        };
        let request = DownloadRequest::new(format!("{RESOURCES_PREFIX}{module}"), asset.artifact.url.clone())
            .with_expected_hash(asset.artifact.sha256.clone());
        let loaded = self
            .downloader
            .enqueue(request, Arc::clone(&self.resources_handler))
            .await
            .map_err(|err| ErrorKind::download(module, &err))?;
        tracing::debug!(source = %loaded.source, resources = loaded.value.len(), "Loaded resources");
        Ok(loaded)
    }
}
