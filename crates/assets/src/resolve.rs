use crate::error::{ErrorKind, Result};
use crate::key::{AssetKey, AssetLocation};
use std::sync::Arc;
use trove_module::ModuleManager;

/// Finds assets bundled with the application itself.
pub trait LocalAssetResolver: Send + Sync {
    fn resolve_local_asset(&self, module: &str, path: &str) -> Option<AssetLocation>;
}

/// Resolves asset keys to locations. Modules with a registered manifest are
/// served from their downloadable resources, everything else from the local
/// resolver.
#[derive(Default)]
pub(crate) struct Resolver {
    pub modules: Option<Arc<ModuleManager>>,
    pub local: Option<Arc<dyn LocalAssetResolver>>,
}

impl Resolver {
    #[tracing::instrument(level = "debug", skip(self, key), fields(key = %key))]
    pub async fn resolve(&self, key: &AssetKey) -> Result<AssetLocation> {
        let (module, path) = match key {
            AssetKey::Bundle { module, path } => (module.as_str(), path.as_str()),
            AssetKey::Url(_) | AssetKey::Bytes(_) => match key.direct_location() {
                Some(location) => return Ok(location),
                None => exn::bail!(ErrorKind::NotFound(key.to_string())),
            },
        };
        if let Some(modules) = &self.modules
            && modules.registered_manifest(module).is_some()
        {
            return resolve_remote(modules, module, path).await;
        }
        match self.local.as_ref().and_then(|local| local.resolve_local_asset(module, path)) {
            Some(location) => Ok(location),
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        }
    }
}

async fn resolve_remote(modules: &ModuleManager, module: &str, path: &str) -> Result<AssetLocation> {
    let loaded = modules.load_resources(module).await.map_err(|err| {
        let reason = format!("resources of {module}");
        let kind = if err.is_retryable() {
            ErrorKind::Network(reason)
        } else {
            ErrorKind::Unresolved(reason)
        };
        err.raise(kind)
    })?;
    match loaded.value.get(path) {
        Some(url) => Ok(AssetLocation::new(url, true)),
        None => exn::bail!(ErrorKind::NotFound(format!("{module}:{path}"))),
    }
}
