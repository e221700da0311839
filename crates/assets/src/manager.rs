use crate::bytes_store::{AssetBytesStore, BytesEntry};
use crate::error::{Error, ErrorKind};
use crate::key::{AssetKey, AssetLocation, LoadSpecs};
use crate::loader::LoadUpdates;
use crate::loader_manager::AssetLoaderManager;
use crate::observer::{AssetLoadObserverHandle, InlineDispatcher, LoadOutcome, NotificationDispatcher};
use crate::resolve::{LocalAssetResolver, Resolver};
use crate::state::{AssetSnapshot, Consumer, ManagedAsset, Resolution, SharedLoad};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use trove_module::ModuleManager;

type PendingNotification = (AssetKey, AssetLoadObserverHandle, LoadOutcome);

#[derive(Default)]
struct State {
    assets: HashMap<AssetKey, ManagedAsset>,
    scheduled: Vec<AssetKey>,
    pause_count: usize,
    next_id: u64,
}

impl State {
    fn schedule(&mut self, key: &AssetKey) {
        if !self.scheduled.contains(key) {
            self.scheduled.push(key.clone());
        }
    }
}

struct Inner {
    state: Mutex<State>,
    loaders: Arc<AssetLoaderManager>,
    resolver: Arc<Resolver>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    runtime: Handle,
    bytes: Arc<AssetBytesStore>,
    this: Weak<Inner>,
}

pub struct AssetsManagerBuilder {
    loaders: Arc<AssetLoaderManager>,
    resolver: Resolver,
    dispatcher: Arc<dyn NotificationDispatcher>,
    runtime: Option<Handle>,
}

impl AssetsManagerBuilder {
    /// Bundle keys of modules with a registered manifest resolve through the
    /// module's downloadable resources.
    pub fn module_manager(mut self, modules: Arc<ModuleManager>) -> Self {
        self.resolver.modules = Some(modules);
        self
    }

    pub fn local_resolver(mut self, local: Arc<dyn LocalAssetResolver>) -> Self {
        self.resolver.local = Some(local);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Registers the loader serving [`AssetsManager::create_asset_with_bytes`]
    /// assets with the loader manager.
    ///
    /// # Panics
    ///
    /// Panics when no runtime was given and this is called outside a tokio
    /// runtime.
    pub fn build(self) -> AssetsManager {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let bytes = Arc::new(AssetBytesStore::default());
        self.loaders.register_asset_loader(bytes.clone());
        let inner = Arc::new_cyclic(|this| Inner {
            state: Mutex::new(State::default()),
            loaders: self.loaders,
            resolver: Arc::new(self.resolver),
            dispatcher: self.dispatcher,
            runtime,
            bytes,
            this: this.clone(),
        });
        AssetsManager { inner }
    }
}

/// Tracks every asset with attached observers: resolves its location, shares
/// loads between consumers asking for the same thing, and tells observers
/// about results.
///
/// Every mutation schedules the asset for an update. Updates run straight
/// away unless paused with [`AssetsManager::begin_pause_updates`], in which
/// case they are collected and applied together once the last pause ends.
/// Observers are always called after the internal lock is released.
#[derive(Clone)]
pub struct AssetsManager {
    inner: Arc<Inner>,
}

impl AssetsManager {
    pub fn builder(loaders: Arc<AssetLoaderManager>) -> AssetsManagerBuilder {
        AssetsManagerBuilder {
            loaders,
            resolver: Resolver::default(),
            dispatcher: Arc::new(InlineDispatcher),
            runtime: None,
        }
    }

    pub fn loaders(&self) -> &Arc<AssetLoaderManager> {
        &self.inner.loaders
    }

    pub fn get_asset(&self, key: AssetKey) -> Asset {
        Asset {
            key,
            manager: Arc::downgrade(&self.inner),
            bytes: None,
        }
    }

    /// Creates an asset whose content is `bytes`. It needs no resolving and
    /// loads through the `bytes` scheme: directly as bytes, or through an
    /// [`AssetLoaderFactory`](crate::AssetLoaderFactory) for other output
    /// types.
    ///
    /// The content is kept for as long as the returned handle or one of its
    /// clones is alive.
    pub fn create_asset_with_bytes(&self, bytes: Bytes) -> Asset {
        let entry = self.inner.bytes.insert(bytes);
        Asset {
            key: AssetKey::Bytes(entry.id),
            manager: Arc::downgrade(&self.inner),
            bytes: Some(Arc::new(entry)),
        }
    }

    /// Attaches an observer, or updates its specs when already attached.
    pub fn add_asset_load_observer(&self, key: &AssetKey, observer: AssetLoadObserverHandle, specs: LoadSpecs) {
        self.inner.add_observer(key, observer, specs);
    }

    pub fn remove_asset_load_observer(&self, key: &AssetKey, observer: &AssetLoadObserverHandle) {
        self.inner.remove_observer(key, observer);
    }

    pub fn update_asset_load_observer_specs(&self, key: &AssetKey, observer: &AssetLoadObserverHandle, specs: LoadSpecs) {
        self.inner.update_specs(key, observer, specs);
    }

    pub fn get_resolved_asset_location(&self, key: &AssetKey) -> Option<AssetLocation> {
        self.inner.resolved_location(key)
    }

    /// Overrides where an asset loads from. Any resolve in flight is
    /// abandoned and attached consumers load again from the new location.
    pub fn set_resolved_asset_location(&self, key: &AssetKey, location: AssetLocation) {
        self.inner.set_resolved_location(key, location);
    }

    pub fn begin_pause_updates(&self) {
        self.inner.lock().pause_count += 1;
    }

    pub fn end_pause_updates(&self) {
        {
            let mut state = self.inner.lock();
            state.pause_count = state.pause_count.saturating_sub(1);
        }
        self.inner.perform_updates();
    }

    /// Applies scheduled updates now, unless paused.
    pub fn flush_updates(&self) {
        self.inner.perform_updates();
    }

    pub fn snapshot(&self, key: &AssetKey) -> Option<AssetSnapshot> {
        self.inner.lock().assets.get(key).map(ManagedAsset::snapshot)
    }
}

/// Handle on one asset of an [`AssetsManager`]. Does nothing once the
/// manager is gone.
#[derive(Clone)]
pub struct Asset {
    key: AssetKey,
    manager: Weak<Inner>,
    /// Content of assets created from bytes.
    bytes: Option<Arc<BytesEntry>>,
}

impl Asset {
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    pub fn add_load_observer(&self, observer: AssetLoadObserverHandle, specs: LoadSpecs) {
        if let Some(inner) = self.manager.upgrade() {
            inner.add_observer(&self.key, observer, specs);
        }
    }

    pub fn remove_load_observer(&self, observer: &AssetLoadObserverHandle) {
        if let Some(inner) = self.manager.upgrade() {
            inner.remove_observer(&self.key, observer);
        }
    }

    pub fn update_load_observer_specs(&self, observer: &AssetLoadObserverHandle, specs: LoadSpecs) {
        if let Some(inner) = self.manager.upgrade() {
            inner.update_specs(&self.key, observer, specs);
        }
    }

    pub fn resolved_location(&self) -> Option<AssetLocation> {
        self.manager.upgrade().and_then(|inner| inner.resolved_location(&self.key))
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_observer(&self, key: &AssetKey, observer: AssetLoadObserverHandle, specs: LoadSpecs) {
        {
            let mut state = self.lock();
            let asset = state.assets.entry(key.clone()).or_insert_with(ManagedAsset::new);
            match asset.consumers.iter().position(|consumer| consumer.is(&observer)) {
                Some(index) if asset.consumers[index].specs != specs => {
                    asset.consumers[index].specs = specs;
                    asset.consumers[index].reset();
                },
                Some(_) => {},
                None => asset.consumers.push(Consumer::new(observer, specs)),
            }
            state.schedule(key);
        }
        self.perform_updates();
    }

    fn remove_observer(&self, key: &AssetKey, observer: &AssetLoadObserverHandle) {
        {
            let mut state = self.lock();
            let Some(asset) = state.assets.get_mut(key) else {
                return;
            };
            asset.consumers.retain(|consumer| !consumer.is(observer));
            state.schedule(key);
        }
        self.perform_updates();
    }

    fn update_specs(&self, key: &AssetKey, observer: &AssetLoadObserverHandle, specs: LoadSpecs) {
        {
            let mut state = self.lock();
            let Some(consumer) = state
                .assets
                .get_mut(key)
                .and_then(|asset| asset.consumers.iter_mut().find(|consumer| consumer.is(observer)))
            else {
                return;
            };
            if consumer.specs == specs {
                return;
            }
            consumer.specs = specs;
            consumer.reset();
            state.schedule(key);
        }
        self.perform_updates();
    }

    fn resolved_location(&self, key: &AssetKey) -> Option<AssetLocation> {
        match &self.lock().assets.get(key)?.resolution {
            Resolution::Ready(location) => Some(location.clone()),
            _ => None,
        }
    }

    fn set_resolved_location(&self, key: &AssetKey, location: AssetLocation) {
        {
            let mut state = self.lock();
            let asset = state.assets.entry(key.clone()).or_insert_with(ManagedAsset::new);
            asset.cancel_resolve();
            asset.cancel_loads();
            asset.resolution = Resolution::Ready(location);
            asset.consumers.iter_mut().for_each(Consumer::reset);
            state.schedule(key);
        }
        self.perform_updates();
    }

    fn perform_updates(&self) {
        let notifications = {
            let mut state = self.lock();
            if state.pause_count > 0 {
                return;
            }
            let mut notifications = Vec::new();
            for key in std::mem::take(&mut state.scheduled) {
                self.update_asset(&mut state, &key, &mut notifications);
            }
            notifications
        };
        for (key, observer, outcome) in notifications {
            self.dispatcher.dispatch(Box::new(move || observer.on_load(&key, outcome)));
        }
    }

    fn update_asset(&self, state: &mut State, key: &AssetKey, notifications: &mut Vec<PendingNotification>) {
        let State { assets, next_id, .. } = state;
        let Some(asset) = assets.get_mut(key) else {
            return;
        };

        if asset.consumers.is_empty() {
            asset.cancel_loads();
            let keep = matches!(key, AssetKey::Bundle { .. })
                && matches!(asset.resolution, Resolution::Ready(_) | Resolution::Failed { .. });
            if !keep {
                asset.cancel_resolve();
                tracing::debug!(key = %key, "asset no longer observed");
                assets.remove(key);
            }
            return;
        }

        let retry = matches!(asset.resolution, Resolution::Failed { retryable: true, .. })
            && asset.consumers.iter().any(Consumer::is_initial);
        if matches!(asset.resolution, Resolution::Pending) || retry {
            asset.resolution = self.start_resolve(key, next_id);
        }

        match &asset.resolution {
            Resolution::Ready(location) => {
                for consumer in asset.consumers.iter_mut().filter(|consumer| consumer.is_initial()) {
                    let shared = asset
                        .loads
                        .iter()
                        .find(|(_, load)| load.can_serve(&consumer.specs, location))
                        .map(|(id, _)| *id);
                    let id = match shared {
                        Some(id) => id,
                        None => {
                            *next_id += 1;
                            let load = self.start_load(key, *next_id, location, &consumer.specs);
                            asset.loads.insert(*next_id, load);
                            *next_id
                        },
                    };
                    consumer.load = Some(id);
                }
            },
            Resolution::Failed { error, .. } => {
                for consumer in asset.consumers.iter_mut().filter(|consumer| consumer.is_initial()) {
                    consumer.failure = Some(error.clone());
                }
            },
            Resolution::Pending | Resolution::Resolving { .. } => {},
        }

        asset.collect_loads();

        for consumer in asset.consumers.iter_mut().filter(|consumer| !consumer.notified) {
            if let Some(outcome) = consumer.outcome(&asset.loads) {
                consumer.notified = true;
                notifications.push((key.clone(), consumer.observer.clone(), outcome));
            }
        }
    }

    fn start_resolve(&self, key: &AssetKey, next_id: &mut u64) -> Resolution {
        if let Some(location) = key.direct_location() {
            return Resolution::Ready(location);
        }
        *next_id += 1;
        let id = *next_id;
        let this = self.this.clone();
        let resolver = Arc::clone(&self.resolver);
        let key = key.clone();
        let task = self.runtime.spawn(async move {
            let result = resolver.resolve(&key).await;
            if let Some(inner) = this.upgrade() {
                inner.on_resolved(&key, id, result);
            }
        });
        Resolution::Resolving {
            id,
            task: task.abort_handle(),
        }
    }

    fn on_resolved(&self, key: &AssetKey, id: u64, result: Result<AssetLocation, Error>) {
        {
            let mut state = self.lock();
            let Some(asset) = state.assets.get_mut(key) else {
                return;
            };
            if !matches!(asset.resolution, Resolution::Resolving { id: current, .. } if current == id) {
                return;
            }
            asset.resolution = match result {
                Ok(location) => {
                    tracing::debug!(key = %key, location = %location, "asset location resolved");
                    Resolution::Ready(location)
                },
                Err(err) => {
                    let retryable = err.is_retryable();
                    tracing::warn!(key = %key, retryable, "could not resolve asset location: {err:?}");
                    let error = Arc::new(err);
                    // Consumers waiting on this resolve fail now; only later ones retry.
                    for consumer in asset.consumers.iter_mut().filter(|consumer| consumer.is_initial()) {
                        consumer.failure = Some(error.clone());
                    }
                    Resolution::Failed { error, retryable }
                },
            };
            state.schedule(key);
        }
        self.perform_updates();
    }

    fn start_load(&self, key: &AssetKey, id: u64, location: &AssetLocation, specs: &LoadSpecs) -> SharedLoad {
        let mut load = SharedLoad {
            specs: specs.clone(),
            location: location.clone(),
            outcome: None,
            task: None,
        };
        let Some(loader) = self.loaders.resolve_asset_loader(location.scheme(), specs.output_type) else {
            let error: Error = ErrorKind::NoLoader(format!("{} as {}", location.scheme(), specs.output_type)).into();
            load.outcome = Some(Err(Arc::new(error)));
            return load;
        };
        let this = self.this.clone();
        let key = key.clone();
        let location = location.clone();
        let specs = specs.clone();
        let (updates, mut published) = LoadUpdates::channel();
        let task = self.runtime.spawn(async move {
            let outcome = loader.load_with_updates(&location, &specs, updates).await.map_err(Arc::new);
            let mut next = Some(outcome);
            // Runs until the loader drops its updates handle or the load is cancelled.
            while let Some(outcome) = next {
                let Some(inner) = this.upgrade() else {
                    return;
                };
                inner.on_load_complete(&key, id, outcome);
                drop(inner);
                next = published.recv().await;
            }
        });
        load.task = Some(task.abort_handle());
        load
    }

    fn on_load_complete(&self, key: &AssetKey, id: u64, outcome: LoadOutcome) {
        {
            let mut state = self.lock();
            let Some(asset) = state.assets.get_mut(key) else {
                return;
            };
            let Some(load) = asset.loads.get_mut(&id) else {
                return;
            };
            if let Err(err) = &outcome {
                tracing::warn!(key = %key, url = %load.location.url, "asset load failed: {err:?}");
            }
            let replaced = load.outcome.replace(outcome).is_some();
            if replaced {
                tracing::debug!(key = %key, url = %load.location.url, "asset load published a newer result");
            }
            for consumer in asset.consumers.iter_mut().filter(|consumer| consumer.load == Some(id)) {
                consumer.notified = false;
            }
            state.schedule(key);
        }
        self.perform_updates();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for asset in state.assets.values_mut() {
            asset.cancel_resolve();
            asset.cancel_loads();
        }
    }
}
