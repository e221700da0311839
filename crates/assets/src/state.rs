use crate::error::SharedError;
use crate::key::{AssetLocation, LoadSpecs};
use crate::loader::same;
use crate::observer::{AssetLoadObserverHandle, LoadOutcome};
use std::collections::{HashMap, HashSet};
use tokio::task::AbortHandle;

/// Where an asset stands in resolving its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    ResolvingLocation,
    Ready(AssetLocation),
    /// Never retried; consumers attaching later fail straight away.
    FailedPermanently,
    /// Retried when a consumer attaches or changes its specs.
    FailedRetryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Initial,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub specs: LoadSpecs,
    pub state: ConsumerState,
    pub notified: bool,
}

/// Point-in-time view of a managed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
    pub state: AssetState,
    pub consumers: Vec<ConsumerSnapshot>,
    /// Loads currently held by the asset, shared or not.
    pub loads: usize,
}

pub(crate) enum Resolution {
    /// Nothing in flight yet.
    Pending,
    Resolving { id: u64, task: AbortHandle },
    Ready(AssetLocation),
    Failed { error: SharedError, retryable: bool },
}

pub(crate) struct Consumer {
    pub observer: AssetLoadObserverHandle,
    pub specs: LoadSpecs,
    pub load: Option<u64>,
    /// Set when the location could not be resolved.
    pub failure: Option<SharedError>,
    pub notified: bool,
}

impl Consumer {
    pub fn new(observer: AssetLoadObserverHandle, specs: LoadSpecs) -> Self {
        Self {
            observer,
            specs,
            load: None,
            failure: None,
            notified: false,
        }
    }

    pub fn is(&self, observer: &AssetLoadObserverHandle) -> bool {
        same(&self.observer, observer)
    }

    pub fn is_initial(&self) -> bool {
        self.load.is_none() && self.failure.is_none()
    }

    pub fn reset(&mut self) {
        self.load = None;
        self.failure = None;
        self.notified = false;
    }

    /// Result the consumer should be told about, if it has one.
    pub fn outcome(&self, loads: &HashMap<u64, SharedLoad>) -> Option<LoadOutcome> {
        if let Some(error) = &self.failure {
            return Some(Err(error.clone()));
        }
        let id = self.load?;
        loads.get(&id)?.outcome.clone()
    }

    pub fn state(&self, loads: &HashMap<u64, SharedLoad>) -> ConsumerState {
        if self.failure.is_some() {
            return ConsumerState::Failed;
        }
        if self.load.is_none() {
            return ConsumerState::Initial;
        }
        match self.outcome(loads) {
            None => ConsumerState::Loading,
            Some(Ok(_)) => ConsumerState::Loaded,
            Some(Err(_)) => ConsumerState::Failed,
        }
    }
}

/// One loader call, shared by every consumer with the same specs.
pub(crate) struct SharedLoad {
    pub specs: LoadSpecs,
    pub location: AssetLocation,
    pub outcome: Option<LoadOutcome>,
    pub task: Option<AbortHandle>,
}

impl SharedLoad {
    pub fn can_serve(&self, specs: &LoadSpecs, location: &AssetLocation) -> bool {
        let retryable_failure = matches!(&self.outcome, Some(Err(err)) if err.is_retryable());
        &self.specs == specs && &self.location == location && !retryable_failure
    }

    pub fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

pub(crate) struct ManagedAsset {
    pub resolution: Resolution,
    pub consumers: Vec<Consumer>,
    pub loads: HashMap<u64, SharedLoad>,
}

impl ManagedAsset {
    pub fn new() -> Self {
        Self {
            resolution: Resolution::Pending,
            consumers: Vec::new(),
            loads: HashMap::new(),
        }
    }

    pub fn cancel_resolve(&mut self) {
        if let Resolution::Resolving { task, .. } = &self.resolution {
            task.abort();
        }
    }

    pub fn cancel_loads(&mut self) {
        for (_, load) in self.loads.drain() {
            load.cancel();
        }
    }

    /// Cancels loads no consumer points at any more.
    pub fn collect_loads(&mut self) {
        let referenced: HashSet<u64> = self.consumers.iter().filter_map(|consumer| consumer.load).collect();
        let unused: Vec<u64> = self.loads.keys().filter(|id| !referenced.contains(id)).copied().collect();
        for id in unused {
            if let Some(load) = self.loads.remove(&id) {
                load.cancel();
            }
        }
    }

    pub fn snapshot(&self) -> AssetSnapshot {
        let state = match &self.resolution {
            Resolution::Pending | Resolution::Resolving { .. } => AssetState::ResolvingLocation,
            Resolution::Ready(location) => AssetState::Ready(location.clone()),
            Resolution::Failed { retryable: true, .. } => AssetState::FailedRetryable,
            Resolution::Failed { retryable: false, .. } => AssetState::FailedPermanently,
        };
        let consumers = self
            .consumers
            .iter()
            .map(|consumer| ConsumerSnapshot {
                specs: consumer.specs.clone(),
                state: consumer.state(&self.loads),
                notified: consumer.notified,
            })
            .collect();
        AssetSnapshot {
            state,
            consumers,
            loads: self.loads.len(),
        }
    }
}
