use crate::error::SharedError;
use crate::key::AssetKey;
use crate::loader::LoadedAssetHandle;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type LoadOutcome = std::result::Result<LoadedAssetHandle, SharedError>;

/// Receives the result of loading an asset. Called again whenever the result
/// changes, for example after the asset location is overridden.
pub trait AssetLoadObserver: Send + Sync {
    fn on_load(&self, key: &AssetKey, outcome: LoadOutcome);
}

pub type AssetLoadObserverHandle = Arc<dyn AssetLoadObserver>;

pub type Notification = Box<dyn FnOnce() + Send>;

/// Decides where observer callbacks run. They are always handed over after
/// the assets manager has released its lock.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Runs callbacks on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl NotificationDispatcher for InlineDispatcher {
    fn dispatch(&self, notification: Notification) {
        notification();
    }
}

/// Runs callbacks one after another, in dispatch order, on a single task of
/// a tokio runtime.
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    queue: mpsc::UnboundedSender<Notification>,
}

impl QueueDispatcher {
    /// Spawn the queue's task on `handle`. The task exits once every clone of
    /// the dispatcher is dropped.
    pub fn new(handle: &tokio::runtime::Handle) -> Self {
        let (queue, mut receiver) = mpsc::unbounded_channel::<Notification>();
        handle.spawn(async move {
            while let Some(notification) = receiver.recv().await {
                notification();
            }
        });
        Self { queue }
    }

    /// Dispatch onto the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(&tokio::runtime::Handle::current())
    }
}

impl NotificationDispatcher for QueueDispatcher {
    fn dispatch(&self, notification: Notification) {
        if self.queue.send(notification).is_err() {
            tracing::warn!("Notification queue is gone, dropping observer callback");
        }
    }
}
