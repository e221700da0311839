//! Asset pipeline.
//!
//! An [`AssetsManager`] resolves each [`AssetKey`] to an [`AssetLocation`],
//! picks an [`AssetLoader`] for the location's scheme and the requested
//! [`OutputType`], and delivers results to [`AssetLoadObserver`]s. Observers
//! asking for the same specs share one load.

mod bytes_loader;
mod bytes_store;
pub mod error;
mod key;
mod loader;
mod loader_manager;
mod manager;
mod observer;
mod resolve;
mod state;

pub use crate::bytes_loader::BytesAssetLoader;
pub use crate::bytes_store::BYTES_SCHEME;
pub use crate::error::{Error, ErrorKind, Result, SharedError};
pub use crate::key::{AssetKey, AssetLocation, LoadSpecs, OutputType};
pub use crate::loader::{
    AssetDownloader, AssetLoader, AssetLoaderFactory, BytesAsset, LoadUpdates, LoadedAsset, LoadedAssetHandle,
};
pub use crate::loader_manager::AssetLoaderManager;
pub use crate::manager::{Asset, AssetsManager, AssetsManagerBuilder};
pub use crate::observer::{
    AssetLoadObserver, AssetLoadObserverHandle, InlineDispatcher, LoadOutcome, Notification, NotificationDispatcher,
    QueueDispatcher,
};
pub use crate::resolve::LocalAssetResolver;
pub use crate::state::{AssetSnapshot, AssetState, ConsumerSnapshot, ConsumerState};
