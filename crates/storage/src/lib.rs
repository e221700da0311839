pub mod cache;
pub mod error;
pub mod keychain;
mod path;

pub use crate::cache::{DiskCache, ENCRYPTION_KEY_NAME, EncryptedDiskCache, LocalDiskCache};
#[cfg(any(test, feature = "mock"))]
pub use crate::cache::MemoryDiskCache;
pub use crate::keychain::Keychain;
#[cfg(any(test, feature = "mock"))]
pub use crate::keychain::MemoryKeychain;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type DiskCacheHandle = Arc<dyn DiskCache>;
pub type KeychainHandle = Arc<dyn Keychain>;
