//! Secure key storage collaborator.
//!
//! Platforms provide their own secure storage; the cache only needs to keep
//! one secret (the disk encryption key) in it.

use crate::error::Result;
use bytes::Bytes;

/// Store for small secrets that must survive restarts.
pub trait Keychain: Send + Sync {
    fn store(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` when no value is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Returns `false` when there was nothing to erase.
    fn erase(&self, key: &str) -> Result<bool>;
}

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryKeychain;

#[cfg(any(test, feature = "mock"))]
mod memory {
    use super::Keychain;
    use crate::error::{ErrorKind, Result};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// In-memory keychain for testing.
    ///
    /// Every successful mutation bumps [`update_sequence`](Self::update_sequence),
    /// so tests can tell whether a key was (re)generated.
    #[derive(Default)]
    pub struct MemoryKeychain {
        values: Mutex<HashMap<String, Bytes>>,
        update_sequence: AtomicU64,
    }

    impl MemoryKeychain {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn update_sequence(&self) -> u64 {
            self.update_sequence.load(Ordering::SeqCst)
        }

        fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
            self.values.lock().map_err(|_| ErrorKind::Keychain("keychain lock poisoned".to_string()).into())
        }
    }

    impl Keychain for MemoryKeychain {
        fn store(&self, key: &str, value: &[u8]) -> Result<()> {
            self.values()?.insert(key.to_string(), Bytes::copy_from_slice(value));
            self.update_sequence.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<Bytes>> {
            Ok(self.values()?.get(key).cloned())
        }

        fn erase(&self, key: &str) -> Result<bool> {
            let erased = self.values()?.remove(key).is_some();
            if erased {
                self.update_sequence.fetch_add(1, Ordering::SeqCst);
            }
            Ok(erased)
        }
    }

}
