//! Key/value storage for small records.
//!
//! [`KeyValueStore`] is the plain in-memory map: entries carry a weight and
//! an optional expiration, and the oldest entries are evicted once the total
//! weight exceeds the configured maximum. [`PersistentStore`] owns one
//! [`KeyValueStore`] on a dedicated worker task and mirrors it to a disk
//! cache, batching writes.

pub mod error;
mod kv;
mod persistent;
mod session;

pub use crate::kv::{CacheEntry, KeyValueStore};
pub use crate::persistent::{PersistentStore, StoreOptions};
pub use crate::session::UserSession;
