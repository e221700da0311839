//! In-memory cache of loaded items.
//!
//! Recently used items are held strongly. Once an item has not been accessed
//! for `ttl` it is demoted to a weak handle: it keeps being served for as long
//! as some consumer still owns the value, and is purged once nobody does.

use crate::handler::AnyValue;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

enum Handle {
    Strong(AnyValue),
    Weak(Weak<dyn Any + Send + Sync>),
}

struct CachedItem {
    handle: Handle,
    digest: Option<String>,
    last_access: Instant,
}

pub(crate) struct ItemCache {
    items: HashMap<String, CachedItem>,
    ttl: Duration,
}

impl ItemCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: HashMap::new(),
            ttl,
        }
    }

    /// Live value for `url`, promoting it back to a strong handle.
    ///
    /// An item whose digest is unknown or differs from `expected_hash` is a miss.
    pub fn get(&mut self, url: &str, expected_hash: Option<&str>, now: Instant) -> Option<AnyValue> {
        let item = self.items.get_mut(url)?;
        if let Some(expected) = expected_hash
            && !item.digest.as_deref().is_some_and(|digest| digest.eq_ignore_ascii_case(expected))
        {
            return None;
        }
        let upgraded = match &item.handle {
            Handle::Strong(value) => Some(value.clone()),
            Handle::Weak(weak) => weak.upgrade(),
        };
        let Some(value) = upgraded else {
            self.items.remove(url);
            return None;
        };
        item.handle = Handle::Strong(value.clone());
        item.last_access = now;
        Some(value)
    }

    pub fn insert(&mut self, url: &str, value: AnyValue, digest: Option<String>, now: Instant) {
        self.items.insert(
            url.to_string(),
            CachedItem {
                handle: Handle::Strong(value),
                digest,
                last_access: now,
            },
        );
    }

    pub fn remove(&mut self, url: &str) -> bool {
        self.items.remove(url).is_some()
    }

    /// Demote stale items and purge the ones nobody holds any more.
    pub fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.items.retain(|_, item| {
            if let Handle::Strong(value) = &item.handle
                && now.saturating_duration_since(item.last_access) >= ttl
            {
                item.handle = Handle::Weak(Arc::downgrade(value));
            }
            match &item.handle {
                Handle::Strong(_) => true,
                Handle::Weak(weak) => weak.strong_count() > 0,
            }
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}
