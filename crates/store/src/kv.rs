use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use exn::OptionExt;
use std::collections::HashMap;
use time::UtcDateTime;
use trove_archive::{Archive, ArchiveBuilder};

const MANIFEST_ENTRY: &str = "__manifest__";
const FORMAT_VERSION: u64 = 2;
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 24;

/// One stored value with its bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// Position in the mutation sequence; higher is more recent.
    pub mutation_id: u64,
    /// Expiration in epoch seconds, `0` for never.
    pub expiration: u64,
    pub weight: u64,
    pub data: Bytes,
}

/// In-memory map bounded by total weight and per-entry TTL.
///
/// A `max_weight` of `0` disables weight-based eviction.
#[derive(Debug, Default)]
pub struct KeyValueStore {
    entries: HashMap<String, CacheEntry>,
    max_weight: u64,
    mutation_id: u64,
    current_time_override: Option<u64>,
}

impl KeyValueStore {
    pub fn new(max_weight: u64) -> Self {
        Self { max_weight, ..Default::default() }
    }

    /// Insert or replace `key`, then evict the oldest other entries until the
    /// total weight fits `max_weight` again.
    ///
    /// A `ttl_seconds` of `0` never expires.
    pub fn store(&mut self, key: impl Into<String>, data: Bytes, ttl_seconds: u64, weight: u64) {
        let key = key.into();
        let expiration = match ttl_seconds {
            0 => 0,
            ttl => self.current_time_seconds().saturating_add(ttl),
        };
        self.mutation_id += 1;
        let entry = CacheEntry { mutation_id: self.mutation_id, expiration, weight, data };
        self.entries.insert(key.clone(), entry);
        self.evict(Some(&key));
    }

    /// Value of `key`, unless missing or expired.
    ///
    /// A hit counts as a use: the entry becomes the most recent one and is
    /// the last to be evicted.
    pub fn fetch(&mut self, key: &str) -> Option<Bytes> {
        let now = self.current_time_seconds();
        let entry = self.entries.get_mut(key).filter(|entry| !is_expired(entry, now))?;
        self.mutation_id += 1;
        entry.mutation_id = self.mutation_id;
        Some(entry.data.clone())
    }

    /// Like [`fetch`](Self::fetch) but without touching recency.
    pub fn exists(&self, key: &str) -> bool {
        let now = self.current_time_seconds();
        self.entries.get(key).is_some_and(|entry| !is_expired(entry, now))
    }

    /// Live entries, oldest first.
    pub fn fetch_all(&self) -> Vec<(String, CacheEntry)> {
        let now = self.current_time_seconds();
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| !is_expired(entry, now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.mutation_id);
        entries
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    /// Change the weight limit, evicting immediately if the store no longer fits.
    pub fn set_max_weight(&mut self, max_weight: u64) {
        self.max_weight = max_weight;
        self.evict(None);
    }

    pub fn max_weight(&self) -> u64 {
        self.max_weight
    }

    pub fn total_weight(&self) -> u64 {
        self.entries.values().map(|entry| entry.weight).sum()
    }

    pub fn mutation_id(&self) -> u64 {
        self.mutation_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pin the clock, for tests. `0` goes back to the system clock.
    pub fn set_current_time_seconds(&mut self, seconds: u64) {
        self.current_time_override = (seconds != 0).then_some(seconds);
    }

    fn current_time_seconds(&self) -> u64 {
        self.current_time_override
            .unwrap_or_else(|| u64::try_from(UtcDateTime::now().unix_timestamp()).unwrap_or_default())
    }

    fn evict(&mut self, keep: Option<&str>) {
        if self.max_weight == 0 {
            return;
        }
        let mut total = self.total_weight();
        if total <= self.max_weight {
            return;
        }
        let mut candidates: Vec<(u64, String, u64)> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != keep)
            .map(|(key, entry)| (entry.mutation_id, key.clone(), entry.weight))
            .collect();
        candidates.sort_unstable();
        for (_, key, weight) in candidates {
            if total <= self.max_weight {
                break;
            }
            self.entries.remove(&key);
            total -= weight;
            tracing::trace!(key = %key, weight, "Evicted entry");
        }
    }

    /// Write the whole store as one archive.
    ///
    /// The first entry is a binary manifest (`u64` LE version, mutation
    /// sequence, then `mutation_id`, `expiration`, `weight` per entry) in the
    /// same order as the data entries that follow. Expired entries are
    /// dropped on the way out.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        let now = self.current_time_seconds();
        self.entries.retain(|_, entry| !is_expired(entry, now));
        let entries = self.fetch_all();

        let mut manifest = Vec::with_capacity(HEADER_LEN + ENTRY_LEN * entries.len());
        manifest.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        manifest.extend_from_slice(&self.mutation_id.to_le_bytes());
        for (_, entry) in &entries {
            manifest.extend_from_slice(&entry.mutation_id.to_le_bytes());
            manifest.extend_from_slice(&entry.expiration.to_le_bytes());
            manifest.extend_from_slice(&entry.weight.to_le_bytes());
        }

        let mut builder = ArchiveBuilder::with_capacity(entries.len() + 1);
        builder
            .add_entry(MANIFEST_ENTRY, manifest)
            .map_err(|e| e.raise(ErrorKind::Format("manifest".to_string())))?;
        for (key, entry) in entries {
            builder
                .add_entry(key.clone(), entry.data)
                .map_err(|e| e.raise(ErrorKind::Format(key)))?;
        }
        builder.build().map_err(|e| e.raise(ErrorKind::Format("archive".to_string())))
    }

    /// Replace the contents with a serialized store.
    ///
    /// On failure the store is left empty.
    pub fn populate(&mut self, data: Bytes) -> Result<()> {
        self.entries.clear();
        self.mutation_id = 0;
        if let Err(err) = self.populate_from(data) {
            self.entries.clear();
            self.mutation_id = 0;
            return Err(err);
        }
        self.evict(None);
        Ok(())
    }

    fn populate_from(&mut self, data: Bytes) -> Result<()> {
        let archive = Archive::parse(data).map_err(|e| e.raise(ErrorKind::Format("archive".to_string())))?;
        let mut entries = archive.into_iter();
        let Some(manifest) = entries.next() else {
            exn::bail!(ErrorKind::Format("empty archive".to_string()));
        };
        if manifest.path != MANIFEST_ENTRY {
            exn::bail!(ErrorKind::Format("first entry should be the manifest".to_string()));
        }
        let mut words = manifest.data.chunks_exact(8).map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        });
        let version = words.next().unwrap_or_default();
        if version != FORMAT_VERSION {
            exn::bail!(ErrorKind::IncompatibleVersion(version));
        }
        let sequence = words
            .next()
            .ok_or_raise(|| ErrorKind::Format("manifest header truncated".to_string()))?;
        let expected = HEADER_LEN + ENTRY_LEN * entries.len();
        if manifest.data.len() != expected {
            exn::bail!(ErrorKind::Format(format!(
                "manifest is {} bytes, expected {expected}",
                manifest.data.len()
            )));
        }

        let now = self.current_time_seconds();
        for entry in entries {
            // Length was checked above, so every entry has its three words.
            let (Some(mutation_id), Some(expiration), Some(weight)) = (words.next(), words.next(), words.next())
            else {
                exn::bail!(ErrorKind::Format("manifest truncated".to_string()));
            };
            let cached = CacheEntry { mutation_id, expiration, weight, data: entry.data };
            if !is_expired(&cached, now) {
                self.entries.insert(entry.path, cached);
            }
        }
        self.mutation_id = sequence;
        Ok(())
    }
}

fn is_expired(entry: &CacheEntry, now: u64) -> bool {
    entry.expiration != 0 && now >= entry.expiration
}
