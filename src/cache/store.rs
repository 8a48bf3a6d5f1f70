//! In-memory TTL cache with an optional durable mirror
//!
//! Values are held as JSON so one store can serve every resource type.
//! No operation returns an error: a miss is the only failure signal, and
//! mirror I/O problems are logged and swallowed.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::cache::CacheTtl;
use crate::cache::entry::{CacheEntry, PersistedEntry};
use crate::cache::key::{durable_key, logical_key};
use crate::cache::storage::DurableStore;
use crate::clock::{self, SharedClock};

/// Default entry bound
pub const DEFAULT_MAX_SIZE: usize = 100;

static SHARED: Lazy<Arc<CacheStore>> = Lazy::new(|| Arc::new(CacheStore::new()));

/// TTL-keyed cache store
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry<serde_json::Value>>>,
    max_size: usize,
    default_ttl: Duration,
    persist_keys: RwLock<HashSet<String>>,
    durable: Option<Arc<dyn DurableStore>>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// In-memory store with default bound and TTL, no durable mirror
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CacheStoreBuilder {
        CacheStoreBuilder::default()
    }

    /// Process-wide default instance.
    ///
    /// Components take an `Arc<CacheStore>` explicitly; this is only a
    /// convenience for callers that want one store per process.
    pub fn shared() -> Arc<CacheStore> {
        SHARED.clone()
    }

    /// Return the stored value if present and valid.
    ///
    /// An expired entry is removed as a side effect. A value that cannot be
    /// decoded as `T` is reported as a miss and left in place.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Cached value for {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Raw JSON variant of [`get`](Self::get)
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let mut entries = self.entries();

        let valid = match entries.get(key) {
            Some(entry) => entry.is_valid(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if valid {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entries.get(key).map(|entry| entry.value.clone());
        }

        entries.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache entry expired: {}", key);
        None
    }

    /// Store `value` with the default TTL
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite `key`; `stored_at` is now.
    pub fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize value for {}: {}", key, e);
                return;
            }
        };

        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let record = self.is_persistent(key).then(|| PersistedEntry::from_entry(&entry));

        {
            let mut entries = self.entries();
            if entries.len() >= self.max_size && !entries.contains_key(key) {
                self.make_room(&mut entries);
            }
            entries.insert(key.to_string(), entry);
        }

        if let Some(record) = record {
            self.mirror(key, &record);
        }
    }

    /// Remove `key` from memory and the durable mirror. Absent keys are fine.
    pub fn invalidate(&self, key: &str) {
        self.entries().remove(key);
        self.unmirror(key);
    }

    /// Remove every key matching `pattern`; returns how many in-memory entries went.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|key, _| !pattern.is_match(key));
            before - entries.len()
        };

        if let Some(durable) = &self.durable {
            match durable.keys() {
                Ok(keys) => {
                    for key in keys {
                        if logical_key(&key).is_some_and(|logical| pattern.is_match(logical))
                            && let Err(e) = durable.remove(&key)
                        {
                            warn!("Failed to remove mirrored entry {}: {}", key, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to enumerate mirrored entries: {}", e),
            }
        }

        debug!("Invalidated {} entries matching {}", removed, pattern);
        removed
    }

    /// Remove expired entries; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    /// Remove everything, in memory and in the mirror
    pub fn clear(&self) {
        self.entries().clear();

        if let Some(durable) = &self.durable {
            match durable.keys() {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| logical_key(k).is_some()) {
                        if let Err(e) = durable.remove(key) {
                            warn!("Failed to remove mirrored entry {}: {}", key, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to enumerate mirrored entries: {}", e),
            }
        }
    }

    /// Re-hydrate entries from the durable mirror.
    ///
    /// Expired and malformed records are dropped from the mirror; one bad
    /// record never aborts the load. Entries already in memory win.
    pub fn load_from_durable(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let Some(durable) = &self.durable else {
            return report;
        };

        let keys = match durable.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to enumerate mirrored entries: {}", e);
                return report;
            }
        };

        let now = self.clock.now();
        for durable_key in keys {
            let Some(key) = logical_key(&durable_key) else {
                continue;
            };

            let raw = match durable.get(&durable_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to read mirrored entry {}: {}", durable_key, e);
                    continue;
                }
            };

            let Some(entry) = PersistedEntry::parse(&raw).and_then(PersistedEntry::into_entry)
            else {
                debug!("Discarding malformed mirrored entry {}", durable_key);
                report.malformed += 1;
                let _ = durable.remove(&durable_key);
                continue;
            };

            if entry.is_expired(now) {
                report.expired += 1;
                let _ = durable.remove(&durable_key);
                continue;
            }

            let mut entries = self.entries();
            if entries.contains_key(key) {
                continue;
            }
            if entries.len() >= self.max_size {
                self.make_room(&mut entries);
            }
            entries.insert(key.to_string(), entry);
            drop(entries);

            self.mark_persistent(key);
            report.restored += 1;
        }

        debug!(
            "Restored {} entries ({} expired, {} malformed discarded)",
            report.restored, report.expired, report.malformed
        );
        report
    }

    /// Mirror `key` durably from now on
    pub fn mark_persistent(&self, key: &str) {
        if let Ok(mut keys) = self.persist_keys.write() {
            keys.insert(key.to_string());
        }
    }

    pub fn is_persistent(&self, key: &str) -> bool {
        self.durable.is_some()
            && self
                .persist_keys
                .read()
                .map(|keys| keys.contains(key))
                .unwrap_or(false)
    }

    /// Keys currently held in memory, valid or not
    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Aggregate statistics
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries();

        let mut stats = CacheStats {
            total_entries: entries.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            persisted_keys: self.persist_keys.read().map(|k| k.len()).unwrap_or(0),
            ..CacheStats::default()
        };

        for entry in entries.values() {
            if entry.is_valid(now) {
                stats.valid_entries += 1;
                stats.oldest_entry = Some(match stats.oldest_entry {
                    Some(oldest) => oldest.min(entry.stored_at),
                    None => entry.stored_at,
                });
                stats.newest_entry = Some(match stats.newest_entry {
                    Some(newest) => newest.max(entry.stored_at),
                    None => entry.stored_at,
                });
            } else {
                stats.expired_entries += 1;
            }
        }

        stats
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<serde_json::Value>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sweep expired entries; if still full, drop the one closest to expiry.
    fn make_room(&self, entries: &mut HashMap<String, CacheEntry<serde_json::Value>>) {
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        let mut evicted = before - entries.len();

        while entries.len() >= self.max_size {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at())
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            debug!("Cache full, evicting {}", victim);
            entries.remove(&victim);
            evicted += 1;
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    fn mirror(&self, key: &str, record: &PersistedEntry) {
        let Some(durable) = &self.durable else {
            return;
        };

        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode mirrored entry {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = durable.set(&durable_key(key), &raw) {
            warn!("Failed to mirror cache entry {}: {}", key, e);
        }
    }

    fn unmirror(&self, key: &str) {
        if let Some(durable) = &self.durable
            && let Err(e) = durable.remove(&durable_key(key))
        {
            warn!("Failed to remove mirrored entry {}: {}", key, e);
        }
    }
}

/// Builder for [`CacheStore`]
pub struct CacheStoreBuilder {
    max_size: usize,
    default_ttl: Duration,
    persist_keys: HashSet<String>,
    durable: Option<Arc<dyn DurableStore>>,
    clock: Option<SharedClock>,
}

impl Default for CacheStoreBuilder {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: CacheTtl::DEFAULT,
            persist_keys: HashSet::new(),
            durable: None,
            clock: None,
        }
    }
}

impl CacheStoreBuilder {
    /// Entry bound; values below one are raised to one
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn persist_key(mut self, key: impl Into<String>) -> Self {
        self.persist_keys.insert(key.into());
        self
    }

    pub fn persist_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persist_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> CacheStore {
        CacheStore {
            entries: Mutex::new(HashMap::new()),
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            persist_keys: RwLock::new(self.persist_keys),
            durable: self.durable,
            clock: self.clock.unwrap_or_else(clock::system),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

/// Outcome of [`CacheStore::load_from_durable`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub restored: usize,
    pub expired: usize,
    pub malformed: usize,
}

/// Statistics about cache state
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub persisted_keys: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}
