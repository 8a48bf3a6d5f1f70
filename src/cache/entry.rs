//! Cache entries and their durable record format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::elapsed;

/// A stored value with the time it was written and its time-to-live
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    /// Valid while `now - stored_at <= ttl`; the boundary itself is still valid.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.age(now) <= self.ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid(now)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed(now, self.stored_at)
    }

    /// Instant after which the entry stops being valid
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// JSON shape of one mirrored entry: `{ "value", "storedAt", "ttl" }`.
///
/// `storedAt` is epoch milliseconds and `ttl` is milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub value: serde_json::Value,
    pub stored_at: i64,
    pub ttl: u64,
}

impl PersistedEntry {
    pub fn from_entry(entry: &CacheEntry<serde_json::Value>) -> Self {
        Self {
            value: entry.value.clone(),
            stored_at: entry.stored_at.timestamp_millis(),
            ttl: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Parse a raw record; `None` if it is not a well-formed entry.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn into_entry(self) -> Option<CacheEntry<serde_json::Value>> {
        let stored_at = DateTime::from_timestamp_millis(self.stored_at)?;
        Some(CacheEntry::new(
            self.value,
            stored_at,
            Duration::from_millis(self.ttl),
        ))
    }
}
