//! Durable key-value mirror for cache entries
//!
//! The mirror is a side channel: the in-memory store is authoritative and a
//! failing mirror never changes what callers read.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::entry::PersistedEntry;
use crate::cache::key::{DURABLE_NAMESPACE, logical_key};
use crate::error::CacheError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

type Result<T> = std::result::Result<T, CacheError>;

/// String-valued persistent key-value store
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;
}

/// SQLite-backed durable store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the store at the default XDG cache location
    pub fn open() -> Result<Self> {
        let cache_dir = Self::cache_dir()?;
        Self::open_at(&cache_dir)
    }

    /// Get the cache directory path (~/.cache/freshgate on Linux)
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(CacheError::NoHome)?;
        Ok(cache_base.join("freshgate"))
    }

    /// Open the store inside a specific directory
    pub fn open_at(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join("cache.db");
        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Cache schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::nuke(&db_path)?;
            return Self::open_at(cache_dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path,
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove every record
    pub fn clear_all(&self) -> Result<ClearStats> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_entries", [], |r| r.get(0))?;
        conn.execute("DELETE FROM kv_entries", [])?;

        Ok(ClearStats {
            entries_removed: count as usize,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Io("Cache database lock poisoned".to_string()))
    }

    fn nuke(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_file(db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove cache DB: {}", e)))?;
        }
        Ok(())
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv_entries ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

/// In-process durable store.
///
/// Useful where no disk is available, and in tests, where `fail_writes`
/// simulates a full or read-only backing store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| CacheError::Io("Memory store lock poisoned".to_string()))
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Io("Storage quota exceeded".to_string()));
        }
        self.records()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records()?.keys().cloned().collect())
    }
}

/// Statistics about a clear operation
#[derive(Debug)]
pub struct ClearStats {
    pub entries_removed: usize,
}

/// Read-only summary of what the durable mirror holds
#[derive(Debug, Default)]
pub struct DurableStats {
    pub total_records: usize,
    pub valid_records: usize,
    pub expired_records: usize,
    pub malformed_records: usize,
    pub total_size_bytes: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Classify every namespaced record without modifying the store.
pub fn survey(store: &dyn DurableStore, now: DateTime<Utc>) -> Result<DurableStats> {
    let mut stats = DurableStats::default();

    for key in store.keys()? {
        if logical_key(&key).is_none() {
            continue;
        }
        let Some(raw) = store.get(&key)? else {
            continue;
        };

        stats.total_records += 1;
        stats.total_size_bytes += raw.len();

        let Some(entry) = PersistedEntry::parse(&raw).and_then(PersistedEntry::into_entry) else {
            stats.malformed_records += 1;
            continue;
        };

        if entry.is_valid(now) {
            stats.valid_records += 1;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(oldest) => oldest.min(entry.stored_at),
                None => entry.stored_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(newest) => newest.max(entry.stored_at),
                None => entry.stored_at,
            });
        } else {
            stats.expired_records += 1;
        }
    }

    log::debug!(
        "Surveyed {} records under {}",
        stats.total_records,
        DURABLE_NAMESPACE
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::durable_key;
    use tempfile::TempDir;

    fn test_storage() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStore::open_at(dir.path()).unwrap();
        (storage, dir)
    }

    fn record(stored_at: DateTime<Utc>, ttl_ms: u64) -> String {
        format!(
            r#"{{"value": "v", "storedAt": {}, "ttl": {}}}"#,
            stored_at.timestamp_millis(),
            ttl_ms
        )
    }

    #[test]
    fn test_sqlite_set_get_remove() {
        let (storage, _dir) = test_storage();

        storage.set("k1", "hello").unwrap();
        assert_eq!(storage.get("k1").unwrap(), Some("hello".to_string()));

        storage.remove("k1").unwrap();
        assert_eq!(storage.get("k1").unwrap(), None);

        // Removing again is fine
        storage.remove("k1").unwrap();
    }

    #[test]
    fn test_sqlite_overwrite() {
        let (storage, _dir) = test_storage();

        storage.set("k1", "first").unwrap();
        storage.set("k1", "second").unwrap();

        assert_eq!(storage.get("k1").unwrap(), Some("second".to_string()));
        assert_eq!(storage.keys().unwrap(), vec!["k1".to_string()]);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = SqliteStore::open_at(dir.path()).unwrap();
            storage.set("k1", "kept").unwrap();
        }

        let reopened = SqliteStore::open_at(dir.path()).unwrap();
        assert_eq!(reopened.get("k1").unwrap(), Some("kept".to_string()));
    }

    #[test]
    fn test_clear_all() {
        let (storage, _dir) = test_storage();

        storage.set("k1", "d1").unwrap();
        storage.set("k2", "d2").unwrap();

        let stats = storage.clear_all().unwrap();
        assert_eq!(stats.entries_removed, 2);
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes(true);

        assert!(store.set("k", "v").is_err());
        assert!(store.is_empty());

        store.fail_writes(false);
        store.set("k", "v").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_survey_classifies_records() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .set(&durable_key("fresh"), &record(now, 60_000))
            .unwrap();
        store
            .set(
                &durable_key("old"),
                &record(now - chrono::Duration::minutes(5), 1_000),
            )
            .unwrap();
        store.set(&durable_key("broken"), "{not json").unwrap();
        store.set("someone_elses_key", "ignored").unwrap();

        let stats = survey(&store, now).unwrap();

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.valid_records, 1);
        assert_eq!(stats.expired_records, 1);
        assert_eq!(stats.malformed_records, 1);
        assert!(stats.total_size_bytes > 0);
        assert_eq!(
            stats.newest_entry.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }
}
