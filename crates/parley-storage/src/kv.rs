//! Durable client-side key-value stores.
//!
//! `KeyValueStore` is the seam between the conversation store and whatever
//! scoped, string-keyed storage the client has. `SqliteStore` persists to the
//! local database, `MemoryStore` keeps everything in process.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use parley_core::error::ParleyError;

use crate::db::Database;

/// String-keyed, string-valued storage.
///
/// Writes are last-write-wins per key; there is no merge.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), ParleyError>;

    /// Remove `key`. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, ParleyError>;

    /// All keys starting with `prefix`, in ascending key order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError>;
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Process-local store, used for tests and `storage.backend = "memory"`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, ParleyError> {
        self.entries
            .lock()
            .map_err(|e| ParleyError::Storage(format!("memory store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ParleyError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, ParleyError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// =============================================================================
// SqliteStore
// =============================================================================

/// Key-value store backed by the `kv_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| ParleyError::Storage(format!("Failed to read key {}: {}", key, e)))
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ParleyError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to write key {}: {}", key, e)))?;
            Ok(())
        })
    }

    async fn remove(&self, key: &str) -> Result<bool, ParleyError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM kv_entries WHERE key = ?1",
                    rusqlite::params![key],
                )
                .map_err(|e| {
                    ParleyError::Storage(format!("Failed to remove key {}: {}", key, e))
                })?;
            Ok(removed > 0)
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, ParleyError> {
        let prefix_len = prefix.chars().count() as i64;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key FROM kv_entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key ASC",
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![prefix, prefix_len], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ParleyError::Storage(e.to_string()))
        })
    }
}
