//! Persistent key-value store.
//!
//! A two-column table per store: unique text key, JSON-encoded value blob.
//! `set` replaces the whole value; there is no versioning and no expiry.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::KeyValue;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::schema::{TableName, ensure_kv_table};
use crate::storage::Session;
use crate::telemetry::metrics;

/// A named key-value store bound to a shared session.
pub struct KvStore<V = serde_json::Value> {
    session: Session,
    table: TableName,
    initialized: AtomicBool,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for KvStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("table", &self.table)
            .field("session", &self.session)
            .finish()
    }
}

impl<V> KvStore<V> {
    /// Bind a store to `session`. Call [`KvStore::init`] before use.
    pub fn new(name: impl Into<String>, session: &Session) -> Result<Self> {
        Ok(Self {
            session: session.clone(),
            table: TableName::new(name)?,
            initialized: AtomicBool::new(false),
            _value: PhantomData,
        })
    }

    /// Name of the backing table.
    pub fn name(&self) -> &str {
        self.table.as_str()
    }

    /// Create the backing table if missing. Idempotent.
    pub fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        ensure_kv_table(&self.session, &self.table)?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Every key in the store, in no particular order.
    pub fn keys(&self) -> Result<HashSet<String>> {
        let sql = format!("SELECT key FROM {}", self.table.quoted());
        self.session.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<HashSet<String>, _>>()?;
            Ok(keys)
        })
    }

    /// Number of entries.
    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.quoted());
        let count: i64 = self
            .session
            .with_connection(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))?;
        Ok(count as u64)
    }

    /// Same as [`KvStore::count`].
    pub fn len(&self) -> Result<u64> {
        self.count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE key = ?1)",
            self.table.quoted()
        );
        self.session
            .with_connection(|conn| Ok(conn.query_row(&sql, params![key], |row| row.get(0))?))
    }

    /// Remove `key`. Returns whether an entry was removed; deleting an absent
    /// key is a no-op that returns `false`.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table.quoted());
        let removed = self
            .session
            .with_transaction(|tx| Ok(tx.execute(&sql, params![key])?))?;
        self.record("delete");
        tracing::debug!(store = %self.table, key, removed, "deleted key");
        Ok(removed > 0)
    }

    fn record(&self, operation: &'static str) {
        metrics::kv_operations().add(
            1,
            &[
                KeyValue::new("store", self.table.to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

impl<V: Serialize + DeserializeOwned> KvStore<V> {
    /// Value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?1", self.table.quoted());
        let blob: Option<Vec<u8>> = self.session.with_connection(|conn| {
            Ok(conn
                .query_row(&sql, params![key], |row| row.get(0))
                .optional()?)
        })?;
        self.record("get");
        blob.map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Insert or fully replace the value under `key`.
    pub fn set(&self, key: &str, value: &V) -> Result<()> {
        let blob = serde_json::to_vec(value)?;
        let sql = format!(
            "INSERT INTO {} (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            self.table.quoted()
        );
        self.session.with_transaction(|tx| {
            tx.execute(&sql, params![key, blob])?;
            Ok(())
        })?;
        self.record("set");
        tracing::debug!(store = %self.table, key, "set key");
        Ok(())
    }

    /// Every entry, in no particular order.
    pub fn items(&self) -> Result<Vec<(String, V)>> {
        let sql = format!("SELECT key, value FROM {}", self.table.quoted());
        let rows: Vec<(String, Vec<u8>)> = self.session.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter()
            .map(|(key, bytes)| -> Result<(String, V)> {
                Ok((key, serde_json::from_slice(&bytes)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Limits {
        max_jobs: u32,
        tags: Vec<String>,
    }

    #[test]
    fn typed_values_round_trip() {
        let session = Session::in_memory().unwrap();
        let store: KvStore<Limits> = KvStore::new("limits", &session).unwrap();
        store.init().unwrap();

        let limits = Limits {
            max_jobs: 8,
            tags: vec!["nightly".into()],
        };
        store.set("worker-a", &limits).unwrap();

        assert_eq!(store.get("worker-a").unwrap(), Some(limits));
        assert_eq!(store.get("worker-b").unwrap(), None);
    }

    #[test]
    fn value_of_the_wrong_shape_is_a_serialization_error() {
        let session = Session::in_memory().unwrap();
        let loose: KvStore = KvStore::new("shared", &session).unwrap();
        let strict: KvStore<Limits> = KvStore::new("shared", &session).unwrap();
        loose.init().unwrap();

        loose.set("k", &serde_json::json!("not limits")).unwrap();

        let err = strict.get("k").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)), "got {err:?}");
    }

    #[test]
    fn invalid_name_is_rejected() {
        let session = Session::in_memory().unwrap();
        let err = KvStore::<serde_json::Value>::new("drop table", &session).unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }
}
