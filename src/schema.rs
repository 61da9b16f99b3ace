//! Table setup for queues and key-value stores.
//!
//! Every queue and store lives in its own table inside the shared database.
//! All DDL is create-if-not-exists, so any number of processes may run it
//! concurrently against the same file.

use crate::error::{Error, Result};
use crate::storage::Session;

const MAX_NAME_LEN: usize = 64;

/// A validated SQL table name.
///
/// Names are interpolated into statements (SQLite cannot bind identifiers),
/// so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        // sqlite_ is reserved for internal tables.
        let reserved = name.to_ascii_lowercase().starts_with("sqlite_");

        if !valid_start || !valid_rest || reserved || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for use in SQL text.
    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    fn index(&self, suffix: &str) -> String {
        format!("\"idx_{}_{suffix}\"", self.0)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Create the backing table and indexes for a work queue.
///
/// `(state, item_id)` serves the oldest-queued claim; `(state, updated_at)`
/// serves age-based purge.
pub(crate) fn ensure_queue_table(session: &Session, table: &TableName) -> Result<()> {
    let t = table.quoted();
    let ddl = format!(
        "
        CREATE TABLE IF NOT EXISTS {t} (
            item_id     INTEGER PRIMARY KEY AUTOINCREMENT,
            data        TEXT NOT NULL,
            state       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS {state_id} ON {t}(state, item_id);
        CREATE INDEX IF NOT EXISTS {state_updated} ON {t}(state, updated_at);
        ",
        state_id = table.index("state_id"),
        state_updated = table.index("state_updated"),
    );
    apply(session, table, &ddl)
}

/// Create the backing table for a key-value store.
pub(crate) fn ensure_kv_table(session: &Session, table: &TableName) -> Result<()> {
    let ddl = format!(
        "
        CREATE TABLE IF NOT EXISTS {} (
            key     TEXT PRIMARY KEY NOT NULL,
            value   BLOB NOT NULL
        );
        ",
        table.quoted()
    );
    apply(session, table, &ddl)
}

fn apply(session: &Session, table: &TableName, ddl: &str) -> Result<()> {
    session
        .with_transaction(|tx| {
            tx.execute_batch(ddl)?;
            Ok(())
        })
        .map_err(|e| match e {
            Error::StorageUnavailable(source) => Error::Schema {
                table: table.to_string(),
                source,
            },
            other => other,
        })?;
    tracing::info!(table = %table, "ensured table schema");
    Ok(())
}
