//! SQLite storage session.
//!
//! A `Session` is the one live handle to the database file. Every queue and
//! key-value store opened against it shares the same connection; other
//! processes (or threads with their own `Session`) coordinate with it through
//! SQLite's own locking. WAL mode keeps readers from blocking the writer.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{Error, Result};

/// Default time a statement waits on another connection's lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Write-ahead log (recommended for multi-process access).
    #[default]
    Wal,
    /// Rollback journal.
    Delete,
}

impl JournalMode {
    fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
        }
    }
}

impl FromStr for JournalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            other => Err(Error::Config(format!(
                "unknown journal mode {other:?} (expected \"wal\" or \"delete\")"
            ))),
        }
    }
}

/// Connection-level settings applied when a session is opened.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: JournalMode::default(),
        }
    }
}

/// Shared handle to one SQLite database. Cloning is cheap; clones share the
/// underlying connection.
#[derive(Clone)]
pub struct Session {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("path", &self.path).finish()
    }
}

impl Session {
    /// Open or create a database at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &SessionConfig::default())
    }

    /// Open or create a database at the given path.
    pub fn open_with(path: impl AsRef<Path>, config: &SessionConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        configure(&conn, config)?;
        tracing::debug!(path = %path.display(), "opened storage session");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory database (for testing). Visible only to clones of
    /// this session.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, &SessionConfig::default())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the database file, `None` for in-memory sessions.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // A panic while the lock was held unwound through any open `Transaction`,
    // which rolled it back, so the connection itself is still usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run read-only work directly on the connection.
    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a closure within an immediate (write-locking) transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front, so a
    /// select-then-update inside `f` cannot interleave with another writer.
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn configure(conn: &Connection, config: &SessionConfig) -> Result<()> {
    // Busy timeout first: switching to WAL needs a lock other sessions may hold.
    conn.busy_timeout(config.busy_timeout)?;
    let mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        config.journal_mode.pragma_value(),
        |row| row.get(0),
    )?;
    tracing::trace!(journal_mode = %mode, "configured connection");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_table(session: &Session) {
        session
            .with_connection(|conn| {
                conn.execute_batch("CREATE TABLE scratch (n INTEGER NOT NULL);")?;
                Ok(())
            })
            .unwrap();
    }

    fn row_count(session: &Session) -> i64 {
        session
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))?)
            })
            .unwrap()
    }

    #[test]
    fn transaction_commits_on_ok() {
        let session = Session::in_memory().unwrap();
        scratch_table(&session);

        session
            .with_transaction(|tx| {
                tx.execute("INSERT INTO scratch (n) VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(row_count(&session), 1);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let session = Session::in_memory().unwrap();
        scratch_table(&session);

        let result: Result<()> = session.with_transaction(|tx| {
            tx.execute("INSERT INTO scratch (n) VALUES (1)", [])?;
            Err(Error::Corrupt("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(row_count(&session), 0);
    }

    #[test]
    fn clones_share_the_connection() {
        let session = Session::in_memory().unwrap();
        let other = session.clone();
        scratch_table(&session);

        other
            .with_transaction(|tx| {
                tx.execute("INSERT INTO scratch (n) VALUES (7)", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(row_count(&session), 1);
        assert!(session.path().is_none());
    }

    #[test]
    fn file_session_uses_wal() {
        let dir = tempfile::TempDir::new().unwrap();
        let session = Session::open(dir.path().join("wal.db")).unwrap();

        let mode: String = session
            .with_connection(|conn| {
                Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn rollback_journal_can_be_selected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SessionConfig {
            journal_mode: "DELETE".parse().unwrap(),
            ..SessionConfig::default()
        };
        let session = Session::open_with(dir.path().join("delete.db"), &config).unwrap();

        let mode: String = session
            .with_connection(|conn| {
                Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(mode.to_lowercase(), "delete");
        assert!(!dir.path().join("delete.db-wal").exists());
    }

    #[test]
    fn unknown_journal_mode_is_a_config_error() {
        let err = "memory".parse::<JournalMode>().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }
}
