//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::{DEFAULT_BUSY_TIMEOUT, JournalMode, SessionConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Like [`Config::from_env`], but an explicit database path (e.g. from a
    /// command-line flag) takes precedence over `SQLITEWORKS_DB_PATH`.
    pub fn load(db_path: Option<PathBuf>) -> Result<Self> {
        let busy_timeout = match std::env::var("SQLITEWORKS_BUSY_TIMEOUT_MS") {
            Ok(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                Error::Config(format!(
                    "SQLITEWORKS_BUSY_TIMEOUT_MS must be a whole number of milliseconds, got {raw:?}"
                ))
            })?),
            Err(_) => DEFAULT_BUSY_TIMEOUT,
        };
        let journal_mode = match std::env::var("SQLITEWORKS_JOURNAL_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => JournalMode::default(),
        };

        Ok(Self {
            db_path: match db_path {
                Some(path) => path,
                None => PathBuf::from(required_var("SQLITEWORKS_DB_PATH")?),
            },
            busy_timeout,
            journal_mode,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            busy_timeout: self.busy_timeout,
            journal_mode: self.journal_mode,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}
