//! Error types for sqliteworks.

use thiserror::Error;

use crate::model::State;

#[derive(Debug, Error)]
pub enum Error {
    /// The session could not execute: connection lost, lock timeout, disk error.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    #[error("schema setup failed for table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid table name: {0:?}")]
    InvalidName(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded (unknown state, malformed timestamp).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
