//! # sqliteworks
//!
//! A durable work queue and key-value store on one embedded SQLite file.
//!
//! Open a [`Session`], then bind any number of named [`WorkQueue`]s and
//! [`KvStore`]s to it. All state lives in the database; every transition is
//! committed atomically, so crashed workers lose nothing but their claims.

pub mod config;
pub mod error;
pub mod kv;
pub mod model;
pub mod queue;
pub mod schema;
pub mod storage;
pub mod telemetry;

pub use error::{Error, Result};
pub use kv::KvStore;
pub use model::{MarkOutcome, State, WorkItemId, WorkQueueItem};
pub use queue::WorkQueue;
pub use storage::{JournalMode, Session, SessionConfig};
