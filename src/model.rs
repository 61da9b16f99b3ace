//! Core data model.
//!
//! A work item is an opaque payload plus a lifecycle state. The queue assigns
//! its id and timestamps; callers only ever supply the payload.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work as last read from (or written to) its queue table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueueItem<T> {
    /// Store-assigned, monotonically increasing identifier.
    pub item_id: WorkItemId,

    /// Caller payload. The queue never looks inside.
    pub data: T,

    /// Lifecycle state at the time this copy was read.
    pub state: State,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for work item ids (the table's integer primary key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub i64);

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for WorkItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
///
/// The textual forms are written to disk and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Pushed, waiting to be claimed.
    Queued,
    /// Claimed by exactly one worker.
    InProgress,
    /// Done successfully. Terminal.
    Completed,
    /// Given up on. Terminal.
    Failed,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Queued,
        State::InProgress,
        State::Completed,
        State::Failed,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Queued, InProgress)
                | (Queued, Failed) // cancelled before anyone claimed it
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }

    /// Stable on-disk representation.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Queued => "QUEUED",
            State::InProgress => "IN_PROGRESS",
            State::Completed => "COMPLETED",
            State::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(State::Queued),
            "IN_PROGRESS" => Ok(State::InProgress),
            "COMPLETED" => Ok(State::Completed),
            "FAILED" => Ok(State::Failed),
            _ => Err(Error::Corrupt(format!("unknown state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Mark outcome
// ---------------------------------------------------------------------------

/// What happened when a caller asked to move an item to a new state.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum MarkOutcome<T> {
    /// The stored state matched the caller's copy and was replaced.
    Marked(WorkQueueItem<T>),
    /// No row has that id (never existed, or purged).
    NotFound,
    /// Someone else moved the item since the caller read it. Nothing written.
    Stale { current: State },
}

impl<T> MarkOutcome<T> {
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked(_))
    }

    /// The updated item, if the transition was applied.
    pub fn into_item(self) -> Option<WorkQueueItem<T>> {
        match self {
            MarkOutcome::Marked(item) => Some(item),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text order in SQLite is chronological order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("invalid timestamp {s:?}: {e}")))
}
