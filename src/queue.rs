//! Durable work queue.
//!
//! One table per queue. Items are pushed as `QUEUED`, claimed one at a time
//! into `IN_PROGRESS`, moved to a terminal state by whoever holds them, and
//! eventually purged. Every write runs in its own immediate transaction, so a
//! claim is a single atomic select-and-update: two workers can never both
//! receive the same item, whether they share a `Session` or open the file
//! from separate processes.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::TimeDelta;
use opentelemetry::KeyValue;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::{
    MarkOutcome, State, WorkItemId, WorkQueueItem, format_timestamp, now, parse_timestamp,
};
use crate::schema::{TableName, ensure_queue_table};
use crate::storage::Session;
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_item_id, record_state_transition, start_queue_span};

const COLUMNS: &str = "item_id, data, state, created_at, updated_at";

/// A named work queue bound to a shared session.
///
/// `T` is the payload type; it is stored as JSON and never inspected.
pub struct WorkQueue<T = serde_json::Value> {
    session: Session,
    table: TableName,
    initialized: AtomicBool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("table", &self.table)
            .field("session", &self.session)
            .finish()
    }
}

impl<T> WorkQueue<T> {
    /// Bind a queue to `session`. Call [`WorkQueue::init`] before use.
    pub fn new(name: impl Into<String>, session: &Session) -> Result<Self> {
        Ok(Self {
            session: session.clone(),
            table: TableName::new(name)?,
            initialized: AtomicBool::new(false),
            _payload: PhantomData,
        })
    }

    /// Name of the backing table.
    pub fn name(&self) -> &str {
        self.table.as_str()
    }

    /// Create the backing table and indexes if missing. Idempotent, and safe
    /// to race against other processes doing the same.
    pub fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        ensure_queue_table(&self.session, &self.table)?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn labels(&self) -> [KeyValue; 1] {
        [KeyValue::new("queue", self.table.to_string())]
    }
}

impl<T: Serialize + DeserializeOwned> WorkQueue<T> {
    /// Insert a new `QUEUED` item and return it with its assigned id.
    pub fn push(&self, data: T) -> Result<WorkQueueItem<T>> {
        let span = start_queue_span(self.name(), "push");
        let payload = serde_json::to_string(&data)?;
        let now = now();
        let stamp = format_timestamp(now);

        let sql = format!(
            "INSERT INTO {} (data, state, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            self.table.quoted()
        );
        let item_id = self.session.with_transaction(|tx| {
            tx.execute(&sql, params![payload, State::Queued.as_str(), stamp])?;
            Ok(tx.last_insert_rowid())
        })?;

        record_item_id(&span, item_id);
        metrics::items_pushed().add(1, &self.labels());
        tracing::debug!(queue = %self.table, item_id, "pushed work item");

        Ok(WorkQueueItem {
            item_id: WorkItemId(item_id),
            data,
            state: State::Queued,
            created_at: now,
            updated_at: now,
        })
    }

    /// Claim the oldest `QUEUED` item, moving it to `IN_PROGRESS`.
    ///
    /// Returns `None` when nothing is queued. Under contention each item goes
    /// to exactly one caller; losers see the next item or `None`.
    pub fn pop_queued(&self) -> Result<Option<WorkQueueItem<T>>> {
        let span = start_queue_span(self.name(), "pop_queued");
        let started = Instant::now();
        let t = self.table.quoted();

        // The subselect and the guarded UPDATE run as one statement inside a
        // write-locked transaction; `state = ?3` is re-checked on the row.
        let sql = format!(
            "UPDATE {t} SET state = ?1, updated_at = ?2
             WHERE item_id = (
                 SELECT item_id FROM {t} WHERE state = ?3
                 ORDER BY created_at ASC, item_id ASC LIMIT 1
             )
             AND state = ?3
             RETURNING {COLUMNS}"
        );
        let stamp = format_timestamp(now());
        let row = self.session.with_transaction(|tx| {
            Ok(tx
                .query_row(
                    &sql,
                    params![State::InProgress.as_str(), stamp, State::Queued.as_str()],
                    ItemRow::from_row,
                )
                .optional()?)
        })?;

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "queue.pop_queued")],
        );

        let Some(row) = row else {
            metrics::claims().add(
                1,
                &[
                    KeyValue::new("queue", self.table.to_string()),
                    KeyValue::new("result", "empty"),
                ],
            );
            return Ok(None);
        };

        let item: WorkQueueItem<T> = row.try_into_item()?;
        record_item_id(&span, item.item_id.0);
        record_state_transition(&span, State::Queued.as_str(), State::InProgress.as_str());
        metrics::claims().add(
            1,
            &[
                KeyValue::new("queue", self.table.to_string()),
                KeyValue::new("result", "claimed"),
            ],
        );
        tracing::debug!(queue = %self.table, item_id = %item.item_id, "claimed work item");
        Ok(Some(item))
    }

    /// Get a work item by id. `None` if it never existed or was purged.
    pub fn get_item_by_id(&self, item_id: WorkItemId) -> Result<Option<WorkQueueItem<T>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE item_id = ?1",
            self.table.quoted()
        );
        let row = self.session.with_connection(|conn| {
            Ok(conn
                .query_row(&sql, params![item_id.0], ItemRow::from_row)
                .optional()?)
        })?;
        row.map(ItemRow::try_into_item).transpose()
    }

    /// Move `item` to `new_state`, provided its stored state is still the
    /// one the caller observed (`item.state`).
    ///
    /// Transitions the state machine forbids fail with
    /// [`Error::InvalidTransition`] without touching storage. Otherwise the
    /// write is a compare-and-swap: if another caller moved the item first,
    /// nothing is written and [`MarkOutcome::Stale`] reports the current
    /// state. A missing id yields [`MarkOutcome::NotFound`].
    pub fn mark_item(&self, item: &WorkQueueItem<T>, new_state: State) -> Result<MarkOutcome<T>> {
        let from = item.state;
        if !from.can_transition_to(new_state) {
            return Err(Error::InvalidTransition {
                from,
                to: new_state,
            });
        }

        let span = start_queue_span(self.name(), "mark_item");
        record_item_id(&span, item.item_id.0);
        let t = self.table.quoted();
        let update = format!(
            "UPDATE {t} SET state = ?1, updated_at = ?2
             WHERE item_id = ?3 AND state = ?4
             RETURNING {COLUMNS}"
        );
        let lookup = format!("SELECT state FROM {t} WHERE item_id = ?1");
        let stamp = format_timestamp(now());

        let outcome: MarkOutcome<T> = self.session.with_transaction(|tx| {
            let updated = tx
                .query_row(
                    &update,
                    params![new_state.as_str(), stamp, item.item_id.0, from.as_str()],
                    ItemRow::from_row,
                )
                .optional()?;
            if let Some(row) = updated {
                return Ok(MarkOutcome::Marked(row.try_into_item()?));
            }

            let current: Option<String> = tx
                .query_row(&lookup, params![item.item_id.0], |row| row.get(0))
                .optional()?;
            match current {
                None => Ok(MarkOutcome::NotFound),
                Some(state) => Ok(MarkOutcome::Stale {
                    current: state.parse()?,
                }),
            }
        })?;

        let result = match &outcome {
            MarkOutcome::Marked(_) => {
                record_state_transition(&span, from.as_str(), new_state.as_str());
                "marked"
            }
            MarkOutcome::NotFound => "not_found",
            MarkOutcome::Stale { current } => {
                tracing::warn!(
                    queue = %self.table,
                    item_id = %item.item_id,
                    expected = %from,
                    current = %current,
                    "mark_item lost a race; stored state changed"
                );
                "stale"
            }
        };
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("queue", self.table.to_string()),
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", new_state.as_str()),
                KeyValue::new("result", result),
            ],
        );

        Ok(outcome)
    }

    /// Delete terminal items last updated at least `seconds_old` seconds ago.
    /// Returns the number of rows deleted.
    ///
    /// Zero or negative `seconds_old` purges every terminal item. Items that
    /// are `QUEUED` or `IN_PROGRESS` are never deleted.
    pub fn purge_old_items(&self, seconds_old: i64) -> Result<u64> {
        let started = Instant::now();
        let terminal = terminal_states_sql();
        let t = self.table.quoted();

        let deleted: usize = if seconds_old <= 0 {
            let sql = format!("DELETE FROM {t} WHERE state IN ({terminal})");
            self.session
                .with_transaction(|tx| Ok(tx.execute(&sql, [])?))?
        } else {
            // An age past the representable range means nothing is that old.
            let Some(cutoff) =
                TimeDelta::try_seconds(seconds_old).and_then(|age| now().checked_sub_signed(age))
            else {
                return Ok(0);
            };
            let sql =
                format!("DELETE FROM {t} WHERE state IN ({terminal}) AND updated_at <= ?1");
            let cutoff = format_timestamp(cutoff);
            self.session
                .with_transaction(|tx| Ok(tx.execute(&sql, params![cutoff])?))?
        };
        let deleted = deleted as u64;

        metrics::items_purged().add(deleted, &self.labels());
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "queue.purge_old_items")],
        );
        tracing::info!(queue = %self.table, seconds_old, deleted, "purged old work items");
        Ok(deleted)
    }

    /// Number of items currently in `state`.
    pub fn count_by_state(&self, state: State) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE state = ?1",
            self.table.quoted()
        );
        let count: i64 = self.session.with_connection(|conn| {
            Ok(conn.query_row(&sql, params![state.as_str()], |row| row.get(0))?)
        })?;
        Ok(count as u64)
    }

    /// Up to `limit` items in `state`, oldest first.
    pub fn list_by_state(&self, state: State, limit: usize) -> Result<Vec<WorkQueueItem<T>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE state = ?1
             ORDER BY created_at ASC, item_id ASC LIMIT ?2",
            self.table.quoted()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.session.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![state.as_str(), limit], ItemRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(ItemRow::try_into_item).collect()
    }
}

fn terminal_states_sql() -> String {
    State::ALL
        .into_iter()
        .filter(|s| s.is_terminal())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw column values, decoded outside the row callback so payload and state
/// errors surface as crate errors rather than rusqlite ones.
struct ItemRow {
    item_id: i64,
    data: String,
    state: String,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_id: row.get(0)?,
            data: row.get(1)?,
            state: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn try_into_item<T: DeserializeOwned>(self) -> Result<WorkQueueItem<T>> {
        Ok(WorkQueueItem {
            item_id: WorkItemId(self.item_id),
            data: serde_json::from_str(&self.data)?,
            state: self.state.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
