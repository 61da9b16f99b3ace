//! Metric instrument factories for sqliteworks.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"sqliteworks"` meter. With no
//! provider installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for sqliteworks instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("sqliteworks")
}

/// Counter: number of work items pushed.
/// Labels: `queue`.
pub fn items_pushed() -> Counter<u64> {
    meter()
        .u64_counter("sqliteworks.queue.pushed")
        .with_description("Number of work items pushed")
        .build()
}

/// Counter: claim attempts.
/// Labels: `queue`, `result` ("claimed" | "empty").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("sqliteworks.queue.claims")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: work item state transitions requested through `mark_item`.
/// Labels: `queue`, `from`, `to`, `result` ("marked" | "stale" | "not_found").
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("sqliteworks.queue.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: terminal items deleted by purge.
/// Labels: `queue`.
pub fn items_purged() -> Counter<u64> {
    meter()
        .u64_counter("sqliteworks.queue.purged")
        .with_description("Number of terminal work items purged")
        .build()
}

/// Counter: key-value store operations.
/// Labels: `store`, `operation` ("get" | "set" | "delete").
pub fn kv_operations() -> Counter<u64> {
    meter()
        .u64_counter("sqliteworks.kv.operations")
        .with_description("Number of key-value store operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("sqliteworks.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
