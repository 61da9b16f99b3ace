//! Queue operation span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! moving through a queue table.

use tracing::Span;

/// Start a span for one queue operation.
///
/// The `queue.item_id` field is declared empty and filled once the item
/// the operation touches is known.
pub fn start_queue_span(queue: &str, operation: &'static str) -> Span {
    tracing::debug_span!(
        "queue.operation",
        "queue.name" = queue,
        "queue.operation" = operation,
        "queue.item_id" = tracing::field::Empty,
    )
}

/// Record the item an operation acted on.
pub fn record_item_id(span: &Span, item_id: i64) {
    span.record("queue.item_id", item_id);
}

/// Record a state transition event on the given span.
///
/// Emits a tracing `debug` event scoped to the span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
