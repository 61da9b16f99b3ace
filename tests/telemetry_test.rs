//! Integration tests for telemetry initialization and span helpers.

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = sqliteworks::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "sqliteworks-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    if let Ok(guard) = sqliteworks::telemetry::init_telemetry(config) {
        // No OTLP pipelines to flush.
        guard.force_flush();
    }
}

#[test]
fn queue_span_creates_and_records_transition() {
    let span = sqliteworks::telemetry::queue::start_queue_span("emails", "mark_item");
    sqliteworks::telemetry::queue::record_item_id(&span, 7);
    sqliteworks::telemetry::queue::record_state_transition(&span, "IN_PROGRESS", "COMPLETED");
}

#[test]
fn metrics_without_provider_are_no_ops() {
    use opentelemetry::KeyValue;

    sqliteworks::telemetry::metrics::items_pushed().add(1, &[KeyValue::new("queue", "q")]);
    sqliteworks::telemetry::metrics::operation_duration_ms()
        .record(1.5, &[KeyValue::new("operation", "test")]);
}
