//! Integration tests for telemetry initialization and span helpers.

use orderq::telemetry::item::{record_outcome, start_item_span};
use orderq::telemetry::metrics::ExecutorMetrics;
use orderq::telemetry::{TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returns Err, which is acceptable here.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "orderq-test".to_string(),
    };
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        assert!(guard.force_flush().is_ok());
    }
}

#[test]
fn item_span_records_outcome() {
    let span = start_item_span("test", "key-1");
    record_outcome(&span, "ok", 12.5);
}

#[test]
fn metrics_without_provider_are_noops() {
    let metrics = ExecutorMetrics::new("test");
    metrics.submitted("accepted");
    metrics.dispatched();
    metrics.rejected();
    metrics.processed(false, 3.0);
}
