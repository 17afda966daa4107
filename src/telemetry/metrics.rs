//! Metric instruments for orderq.
//!
//! Instruments come from the `"orderq"` meter on the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("orderq")
}

/// Counter: items offered to `submit`.
/// Labels: `executor`, `result` ("accepted" | "refused" | "error").
pub fn items_submitted() -> Counter<u64> {
    meter()
        .u64_counter("orderq.items.submitted")
        .with_description("Number of items offered to the executor")
        .build()
}

/// Counter: items handed to the worker pool by the scheduling loop.
/// Labels: `executor`.
pub fn items_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("orderq.items.dispatched")
        .with_description("Number of items dispatched to the worker pool")
        .build()
}

/// Counter: items whose action finished.
/// Labels: `executor`, `result` ("ok" | "error").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("orderq.items.processed")
        .with_description("Number of items whose action finished")
        .build()
}

/// Counter: dispatch attempts refused by a saturated or closed pool.
/// Labels: `executor`.
pub fn dispatch_rejected() -> Counter<u64> {
    meter()
        .u64_counter("orderq.dispatch.rejected")
        .with_description("Dispatch attempts the worker pool refused")
        .build()
}

/// Histogram: action duration in milliseconds.
/// Labels: `executor`.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("orderq.item.duration_ms")
        .with_description("Action duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Instruments bound to one executor's name.
#[derive(Clone)]
pub struct ExecutorMetrics {
    executor: KeyValue,
    submitted: Counter<u64>,
    dispatched: Counter<u64>,
    processed: Counter<u64>,
    rejected: Counter<u64>,
    duration: Histogram<f64>,
}

impl ExecutorMetrics {
    pub fn new(executor: &str) -> Self {
        Self {
            executor: KeyValue::new("executor", executor.to_string()),
            submitted: items_submitted(),
            dispatched: items_dispatched(),
            processed: items_processed(),
            rejected: dispatch_rejected(),
            duration: item_duration_ms(),
        }
    }

    pub fn submitted(&self, result: &'static str) {
        self.submitted
            .add(1, &[self.executor.clone(), KeyValue::new("result", result)]);
    }

    pub fn dispatched(&self) {
        self.dispatched.add(1, &[self.executor.clone()]);
    }

    pub fn rejected(&self) {
        self.rejected.add(1, &[self.executor.clone()]);
    }

    pub fn processed(&self, ok: bool, duration_ms: f64) {
        let result = if ok { "ok" } else { "error" };
        self.processed
            .add(1, &[self.executor.clone(), KeyValue::new("result", result)]);
        self.duration.record(duration_ms, &[self.executor.clone()]);
    }
}
