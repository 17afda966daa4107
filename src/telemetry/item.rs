//! Per-item span helpers.

use tracing::Span;

/// Start the span an item's action runs in.
///
/// `item.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_item_span(executor: &str, key: &str) -> Span {
    tracing::info_span!(
        "item.process",
        "orderq.executor" = executor,
        "orderq.key" = key,
        "item.outcome" = tracing::field::Empty,
    )
}

/// Record how an item's action ended, on the span and as an event in it.
pub fn record_outcome(span: &Span, outcome: &str, duration_ms: f64) {
    span.record("item.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, duration_ms, "item finished");
    });
}
