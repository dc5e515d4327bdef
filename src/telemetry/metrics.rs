//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: queue-level operations (push, pop, pop_empty, requeue).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("workq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Gauge: list length as reported by the transport right after a push or pop.
/// Labels: `queue`.
///
/// Approximate by nature: concurrent producers and workers move the list
/// between the observation and the export.
pub fn queue_length() -> Gauge<u64> {
    meter()
        .u64_gauge("workq.queue.length")
        .with_description("Observed queue length")
        .build()
}

/// Counter: failed liveness probes against the transport.
pub fn liveness_failures() -> Counter<u64> {
    meter()
        .u64_counter("workq.transport.liveness_failures")
        .with_description("Failed transport liveness probes")
        .build()
}

/// Counter: handler invocations.
/// Labels: `queue`, `result` ("success" | "transient" | "persistent").
pub fn handler_attempts() -> Counter<u64> {
    meter()
        .u64_counter("workq.handler.attempts")
        .with_description("Number of handler invocations")
        .build()
}

/// Counter: retries scheduled after a transient failure.
/// Labels: `queue`.
pub fn retries_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("workq.retries.scheduled")
        .with_description("Retries scheduled after transient failures")
        .build()
}

/// Counter: envelopes written to the dead-letter sink.
/// Labels: `queue`, `reason` ("persistent" | "exhausted").
pub fn dead_letters() -> Counter<u64> {
    meter()
        .u64_counter("workq.dead_letters")
        .with_description("Envelopes dead-lettered")
        .build()
}

/// Histogram: handler invocation duration in milliseconds.
/// Labels: `queue`.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.handler.duration_ms")
        .with_description("Handler invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: polls skipped because no handler is registered for the type.
/// Labels: `queue`.
pub fn work_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.unroutable")
        .with_description("Polls skipped for queue types without a handler")
        .build()
}
