//! Envelope processing span helpers.
//!
//! Provides span creation and state-transition recording for envelopes
//! flowing through a worker.

use tracing::Span;

use crate::model::{CorrelationId, EnvelopeState};

/// Start a span covering one envelope from dequeue to terminal state.
///
/// `work.state` and `work.retry_count` are declared empty and filled in as
/// processing advances.
pub fn start_envelope_span(queue: &str, id: &CorrelationId) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.queue" = queue,
        "work.correlation_id" = %id,
        "work.state" = tracing::field::Empty,
        "work.retry_count" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: EnvelopeState, to: EnvelopeState) {
    span.record("work.state", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}

/// Record the retry counter of the attempt about to run.
pub fn record_retry_count(span: &Span, retry_count: u32) {
    span.record("work.retry_count", retry_count);
}
