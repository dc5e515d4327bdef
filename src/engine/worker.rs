//! Worker loop: probe, dequeue, execute, retry, dead-letter.
//!
//! One worker serves one payload type and takes each envelope to a terminal
//! state before popping the next. Its only suspension points are the pauses
//! (idle poll, liveness backoff, retry backoff, throttle) and the handler
//! call itself, all of which yield to the cancellation token.

use crate::config::QueueSettings;
use crate::dead_letter::DeadLetterSink;
use crate::error::Result;
use crate::handler::{DynHandler, HandlerRegistry};
use crate::model::dead_letter::{DeadLetterCommand, DeadLetterReason};
use crate::model::{CorrelationId, EnvelopeState, ErrorKind, HandlerError, Outcome, WorkEnvelope};
use crate::queue::Queue;
use crate::telemetry::envelope::{record_retry_count, record_state_transition, start_envelope_span};
use crate::telemetry::metrics;
use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::backoff::RetryPolicy;

/// How an envelope left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded { retry_count: u32 },
    DeadLettered { reason: DeadLetterReason, retry_count: u32 },
    /// Shutdown interrupted processing; the envelope is back at the head.
    Requeued { retry_count: u32 },
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The worker was already cancelled; nothing was dequeued.
    Stopped,
    /// Liveness probe failed; nothing was dequeued.
    Unavailable,
    /// No handler for this type; nothing was dequeued.
    Unroutable,
    /// The list was empty.
    Idle,
    Processed {
        correlation_id: CorrelationId,
        disposition: Disposition,
    },
}

/// Consumer loop for one payload type.
pub struct Worker {
    type_name: String,
    queue: Queue,
    registry: Arc<HandlerRegistry>,
    sink: Arc<dyn DeadLetterSink>,
    settings: QueueSettings,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        type_name: impl Into<String>,
        queue: Queue,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn DeadLetterSink>,
        settings: QueueSettings,
    ) -> Self {
        let policy = RetryPolicy::from_settings(&settings);
        Self {
            type_name: type_name.into(),
            queue,
            registry,
            sink,
            settings,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop on the given token instead of a private one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the retry policy derived from the settings.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal the worker to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run until cancelled.
    ///
    /// Transport errors on pop or requeue and dead-letter write failures end
    /// the loop with an error; the host is expected to restart it.
    pub async fn run(&self) -> Result<()> {
        info!(
            queue = %self.type_name,
            list = %self.queue.list_name(&self.type_name),
            max_retry_attempts = self.policy.max_retry_attempts,
            "worker started"
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.poll_once().await? {
                Step::Stopped => break,
                Step::Unavailable => self.settings.liveness_backoff(),
                Step::Unroutable | Step::Idle => self.settings.idle_poll_interval(),
                Step::Processed { .. } => self.settings.throttle_interval(),
            };
            if !self.pause(pause).await {
                break;
            }
        }

        info!(queue = %self.type_name, "worker stopped");
        Ok(())
    }

    /// Run a single iteration: probe, check routing, pop, process.
    pub async fn poll_once(&self) -> Result<Step> {
        if self.cancel.is_cancelled() {
            return Ok(Step::Stopped);
        }

        if !self.queue.ping().await {
            warn!(queue = %self.type_name, "queue transport unavailable, backing off");
            return Ok(Step::Unavailable);
        }

        let Some(handler) = self.registry.get(&self.type_name) else {
            warn!(queue = %self.type_name, "no handler registered, leaving work queued");
            metrics::work_unroutable().add(1, &[KeyValue::new("queue", self.type_name.clone())]);
            return Ok(Step::Unroutable);
        };

        let Some(envelope) = self.queue.dequeue_value(&self.type_name).await? else {
            return Ok(Step::Idle);
        };

        let correlation_id = envelope.correlation_id;
        let span = start_envelope_span(&self.type_name, &correlation_id);
        record_state_transition(&span, EnvelopeState::Idle, EnvelopeState::Dequeued);

        let disposition = self
            .process(handler.as_ref(), &envelope, &span)
            .instrument(span.clone())
            .await?;

        Ok(Step::Processed {
            correlation_id,
            disposition,
        })
    }

    async fn process(
        &self,
        handler: &dyn DynHandler,
        envelope: &WorkEnvelope<serde_json::Value>,
        span: &Span,
    ) -> Result<Disposition> {
        let mut retry_count = 0u32;
        let mut state = EnvelopeState::Dequeued;

        loop {
            record_retry_count(span, retry_count);
            record_state_transition(span, state, EnvelopeState::Executing);

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                outcome = handler.handle_value(&envelope.payload, &self.cancel) => Some(outcome),
            };
            let Some(mut outcome) = outcome else {
                return self
                    .requeue(envelope, span, EnvelopeState::Executing, retry_count)
                    .await;
            };

            let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
            outcome.stamp(envelope.correlation_id, retry_count, Utc::now());
            metrics::handler_duration_ms()
                .record(duration_ms, &[KeyValue::new("queue", self.type_name.clone())]);

            let kind = outcome.error_kind();
            metrics::handler_attempts().add(
                1,
                &[
                    KeyValue::new("queue", self.type_name.clone()),
                    KeyValue::new("result", kind.map_or("success", kind_label)),
                ],
            );

            match kind {
                None => {
                    record_state_transition(span, EnvelopeState::Executing, EnvelopeState::Succeeded);
                    info!(retry_count, duration_ms, "envelope processed");
                    return Ok(Disposition::Succeeded { retry_count });
                }
                Some(ErrorKind::Persistent) => {
                    record_state_transition(
                        span,
                        EnvelopeState::Executing,
                        EnvelopeState::FailedPersistent,
                    );
                    self.dead_letter(envelope, &outcome, DeadLetterReason::Persistent)
                        .await?;
                    return Ok(Disposition::DeadLettered {
                        reason: DeadLetterReason::Persistent,
                        retry_count,
                    });
                }
                Some(ErrorKind::Transient) => {
                    record_state_transition(
                        span,
                        EnvelopeState::Executing,
                        EnvelopeState::FailedTransient,
                    );

                    if !self.policy.allows_retry(retry_count) {
                        record_state_transition(
                            span,
                            EnvelopeState::FailedTransient,
                            EnvelopeState::Exhausted,
                        );
                        self.dead_letter(envelope, &outcome, DeadLetterReason::Exhausted)
                            .await?;
                        return Ok(Disposition::DeadLettered {
                            reason: DeadLetterReason::Exhausted,
                            retry_count,
                        });
                    }

                    retry_count += 1;
                    let delay = self.policy.delay(retry_count);
                    metrics::retries_scheduled()
                        .add(1, &[KeyValue::new("queue", self.type_name.clone())]);
                    warn!(
                        retry_count,
                        max_retry_attempts = self.policy.max_retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_message(&outcome),
                        "transient failure, retrying"
                    );

                    if !self.pause(delay).await {
                        return self
                            .requeue(envelope, span, EnvelopeState::FailedTransient, retry_count)
                            .await;
                    }
                    state = EnvelopeState::FailedTransient;
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        envelope: &WorkEnvelope<serde_json::Value>,
        outcome: &Outcome<serde_json::Value>,
        reason: DeadLetterReason,
    ) -> Result<()> {
        let error = outcome
            .error
            .clone()
            .unwrap_or_else(|| HandlerError::transient("handler reported failure without an error"));

        let command = DeadLetterCommand {
            request_id: envelope.correlation_id,
            queue: self.type_name.clone(),
            error_detail: serde_json::to_value(&error)?,
            request: envelope.payload.clone(),
            retry_count: outcome.retry_count,
            reason,
        };
        self.sink.record_failure(command).await?;

        metrics::dead_letters().add(
            1,
            &[
                KeyValue::new("queue", self.type_name.clone()),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
        error!(
            retry_count = outcome.retry_count,
            %reason,
            error = %error,
            "envelope dead-lettered"
        );
        Ok(())
    }

    /// Put an interrupted envelope back at the head of its list under its
    /// original ID.
    async fn requeue(
        &self,
        envelope: &WorkEnvelope<serde_json::Value>,
        span: &Span,
        from: EnvelopeState,
        retry_count: u32,
    ) -> Result<Disposition> {
        self.queue.requeue(&self.type_name, envelope).await?;
        record_state_transition(span, from, EnvelopeState::Requeued);
        info!(retry_count, "shutdown interrupted processing, envelope requeued");
        Ok(Disposition::Requeued { retry_count })
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.cancel.is_cancelled();
        }
        debug!(queue = %self.type_name, pause_ms = duration.as_millis() as u64, "pausing");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Transient => "transient",
        ErrorKind::Persistent => "persistent",
    }
}

fn error_message(outcome: &Outcome<serde_json::Value>) -> &str {
    outcome
        .error
        .as_ref()
        .map_or("unspecified", |e| e.message.as_str())
}
