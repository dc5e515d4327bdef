//! Core data model.
//!
//! An envelope is a correlation-identified payload moving through a queue.
//! An outcome is what one handler invocation made of it.

pub mod dead_letter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Correlation ID
// ---------------------------------------------------------------------------

/// Newtype for envelope correlation IDs. Assigned by the queue at push time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit moved through the transport.
///
/// Wire form: `{"payloadId": "<uuid>", "payload": <T as JSON>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkEnvelope<T> {
    #[serde(rename = "payloadId")]
    pub correlation_id: CorrelationId,
    pub payload: T,
}

impl<T> WorkEnvelope<T> {
    /// Wrap a payload under a fresh correlation ID.
    pub fn new(payload: T) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// How a handler failure should be treated by the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// May succeed on a later attempt. Retried up to the configured limit.
    Transient,
    /// Deterministic for this payload. Dead-lettered without retry.
    Persistent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Persistent => "persistent",
        };
        write!(f, "{s}")
    }
}

/// A classified handler failure. Serialized as the dead-letter error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured context from the handler (status codes, upstream bodies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            detail: None,
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Persistent,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one handler invocation.
///
/// Handlers build it with [`Outcome::success`] or a failure constructor; the
/// engine stamps `correlation_id`, `retry_count` and `last_attempt_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T> {
    pub is_success: bool,
    pub correlation_id: Option<CorrelationId>,
    /// Present only on success.
    pub response_data: Option<T>,
    /// Retries performed before the attempt that produced this outcome.
    /// 0 for the initial attempt.
    pub retry_count: u32,
    pub last_attempt_time: Option<DateTime<Utc>>,
    /// Present only on failure.
    pub error: Option<HandlerError>,
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self {
            is_success: true,
            correlation_id: None,
            response_data: None,
            retry_count: 0,
            last_attempt_time: None,
            error: None,
        }
    }
}

impl<T> Outcome<T> {
    pub fn success(data: T) -> Self {
        Self {
            response_data: Some(data),
            ..Self::default()
        }
    }

    pub fn failure(error: HandlerError) -> Self {
        Self {
            is_success: false,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::failure(HandlerError::transient(message))
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self::failure(HandlerError::persistent(message))
    }

    /// Failure classification, `None` on success.
    ///
    /// A failure without an attached error counts as transient.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.is_success {
            return None;
        }
        Some(self.error.as_ref().map_or(ErrorKind::Transient, |e| e.kind))
    }

    /// Convert the response data, keeping every other field.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            is_success: self.is_success,
            correlation_id: self.correlation_id,
            response_data: self.response_data.map(f),
            retry_count: self.retry_count,
            last_attempt_time: self.last_attempt_time,
            error: self.error,
        }
    }

    pub(crate) fn stamp(&mut self, id: CorrelationId, retry_count: u32, at: DateTime<Utc>) {
        self.correlation_id = Some(id);
        self.retry_count = retry_count;
        self.last_attempt_time = Some(at);
    }
}

// ---------------------------------------------------------------------------
// Processing state
// ---------------------------------------------------------------------------

/// Where an envelope is in a worker's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Idle,
    Dequeued,
    Executing,
    Succeeded,
    FailedTransient,
    FailedPersistent,
    /// Transient failures used up the retry budget.
    Exhausted,
    /// Shutdown interrupted processing; pushed back to the queue.
    Requeued,
}

impl EnvelopeState {
    /// Is this a terminal state for the envelope?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvelopeState::Succeeded
                | EnvelopeState::FailedPersistent
                | EnvelopeState::Exhausted
                | EnvelopeState::Requeued
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeState::Idle => "idle",
            EnvelopeState::Dequeued => "dequeued",
            EnvelopeState::Executing => "executing",
            EnvelopeState::Succeeded => "succeeded",
            EnvelopeState::FailedTransient => "failed_transient",
            EnvelopeState::FailedPersistent => "failed_persistent",
            EnvelopeState::Exhausted => "exhausted",
            EnvelopeState::Requeued => "requeued",
        }
    }
}

impl std::fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
