//! Dead-letter types: the write command and the stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CorrelationId;

/// Why an envelope was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The handler classified the failure as persistent.
    Persistent,
    /// Transient failures exhausted the retry budget.
    Exhausted,
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeadLetterReason::Persistent => "persistent",
            DeadLetterReason::Exhausted => "exhausted",
        };
        write!(f, "{s}")
    }
}

/// The "create log" command sent to the dead-letter store.
///
/// Wire form: `{requestId, queue, errorDetail, request, retryCount, reason}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterCommand {
    pub request_id: CorrelationId,
    /// Payload type name the envelope was popped from. Needed for replay.
    pub queue: String,
    pub error_detail: serde_json::Value,
    /// The original payload, as it travelled on the wire.
    pub request: serde_json::Value,
    pub retry_count: u32,
    pub reason: DeadLetterReason,
}

/// A dead-letter row as stored. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: i64,
    pub request_id: CorrelationId,
    pub queue: String,
    pub request: serde_json::Value,
    pub error_detail: serde_json::Value,
    pub retry_count: u32,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
