//! Typed FIFO queues over a shared list store.
//!
//! Every payload type gets its own physical list named
//! `{origin}:{TYPE_NAME}`. Producers push to the tail, the worker pops from
//! the head, so ordering is FIFO per payload type and undefined across types.

pub mod memory;
pub mod redis;

pub use memory::MemoryTransport;
pub use self::redis::RedisTransport;

use crate::config::QueueSettings;
use crate::error::Result;
use crate::model::{CorrelationId, WorkEnvelope};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// A payload that can travel through a [`Queue`].
///
/// `TYPE_NAME` is the explicit registry tag for the type: it names the list
/// the payload lives in and keys the handler that consumes it. Keep it stable
/// across deployments, since producers and workers must agree on it.
pub trait QueuePayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Raw list primitives a transport must provide.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append to the tail. Returns the list length after the push.
    async fn push(&self, list: &str, value: String) -> Result<u64>;

    /// Put back at the head. Returns the list length after the push.
    async fn push_front(&self, list: &str, value: String) -> Result<u64>;

    /// Remove and return the head, without blocking. `None` when empty.
    async fn pop(&self, list: &str) -> Result<Option<String>>;

    /// Current length of the list (0 if it does not exist).
    async fn length(&self, list: &str) -> Result<u64>;

    /// Round-trip a liveness check.
    async fn ping(&self) -> Result<()>;
}

/// Receipt for a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub correlation_id: CorrelationId,
    /// List length reported by the push itself.
    pub queue_length: u64,
}

impl Enqueued {
    /// Was the push observably applied (list non-empty afterwards)?
    pub fn applied(&self) -> bool {
        self.queue_length > 0
    }
}

/// Typed queue facade over a [`QueueTransport`].
#[derive(Clone)]
pub struct Queue {
    transport: Arc<dyn QueueTransport>,
    origin: String,
}

impl Queue {
    pub fn new(transport: Arc<dyn QueueTransport>, origin: impl Into<String>) -> Self {
        Self {
            transport,
            origin: origin.into(),
        }
    }

    pub fn from_settings(transport: Arc<dyn QueueTransport>, settings: &QueueSettings) -> Self {
        Self::new(transport, settings.origin_queue_name.clone())
    }

    /// Physical list name for a payload type.
    pub fn list_name(&self, type_name: &str) -> String {
        format!("{}:{type_name}", self.origin)
    }

    /// Enqueue a payload under a freshly assigned correlation ID.
    pub async fn enqueue<T: QueuePayload>(&self, payload: &T) -> Result<Enqueued> {
        self.enqueue_as(T::TYPE_NAME, payload).await
    }

    /// Enqueue any serializable payload onto the list of `type_name`.
    ///
    /// Used by tooling that handles payloads as raw JSON.
    pub async fn enqueue_as<T: Serialize + ?Sized>(
        &self,
        type_name: &str,
        payload: &T,
    ) -> Result<Enqueued> {
        let envelope = WorkEnvelope::new(payload);
        self.push_envelope(type_name, &envelope, End::Tail).await
    }

    /// Restore a popped envelope to the head of its list, keeping its ID, so
    /// it is the next one served.
    pub async fn requeue(
        &self,
        type_name: &str,
        envelope: &WorkEnvelope<serde_json::Value>,
    ) -> Result<Enqueued> {
        self.push_envelope(type_name, envelope, End::Head).await
    }

    async fn push_envelope<P: Serialize>(
        &self,
        type_name: &str,
        envelope: &WorkEnvelope<P>,
        end: End,
    ) -> Result<Enqueued> {
        let list = self.list_name(type_name);
        let raw = serde_json::to_string(envelope)?;
        let (queue_length, operation) = match end {
            End::Tail => (self.transport.push(&list, raw).await?, "push"),
            End::Head => (self.transport.push_front(&list, raw).await?, "requeue"),
        };

        record_operation(&list, operation);
        metrics::queue_length().record(queue_length, &[KeyValue::new("queue", list.clone())]);
        debug!(
            queue = %list,
            correlation_id = %envelope.correlation_id,
            queue_length,
            operation,
            "envelope pushed"
        );

        Ok(Enqueued {
            correlation_id: envelope.correlation_id,
            queue_length,
        })
    }

    /// Pop the next envelope for `T`. `Ok(None)` means no work available.
    pub async fn dequeue<T: QueuePayload>(&self) -> Result<Option<WorkEnvelope<T>>> {
        let raw = self.pop_raw(T::TYPE_NAME).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Pop the next envelope of `type_name` with its payload left as JSON.
    pub async fn dequeue_value(
        &self,
        type_name: &str,
    ) -> Result<Option<WorkEnvelope<serde_json::Value>>> {
        let raw = self.pop_raw(type_name).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn pop_raw(&self, type_name: &str) -> Result<Option<String>> {
        let list = self.list_name(type_name);
        let raw = self.transport.pop(&list).await?;

        if raw.is_some() {
            record_operation(&list, "pop");
            // The envelope is already off the list: a failed length read only
            // skips the gauge.
            match self.transport.length(&list).await {
                Ok(remaining) => metrics::queue_length()
                    .record(remaining, &[KeyValue::new("queue", list.clone())]),
                Err(e) => {
                    debug!(queue = %list, error = %e, "queue length unavailable after pop")
                }
            }
        } else {
            record_operation(&list, "pop_empty");
        }

        Ok(raw)
    }

    /// Current length of an arbitrary list.
    pub async fn length(&self, list: &str) -> Result<u64> {
        self.transport.length(list).await
    }

    /// Length of the list holding `type_name` payloads.
    pub async fn length_of(&self, type_name: &str) -> Result<u64> {
        self.transport.length(&self.list_name(type_name)).await
    }

    /// Liveness probe. Transport errors are logged and reported as `false`.
    pub async fn ping(&self) -> bool {
        match self.transport.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "queue transport liveness check failed");
                metrics::liveness_failures().add(1, &[]);
                false
            }
        }
    }
}

/// Which end of a list a push lands on.
#[derive(Clone, Copy)]
enum End {
    Tail,
    Head,
}

fn record_operation(list: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", list.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}
