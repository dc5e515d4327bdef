//! Handler contract and registry.
//!
//! A handler is the pluggable business logic for one payload type. It never
//! sees retries or backoff: it runs once per call and classifies any failure
//! as transient or persistent in the returned [`Outcome`].

use crate::error::{Error, Result};
use crate::model::Outcome;
use crate::queue::QueuePayload;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Business logic for one payload type.
///
/// Classification must depend only on the payload and external state: the
/// same payload against the same world yields the same [`ErrorKind`].
///
/// [`ErrorKind`]: crate::model::ErrorKind
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Request: QueuePayload;
    type Response: Serialize + Send;

    /// Execute once. `cancel` fires on shutdown; long-running handlers should
    /// watch it, although the worker also drops the call when it fires.
    async fn handle(
        &self,
        request: &Self::Request,
        cancel: &CancellationToken,
    ) -> Outcome<Self::Response>;
}

/// A handler with its request and response erased to JSON.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_value(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Outcome<serde_json::Value>;
}

struct Erased<H>(H);

#[async_trait]
impl<H: Handler> DynHandler for Erased<H> {
    async fn handle_value(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Outcome<serde_json::Value> {
        // A payload of the wrong shape fails the same way on every replay.
        let request: H::Request = match serde_json::from_value(payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                return Outcome::persistent(format!(
                    "payload is not a valid {}: {e}",
                    H::Request::TYPE_NAME
                ));
            }
        };

        let Outcome {
            is_success,
            correlation_id,
            response_data,
            retry_count,
            last_attempt_time,
            error,
        } = self.0.handle(&request, cancel).await;

        let response_data = match response_data.map(serde_json::to_value).transpose() {
            Ok(data) => data,
            Err(e) => return Outcome::persistent(format!("response is not serializable: {e}")),
        };

        Outcome {
            is_success,
            correlation_id,
            response_data,
            retry_count,
            last_attempt_time,
            error,
        }
    }
}

/// Handlers indexed by payload type name. Populated once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn DynHandler>>,
    deferred: HashSet<String>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register the handler for `H::Request`. One handler per payload type.
    pub fn register<H: Handler>(&mut self, handler: H) -> Result<&mut Self> {
        let type_name = H::Request::TYPE_NAME;
        if self.handlers.contains_key(type_name) {
            return Err(Error::Config(format!(
                "a handler for {type_name} is already registered"
            )));
        }
        self.handlers.insert(type_name, Arc::new(Erased(handler)));
        Ok(self)
    }

    /// Allow a queue type to run without a handler. Its worker skips polls
    /// with a warning instead of failing startup validation.
    pub fn defer(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.deferred.insert(type_name.into());
        self
    }

    /// Look up the handler for a payload type.
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    pub fn is_deferred(&self, type_name: &str) -> bool {
        self.deferred.contains(type_name)
    }

    /// Registered payload type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Check that every queue type has a handler or was explicitly deferred.
    pub fn validate(&self, queue_types: &[String]) -> Result<()> {
        let missing: Vec<&str> = queue_types
            .iter()
            .map(String::as_str)
            .filter(|t| !self.contains(t) && !self.is_deferred(t))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "no handler registered for queue types: {}",
                missing.join(", ")
            )))
        }
    }
}
