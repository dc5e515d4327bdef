//! Worker pool: one worker task per queue type, one shutdown signal.

use crate::config::QueueSettings;
use crate::dead_letter::DeadLetterSink;
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::queue::Queue;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::worker::Worker;

/// Spawns and supervises the workers of a process.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Queue,
    registry: Arc<HandlerRegistry>,
    sink: Arc<dyn DeadLetterSink>,
    settings: QueueSettings,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Queue,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn DeadLetterSink>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            queue,
            registry,
            sink,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Signal every worker in the pool to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the worker for one queue type, wired to the pool's shutdown.
    pub fn worker(&self, type_name: &str) -> Worker {
        Worker::new(
            type_name,
            self.queue.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.settings.clone(),
        )
        .with_cancellation(self.cancel.child_token())
    }

    /// Validate routing, then run one worker per queue type until shutdown.
    ///
    /// Fails before spawning anything if a type has neither a handler nor a
    /// deferral. If any worker stops with an error the whole pool is shut
    /// down and the first error is returned.
    pub async fn run(&self, queue_types: &[String]) -> Result<()> {
        self.registry.validate(queue_types)?;
        for deferred in queue_types.iter().filter(|t| !self.registry.contains(t)) {
            warn!(queue = %deferred, "queue type deferred, its worker will skip polls");
        }

        let mut tasks = JoinSet::new();
        for type_name in queue_types {
            let worker = self.worker(type_name);
            tasks.spawn(async move { worker.run().await });
        }
        info!(workers = queue_types.len(), "worker pool started");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| Error::Other(format!("worker task failed: {e}")))
                .and_then(|r| r);
            if let Err(e) = result {
                error!(error = %e, "worker stopped with an error, shutting down pool");
                self.cancel.cancel();
                first_error.get_or_insert(e);
            }
        }

        info!("worker pool stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
