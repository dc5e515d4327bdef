//! Dead-letter sink: durable, write-once record of terminal failures.
//!
//! The worker calls [`DeadLetterSink::record_failure`] exactly once per
//! terminal envelope. The Postgres implementation lives on [`crate::db::Db`].

use crate::error::Result;
use crate::model::dead_letter::DeadLetterCommand;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record_failure(&self, command: DeadLetterCommand) -> Result<()>;
}

/// Sink that keeps commands in memory. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemoryDeadLetterSink {
    records: Arc<Mutex<Vec<DeadLetterCommand>>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command recorded so far, oldest first.
    pub async fn records(&self) -> Vec<DeadLetterCommand> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record_failure(&self, command: DeadLetterCommand) -> Result<()> {
        self.records.lock().await.push(command);
        Ok(())
    }
}
