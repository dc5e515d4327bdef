//! In-process list transport.
//!
//! Lists live in a shared map behind a mutex. Clones share the same lists,
//! so a producer and a worker holding clones see each other's pushes. Useful
//! for tests and for running the pipeline without a Redis server.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::QueueTransport;

#[derive(Clone)]
pub struct MemoryTransport {
    lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    available: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            lists: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    ///
    /// While unavailable every operation, ping included, fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw contents of a list, head first.
    pub async fn snapshot(&self, list: &str) -> Vec<String> {
        let lists = self.lists.lock().await;
        lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable("memory transport is offline".to_string()))
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn push(&self, list: &str, value: String) -> Result<u64> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        let entries = lists.entry(list.to_string()).or_default();
        entries.push_back(value);
        Ok(entries.len() as u64)
    }

    async fn push_front(&self, list: &str, value: String) -> Result<u64> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        let entries = lists.entry(list.to_string()).or_default();
        entries.push_front(value);
        Ok(entries.len() as u64)
    }

    async fn pop(&self, list: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(list).and_then(VecDeque::pop_front))
    }

    async fn length(&self, list: &str) -> Result<u64> {
        self.check_available()?;
        let lists = self.lists.lock().await;
        Ok(lists.get(list).map_or(0, |l| l.len() as u64))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
