//! Redis list transport.
//!
//! RPUSH to the tail, LPUSH to restore at the head, LPOP from the head,
//! LLEN for length, PING for liveness. Uses `redis::aio::ConnectionManager`,
//! which multiplexes one connection and reconnects on its own after an
//! outage.

use crate::config::secrets::{ExposeSecret, SecretString, redact_url};
use crate::error::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::QueueTransport;

/// Redis-backed [`QueueTransport`].
#[derive(Clone)]
pub struct RedisTransport {
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisTransport {
    /// Connect to Redis (e.g. "redis://localhost:6379").
    pub async fn connect(url: &SecretString) -> Result<Self> {
        let client = redis::Client::open(url.expose_secret())?;
        let connection_manager = ConnectionManager::new(client).await?;

        debug!(url = %redact_url(url), "redis transport connected");

        Ok(Self { connection_manager })
    }

    /// Wrap an existing connection manager shared with other components.
    pub fn from_connection(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl QueueTransport for RedisTransport {
    async fn push(&self, list: &str, value: String) -> Result<u64> {
        let mut conn = self.connection_manager.clone();
        let length: u64 = conn.rpush(list, value).await?;
        Ok(length)
    }

    async fn push_front(&self, list: &str, value: String) -> Result<u64> {
        let mut conn = self.connection_manager.clone();
        let length: u64 = conn.lpush(list, value).await?;
        Ok(length)
    }

    async fn pop(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.lpop(list, None).await?;
        Ok(value)
    }

    async fn length(&self, list: &str) -> Result<u64> {
        let mut conn = self.connection_manager.clone();
        let length: u64 = conn.llen(list).await?;
        Ok(length)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}
