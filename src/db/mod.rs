//! Postgres handle for the dead-letter store.
//!
//! Only the worker's failure path and operator tooling open it; producers
//! and the queue itself never touch Postgres.

pub mod dead_letter;

use crate::config::secrets::{ExposeSecret, SecretString, redact_url};
use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Dead-letter writes are rare; a small pool is plenty.
const MAX_CONNECTIONS: u32 = 5;

pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &SecretString) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url.expose_secret())
            .await?;
        info!(url = %redact_url(url), "dead-letter store connected");
        Ok(Self { pool })
    }

    /// Use a pool the host already owns.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the `dead_letter_logs` table.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
