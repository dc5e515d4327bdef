//! Dead-letter store on Postgres via direct SQLx.
//!
//! Insert-only from the worker's side; the read queries serve operators
//! inspecting or replaying failures.

use crate::dead_letter::DeadLetterSink;
use crate::error::{Error, Result};
use crate::model::CorrelationId;
use crate::model::dead_letter::{DeadLetterCommand, DeadLetterRecord};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

/// Status written for every new record.
const STATUS_FAILED: &str = "failed";

#[async_trait]
impl DeadLetterSink for super::Db {
    async fn record_failure(&self, command: DeadLetterCommand) -> Result<()> {
        let retry_count = i32::try_from(command.retry_count).map_err(|_| {
            Error::Other(format!(
                "retry count {} does not fit the dead_letter_logs column",
                command.retry_count
            ))
        })?;

        let inserted = sqlx::query(
            "INSERT INTO dead_letter_logs (request_id, queue, request, error_detail, retry_count, reason, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(command.request_id.0)
        .bind(&command.queue)
        .bind(&command.request)
        .bind(&command.error_detail)
        .bind(retry_count)
        .bind(command.reason.to_string())
        .bind(STATUS_FAILED)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            warn!(
                request_id = %command.request_id,
                "dead-letter record already exists, write ignored"
            );
        } else {
            debug!(request_id = %command.request_id, queue = %command.queue, "dead-letter recorded");
        }
        Ok(())
    }
}

impl super::Db {
    /// Most recent dead-letter records, newest first.
    pub async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterRecord>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT id, request_id, queue, request, error_detail, retry_count, reason, status, created_at
             FROM dead_letter_logs ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetterRow::into_record).collect()
    }

    /// Get a dead-letter record by the correlation ID of the failed envelope.
    pub async fn get_dead_letter(&self, request_id: CorrelationId) -> Result<DeadLetterRecord> {
        let row: Option<DeadLetterRow> = sqlx::query_as(
            "SELECT id, request_id, queue, request, error_detail, retry_count, reason, status, created_at
             FROM dead_letter_logs WHERE request_id = $1",
        )
        .bind(request_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("dead-letter record {request_id}")))?
            .into_record()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: i64,
    request_id: Uuid,
    queue: String,
    request: serde_json::Value,
    error_detail: serde_json::Value,
    retry_count: i32,
    reason: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl DeadLetterRow {
    fn into_record(self) -> Result<DeadLetterRecord> {
        let retry_count = u32::try_from(self.retry_count).map_err(|_| {
            Error::Other(format!(
                "dead-letter {} has negative retry count {}",
                self.id, self.retry_count
            ))
        })?;

        Ok(DeadLetterRecord {
            id: self.id,
            request_id: CorrelationId(self.request_id),
            queue: self.queue,
            request: self.request,
            error_detail: self.error_detail,
            retry_count,
            reason: self.reason,
            status: self.status,
            created_at: self.created_at,
        })
    }
}
