//! `PostgreSQL` transactional outbox.
//!
//! Messages are inserted into `outbox_messages` on the caller's transaction, so they
//! become visible exactly when the aggregate change they announce commits. Draining
//! the table (claiming, publishing, marking `published_at`) is the relay's job.

use crate::{PgTx, storage_error};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use std::collections::BTreeMap;
use video_catalog_core::store::{OutboxMessage, OutboxStore, StoreError};

/// `PostgreSQL`-backed [`OutboxStore`].
#[derive(Clone, Debug)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Create an outbox over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Oldest unpublished messages that are due at `now`, in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn unpublished(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, aggregate_type, aggregate_id, event_type, payload, headers,
                   available_at
            FROM outbox_messages
            WHERE published_at IS NULL AND available_at <= $1
            ORDER BY id ASC
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to list outbox", &e))?;

        rows.iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_error("Failed to read outbox message", &e))
    }
}

fn row_to_message(row: &PgRow) -> Result<OutboxMessage, sqlx::Error> {
    let Json(headers): Json<BTreeMap<String, String>> = row.try_get("headers")?;
    Ok(OutboxMessage {
        event_id: row.try_get("event_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        headers,
        available_at: row.try_get("available_at")?,
    })
}

impl OutboxStore<PgTx> for PgOutboxStore {
    async fn enqueue(&self, tx: &mut PgTx, message: OutboxMessage) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO outbox_messages (
                event_id, aggregate_type, aggregate_id, event_type, payload, headers, available_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(message.event_id)
        .bind(&message.aggregate_type)
        .bind(&message.aggregate_id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(Json(&message.headers))
        .bind(message.available_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to enqueue outbox message", &e))?;

        tracing::debug!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            aggregate_id = %message.aggregate_id,
            "Outbox message enqueued"
        );
        Ok(())
    }
}
