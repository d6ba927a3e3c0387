//! # Webhook Event Repository
//!
//! The durable webhook queue.
//!
//! ## Event Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue ──► queued (processed=0, processing=0, retry_count=0)         │
//! │                 │                                                       │
//! │                 │ claim: UPDATE ... SET processing=1                    │
//! │                 │        WHERE id=? AND processing=0 AND processed=0    │
//! │                 ▼                                                       │
//! │             claimed ──── success ──► processed (processed_at set)      │
//! │                 │                          │                            │
//! │                 │ failure                  │ 30 days                    │
//! │                 ▼                          ▼                            │
//! │  retry_count+1, next_retry_at         purged                           │
//! │                 │                                                       │
//! │                 ├── retry_count < max ──► queued again when due        │
//! │                 └── retry_count ≥ max ──► abandoned ── 7 days ──► purged│
//! │                                                                         │
//! │  crashed run: claimed too long ──► release_stuck ──► queued            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use mercato_core::event::priority_of;
use mercato_core::{WebhookDailyStats, WebhookEvent};

const EVENT_COLUMNS: &str = "id, event_type, priority, payload, received_at, processed, processing, \
     processing_started_at, retry_count, next_retry_at, error_message, processed_at";

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub processed: u64,
    pub abandoned: u64,
}

/// Repository for the webhook queue.
#[derive(Debug, Clone)]
pub struct WebhookEventRepository {
    pool: SqlitePool,
}

impl WebhookEventRepository {
    /// Creates a new WebhookEventRepository.
    pub fn new(pool: SqlitePool) -> Self {
        WebhookEventRepository { pool }
    }

    /// Persists a delivered webhook verbatim.
    ///
    /// The priority is derived from the raw type here so selection can order
    /// by it; unknown types are still stored and fail at dispatch.
    pub async fn enqueue(
        &self,
        event_type: &str,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> DbResult<WebhookEvent> {
        let event = WebhookEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            priority: priority_of(event_type),
            payload: payload.to_string(),
            received_at,
            processed: false,
            processing: false,
            processing_started_at: None,
            retry_count: 0,
            next_retry_at: None,
            error_message: None,
            processed_at: None,
        };

        debug!(id = %event.id, event_type = %event.event_type, "Enqueuing webhook event");

        sqlx::query(
            r#"
            INSERT INTO webhook_events (id, event_type, priority, payload, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.priority)
        .bind(&event.payload)
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    /// Gets an event by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<WebhookEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?1");
        let event = sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// Selects events for the main dispatch pass.
    ///
    /// Fresh events must have arrived after `lookback_since`; retried events
    /// must be due. Ordered by priority, then arrival.
    pub async fn select_due(
        &self,
        limit: i64,
        max_retries: i64,
        lookback_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<WebhookEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            WHERE processed = 0
              AND processing = 0
              AND retry_count < ?1
              AND (
                    (retry_count = 0 AND received_at >= ?2)
                 OR (retry_count > 0 AND next_retry_at <= ?3)
              )
            ORDER BY priority ASC, received_at ASC
            LIMIT ?4
            "#
        );

        let events = sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(max_retries)
            .bind(lookback_since)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = events.len(), "Selected due webhook events");
        Ok(events)
    }

    /// Selects previously failed events whose retry time has come.
    pub async fn select_retry_due(
        &self,
        limit: i64,
        max_retries: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<WebhookEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            WHERE processed = 0
              AND processing = 0
              AND retry_count > 0
              AND retry_count < ?1
              AND next_retry_at <= ?2
            ORDER BY received_at ASC
            LIMIT ?3
            "#
        );

        let events = sqlx::query_as::<_, WebhookEvent>(&sql)
            .bind(max_retries)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(events)
    }

    /// Claims an event for processing.
    ///
    /// Returns `false` if the event was already claimed or resolved.
    pub async fn claim(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing = 1, processing_started_at = ?2
            WHERE id = ?1 AND processing = 0 AND processed = 0
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Resolves an event as handled.
    pub async fn mark_processed(&self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = 1,
                processing = 0,
                processed_at = ?2,
                error_message = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt and schedules the next one.
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET retry_count = retry_count + 1,
                next_retry_at = ?2,
                error_message = ?3,
                processing = 0,
                processing_started_at = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Releases claims left behind by a run that never resolved them.
    pub async fn release_stuck(&self, claimed_before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing = 0, processing_started_at = NULL
            WHERE processing = 1
              AND processed = 0
              AND (processing_started_at IS NULL OR processing_started_at < ?1)
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes processed events resolved before `processed_before` and
    /// abandoned events received before `abandoned_before`.
    pub async fn purge(
        &self,
        processed_before: DateTime<Utc>,
        abandoned_before: DateTime<Utc>,
        max_retries: i64,
    ) -> DbResult<PurgeCounts> {
        let processed = sqlx::query(
            "DELETE FROM webhook_events WHERE processed = 1 AND processed_at < ?1",
        )
        .bind(processed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let abandoned = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE processed = 0
              AND retry_count >= ?1
              AND received_at < ?2
            "#,
        )
        .bind(max_retries)
        .bind(abandoned_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(PurgeCounts {
            processed,
            abandoned,
        })
    }

    /// Counts queue activity inside `[day_start, day_end)`.
    pub async fn daily_counts(
        &self,
        day: &str,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
        max_retries: i64,
    ) -> DbResult<WebhookDailyStats> {
        let (received, processed, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN received_at >= ?1 AND received_at < ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN processed = 1 AND processed_at >= ?1 AND processed_at < ?2
                                  THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN processed = 0 AND retry_count >= ?3
                                   AND received_at >= ?1 AND received_at < ?2
                                  THEN 1 ELSE 0 END), 0)
            FROM webhook_events
            "#,
        )
        .bind(day_start)
        .bind(day_end)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(WebhookDailyStats {
            day: day.to_string(),
            total_received: received,
            total_processed: processed,
            total_failed: failed,
        })
    }

    /// Counts events that are neither processed nor abandoned.
    pub async fn count_pending(&self, max_retries: i64) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_events WHERE processed = 0 AND retry_count < ?1",
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
