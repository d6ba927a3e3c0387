//! # Stats Repository
//!
//! Daily rollups: one row per (job, day) for runs and one row per day for
//! the webhook queue. Rows are upserted, so repeated runs in a day add up.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use mercato_core::{DailyJobStats, RunSummary, WebhookDailyStats};

/// Repository for run and queue statistics.
#[derive(Debug, Clone)]
pub struct StatsRepository {
    pool: SqlitePool,
}

impl StatsRepository {
    /// Creates a new StatsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StatsRepository { pool }
    }

    /// Adds one run's counters to its (job, day) row. The day is taken from
    /// the run's start time.
    pub async fn record_run(&self, summary: &RunSummary) -> DbResult<()> {
        let day = summary.started_at.format("%Y-%m-%d").to_string();
        let c = &summary.counters;

        sqlx::query(
            r#"
            INSERT INTO job_run_stats (
                job_name, day, runs, processed, succeeded, failed, retried,
                uploaded, updated, bulk_operations, api_calls,
                last_started_at, last_finished_at, last_duration_ms
            ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (job_name, day) DO UPDATE SET
                runs = job_run_stats.runs + 1,
                processed = job_run_stats.processed + excluded.processed,
                succeeded = job_run_stats.succeeded + excluded.succeeded,
                failed = job_run_stats.failed + excluded.failed,
                retried = job_run_stats.retried + excluded.retried,
                uploaded = job_run_stats.uploaded + excluded.uploaded,
                updated = job_run_stats.updated + excluded.updated,
                bulk_operations = job_run_stats.bulk_operations + excluded.bulk_operations,
                api_calls = job_run_stats.api_calls + excluded.api_calls,
                last_started_at = excluded.last_started_at,
                last_finished_at = excluded.last_finished_at,
                last_duration_ms = excluded.last_duration_ms
            "#,
        )
        .bind(summary.job.as_str())
        .bind(&day)
        .bind(c.processed)
        .bind(c.succeeded)
        .bind(c.failed)
        .bind(c.retried)
        .bind(c.uploaded)
        .bind(c.updated)
        .bind(c.bulk_operations)
        .bind(c.api_calls)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(summary.duration_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn job_day(&self, job_name: &str, day: &str) -> DbResult<Option<DailyJobStats>> {
        let row = sqlx::query_as::<_, DailyJobStats>(
            r#"
            SELECT job_name, day, runs, processed, succeeded, failed, retried,
                   uploaded, updated, bulk_operations, api_calls,
                   last_started_at, last_finished_at, last_duration_ms
            FROM job_run_stats
            WHERE job_name = ?1 AND day = ?2
            "#,
        )
        .bind(job_name)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Replaces the day's queue totals with a fresh count.
    pub async fn upsert_webhook_day(&self, stats: &WebhookDailyStats, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_daily_stats (day, total_received, total_processed, total_failed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (day) DO UPDATE SET
                total_received = excluded.total_received,
                total_processed = excluded.total_processed,
                total_failed = excluded.total_failed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stats.day)
        .bind(stats.total_received)
        .bind(stats.total_processed)
        .bind(stats.total_failed)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn webhook_day(&self, day: &str) -> DbResult<Option<WebhookDailyStats>> {
        let row = sqlx::query_as::<_, WebhookDailyStats>(
            "SELECT day, total_received, total_processed, total_failed \
             FROM webhook_daily_stats WHERE day = ?1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
