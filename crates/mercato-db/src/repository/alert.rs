//! # Alert Repository
//!
//! Every fatal run alert is kept, whether or not it was delivered.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::DbResult;

#[derive(Debug, Clone, FromRow)]
pub struct SyncAlert {
    pub id: i64,
    pub job_name: String,
    pub message: String,
    pub destination: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Repository for persisted alerts.
#[derive(Debug, Clone)]
pub struct AlertRepository {
    pool: SqlitePool,
}

impl AlertRepository {
    /// Creates a new AlertRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AlertRepository { pool }
    }

    pub async fn insert(
        &self,
        job_name: &str,
        message: &str,
        destination: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO sync_alerts (job_name, message, destination, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(job_name)
        .bind(message)
        .bind(destination)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent alerts first.
    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<SyncAlert>> {
        let alerts = sqlx::query_as::<_, SyncAlert>(
            "SELECT id, job_name, message, destination, created_at FROM sync_alerts \
             ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }
}
