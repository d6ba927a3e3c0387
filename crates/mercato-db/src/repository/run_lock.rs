//! # Run Lock Repository
//!
//! One lease row per job. Acquisition is a single conditional upsert, so two
//! workers racing for the same job cannot both win.
//!
//! ```text
//! no row             ──► INSERT                       ──► acquired
//! row, not expired   ──► ON CONFLICT ... WHERE false  ──► 0 rows, held
//! row, expired       ──► ON CONFLICT DO UPDATE        ──► acquired (takeover)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::DbResult;

/// A held lease.
#[derive(Debug, Clone, FromRow)]
pub struct RunLock {
    pub job_name: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// Repository for run locks.
#[derive(Debug, Clone)]
pub struct RunLockRepository {
    pool: SqlitePool,
}

impl RunLockRepository {
    /// Creates a new RunLockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RunLockRepository { pool }
    }

    /// Takes the lease for `job_name` unless a lease acquired at or after
    /// `expired_before` is still held.
    pub async fn try_acquire(
        &self,
        job_name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expired_before: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_locks (job_name, owner, acquired_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (job_name) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at
            WHERE run_locks.acquired_at < ?4
            "#,
        )
        .bind(job_name)
        .bind(owner)
        .bind(now)
        .bind(expired_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drops the lease if `owner` still holds it.
    pub async fn release(&self, job_name: &str, owner: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM run_locks WHERE job_name = ?1 AND owner = ?2")
            .bind(job_name)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, job_name: &str) -> DbResult<Option<RunLock>> {
        let lock = sqlx::query_as::<_, RunLock>(
            "SELECT job_name, owner, acquired_at FROM run_locks WHERE job_name = ?1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn test_lease_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.run_locks();
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(5);

        assert!(locks.try_acquire("job", "a", t0, t0 - ttl).await.unwrap());

        let t1 = t0 + Duration::minutes(1);
        assert!(!locks.try_acquire("job", "b", t1, t1 - ttl).await.unwrap());
        assert_eq!(locks.get("job").await.unwrap().unwrap().owner, "a");

        // Wrong owner cannot release
        assert!(!locks.release("job", "b").await.unwrap());

        let t2 = t0 + Duration::minutes(6);
        assert!(locks.try_acquire("job", "b", t2, t2 - ttl).await.unwrap());
        assert_eq!(locks.get("job").await.unwrap().unwrap().owner, "b");

        // The expired holder's release is now a no-op
        assert!(!locks.release("job", "a").await.unwrap());
        assert!(locks.release("job", "b").await.unwrap());
        assert!(locks.get("job").await.unwrap().is_none());
    }
}
