//! # Run Lock Coordinator
//!
//! At most one active run per job, across processes, using a lease row in the
//! database. A lease older than the job's maximum execution time belongs to a
//! run that died and may be taken over.
//!
//! ```rust,ignore
//! let Some(lease) = coordinator.acquire(JobKind::ProductSync, max, Utc::now()).await? else {
//!     return Ok(JobOutcome::Skipped(SkipReason::LockHeld));
//! };
//! let result = run_body().await;
//! lease.release().await;
//! ```

use chrono::{DateTime, Utc};
use mercato_core::JobKind;
use mercato_db::Database;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Hands out run leases.
#[derive(Debug, Clone)]
pub struct RunLockCoordinator {
    db: Database,
}

impl RunLockCoordinator {
    pub fn new(db: Database) -> Self {
        RunLockCoordinator { db }
    }

    /// Tries to take the lease for `job`. `None` means another run holds it.
    pub async fn acquire(
        &self,
        job: JobKind,
        max_execution: Duration,
        now: DateTime<Utc>,
    ) -> SyncResult<Option<RunLease>> {
        let ttl = chrono::Duration::from_std(max_execution)
            .map_err(|e| SyncError::InvalidConfig(format!("max execution time: {}", e)))?;
        let owner = Uuid::new_v4().to_string();

        let acquired = self
            .db
            .run_locks()
            .try_acquire(job.as_str(), &owner, now, now - ttl)
            .await?;

        if !acquired {
            info!(job = %job, "Run lock held by another run");
            return Ok(None);
        }

        debug!(job = %job, owner = %owner, "Run lock acquired");
        Ok(Some(RunLease {
            db: self.db.clone(),
            job,
            owner,
        }))
    }
}

/// A held run lock. Release it when the run body finishes, whatever the
/// outcome.
#[derive(Debug)]
pub struct RunLease {
    db: Database,
    job: JobKind,
    owner: String,
}

impl RunLease {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Deletes the lease if this run still owns it. Failures are logged; an
    /// unreleased lease simply expires.
    pub async fn release(self) {
        match self.db.run_locks().release(self.job.as_str(), &self.owner).await {
            Ok(true) => debug!(job = %self.job, "Run lock released"),
            Ok(false) => warn!(job = %self.job, "Run lock was taken over before release"),
            Err(e) => warn!(job = %self.job, error = %e, "Failed to release run lock"),
        }
    }
}
