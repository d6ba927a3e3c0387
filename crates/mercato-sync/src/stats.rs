//! # Run Statistics
//!
//! Counters live in memory for the length of a run and are written once, as
//! a single upsert into the per-(job, day) summary.

use chrono::{DateTime, Utc};
use mercato_core::{JobKind, RunCounters, RunSummary};
use mercato_db::Database;
use tracing::info;

use crate::error::SyncResult;

/// In-flight counters for one run.
#[derive(Debug, Clone)]
pub struct RunStats {
    job: JobKind,
    started_at: DateTime<Utc>,
    counters: RunCounters,
}

impl RunStats {
    pub fn start(job: JobKind, started_at: DateTime<Utc>) -> Self {
        RunStats {
            job,
            started_at,
            counters: RunCounters::default(),
        }
    }

    pub fn job(&self) -> JobKind {
        self.job
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut RunCounters {
        &mut self.counters
    }

    /// One log line at the end of a phase.
    pub fn phase_done(&self, phase: &str) {
        let c = &self.counters;
        info!(
            job = %self.job,
            phase,
            processed = c.processed,
            succeeded = c.succeeded,
            failed = c.failed,
            retried = c.retried,
            uploaded = c.uploaded,
            updated = c.updated,
            bulk_operations = c.bulk_operations,
            api_calls = c.api_calls,
            "Phase complete"
        );
    }

    pub fn finish(self, finished_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            job: self.job,
            counters: self.counters,
            started_at: self.started_at,
            finished_at,
        }
    }
}

/// Persists run summaries.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    db: Database,
}

impl StatsRecorder {
    pub fn new(db: Database) -> Self {
        StatsRecorder { db }
    }

    /// Logs the final summary line and folds the run into its daily row.
    pub async fn record(&self, summary: &RunSummary) -> SyncResult<()> {
        let c = &summary.counters;
        info!(
            job = %summary.job,
            duration_ms = summary.duration_ms(),
            processed = c.processed,
            succeeded = c.succeeded,
            failed = c.failed,
            retried = c.retried,
            uploaded = c.uploaded,
            updated = c.updated,
            bulk_operations = c.bulk_operations,
            api_calls = c.api_calls,
            "Run finished"
        );

        self.db.stats().record_run(summary).await?;
        Ok(())
    }
}
