//! # Job Entry Points
//!
//! What the scheduler calls. Each job wraps its run body in the same
//! envelope.
//!
//! ## Job Envelope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. acquire run lock ───── held ─────► Skipped(LockHeld)               │
//! │  2. feature flags ──────── off ──────► release, Skipped(Disabled)      │
//! │  3. credentials (sync) ─── missing ──► alert, release, Err             │
//! │  4. run body                                                            │
//! │  5. record stats                                                        │
//! │  6. release lock (always) ───────────► Completed(summary)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use mercato_core::{JobKind, RunSummary};
use mercato_db::Database;

use crate::alert::{AlertEmitter, AlertSink, LogAlertEmitter};
use crate::config::{Credentials, MarketplaceSettings, SyncConfig};
use crate::dispatcher::WebhookDispatcher;
use crate::error::SyncResult;
use crate::lock::RunLockCoordinator;
use crate::marketplace::{HttpMarketplaceClient, MarketplaceClient};
use crate::product_sync::ProductSynchronizer;
use crate::stats::{RunStats, StatsRecorder};

/// Why a job did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run holds the lock.
    LockHeld,
    /// Turned off by feature flags.
    Disabled,
}

/// Result of one job invocation.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(RunSummary),
    Skipped(SkipReason),
}

impl JobOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            JobOutcome::Completed(summary) => Some(summary),
            JobOutcome::Skipped(_) => None,
        }
    }
}

/// Runs the scheduled jobs against one database and configuration.
#[derive(Debug, Clone)]
pub struct JobRunner {
    db: Database,
    config: Arc<SyncConfig>,
    locks: RunLockCoordinator,
    alerts: AlertSink,
    recorder: StatsRecorder,
}

impl JobRunner {
    /// Creates a runner that logs alerts.
    pub fn new(db: Database, config: Arc<SyncConfig>) -> Self {
        Self::with_emitter(db, config, Arc::new(LogAlertEmitter))
    }

    pub fn with_emitter(db: Database, config: Arc<SyncConfig>, emitter: Arc<dyn AlertEmitter>) -> Self {
        let destination = config.alert_destination().map(str::to_string);
        JobRunner {
            locks: RunLockCoordinator::new(db.clone()),
            alerts: AlertSink::new(db.clone(), emitter, destination),
            recorder: StatsRecorder::new(db.clone()),
            db,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Webhook Dispatcher
    // =========================================================================

    pub async fn run_webhook_dispatcher(&self) -> SyncResult<JobOutcome> {
        let job = JobKind::WebhookDispatcher;
        let started = Utc::now();

        let Some(lease) = self
            .locks
            .acquire(job, self.config.dispatcher_max_execution(), started)
            .await?
        else {
            return Ok(JobOutcome::Skipped(SkipReason::LockHeld));
        };

        if !self.config.webhook_processing_enabled() {
            info!(job = %job, "Webhook processing disabled");
            lease.release().await;
            return Ok(JobOutcome::Skipped(SkipReason::Disabled));
        }

        info!(job = %job, "Run started");
        let dispatcher = WebhookDispatcher::new(self.db.clone(), &self.config);
        let mut stats = RunStats::start(job, started);
        let result = dispatcher.run(started, &mut stats).await;

        let outcome = self.finish(stats, result).await;
        lease.release().await;
        outcome
    }

    // =========================================================================
    // Product Synchronizer
    // =========================================================================

    /// Runs the synchronizer against the live marketplace API.
    pub async fn run_product_synchronizer(&self) -> SyncResult<JobOutcome> {
        self.run_product_synchronizer_with(HttpMarketplaceClient::new).await
    }

    /// Runs the synchronizer with a client built by `connect` once
    /// credentials are known to be present.
    pub async fn run_product_synchronizer_with<C, F>(&self, connect: F) -> SyncResult<JobOutcome>
    where
        C: MarketplaceClient,
        F: FnOnce(&MarketplaceSettings, &Credentials) -> SyncResult<C>,
    {
        let job = JobKind::ProductSync;
        let started = Utc::now();

        let Some(lease) = self
            .locks
            .acquire(job, self.config.product_sync_max_execution(), started)
            .await?
        else {
            return Ok(JobOutcome::Skipped(SkipReason::LockHeld));
        };

        if !self.config.product_sync_enabled() {
            info!(job = %job, "Product sync disabled");
            lease.release().await;
            return Ok(JobOutcome::Skipped(SkipReason::Disabled));
        }

        let client = match self
            .config
            .credentials()
            .and_then(|credentials| connect(&self.config.marketplace, &credentials))
        {
            Ok(client) => client,
            Err(err) => {
                error!(job = %job, error = %err, "Product sync cannot start");
                self.alerts
                    .raise(job, &format!("Product sync cannot start: {}", err), Utc::now())
                    .await;
                lease.release().await;
                return Err(err);
            }
        };

        info!(job = %job, "Run started");
        let synchronizer = ProductSynchronizer::new(self.db.clone(), client, self.config.product_sync.clone());
        let mut stats = RunStats::start(job, started);
        let result = synchronizer.run(started, &mut stats).await;

        let outcome = self.finish(stats, result).await;
        lease.release().await;
        outcome
    }

    /// Records stats for a finished run body, whatever its result.
    async fn finish(&self, stats: RunStats, result: SyncResult<()>) -> SyncResult<JobOutcome> {
        let job = stats.job();
        let summary = stats.finish(Utc::now());

        if let Err(e) = self.recorder.record(&summary).await {
            error!(job = %job, error = %e, "Failed to record run statistics");
        }

        match result {
            Ok(()) => Ok(JobOutcome::Completed(summary)),
            Err(err) => {
                error!(job = %job, error = %err, "Run aborted");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NoOpAlertEmitter;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use mercato_db::DbConfig;
    use reqwest::Method;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient(Arc<AtomicUsize>);

    #[async_trait]
    impl MarketplaceClient for CountingClient {
        fn seller_id(&self) -> &str {
            "S1"
        }

        async fn request(&self, _method: Method, _path: &str, _body: Option<Value>) -> SyncResult<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn configured() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.marketplace.api_key = Some("key".into());
        config.marketplace.api_secret = Some("secret".into());
        config.marketplace.seller_id = Some("S1".into());
        config.product_sync.min_call_spacing_ms = 0;
        config
    }

    async fn runner(config: SyncConfig) -> (Database, JobRunner) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let runner = JobRunner::with_emitter(db.clone(), Arc::new(config), Arc::new(NoOpAlertEmitter));
        (db, runner)
    }

    #[tokio::test]
    async fn test_dispatcher_completes_and_records_stats() {
        let (db, runner) = runner(SyncConfig::default()).await;
        db.webhook_events()
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"J-1"}"#, Utc::now())
            .await
            .unwrap();

        let outcome = runner.run_webhook_dispatcher().await.unwrap();
        let summary = outcome.summary().expect("completed");
        assert_eq!(summary.counters.succeeded, 1);

        let day = summary.started_at.format("%Y-%m-%d").to_string();
        let row = db.stats().job_day("webhook_dispatcher", &day).await.unwrap().unwrap();
        assert_eq!(row.runs, 1);

        // Lock released
        assert!(db.run_locks().get("webhook_dispatcher").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lock_skips_without_touching_state() {
        let (db, runner) = runner(SyncConfig::default()).await;
        let event = db
            .webhook_events()
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"J-2"}"#, Utc::now())
            .await
            .unwrap();

        let now = Utc::now();
        assert!(db
            .run_locks()
            .try_acquire("webhook_dispatcher", "other-run", now, now - chrono::Duration::minutes(5))
            .await
            .unwrap());

        let outcome = runner.run_webhook_dispatcher().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::LockHeld)));

        let stored = db.webhook_events().get(&event.id).await.unwrap().unwrap();
        assert!(!stored.processed);
        assert!(!stored.processing);
        let lock = db.run_locks().get("webhook_dispatcher").await.unwrap().unwrap();
        assert_eq!(lock.owner, "other-run");
    }

    #[tokio::test]
    async fn test_disabled_jobs_are_skipped() {
        let mut config = configured();
        config.features.webhook_processing_enabled = false;
        config.features.auto_sync_enabled = false;
        let (db, runner) = runner(config).await;

        let outcome = runner.run_webhook_dispatcher().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::Disabled)));

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = runner
            .run_product_synchronizer_with(|_, _| Ok(CountingClient(calls.clone())))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::Skipped(SkipReason::Disabled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(db.run_locks().get("product_sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_alerts_and_releases() {
        let mut config = configured();
        config.marketplace.api_secret = None;
        let (db, runner) = runner(config).await;

        let err = runner
            .run_product_synchronizer_with(|_, _| Ok(CountingClient(Arc::new(AtomicUsize::new(0)))))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingCredentials(_)));
        assert!(err.is_config_error());

        let alerts = db.alerts().list_recent(5).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].job_name, "product_sync");

        assert!(db.run_locks().get("product_sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_product_sync_runs_with_client() {
        let (db, runner) = runner(configured()).await;
        db.catalog()
            .insert_product(
                &mercato_db::NewProduct::new("JOB-1", "Mug", mercato_core::Money::from_cents(990), 4),
                Utc::now(),
            )
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = runner
            .run_product_synchronizer_with(|_, credentials| {
                assert_eq!(credentials.seller_id, "S1");
                Ok(CountingClient(calls.clone()))
            })
            .await
            .unwrap();

        assert_eq!(outcome.summary().unwrap().counters.uploaded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
