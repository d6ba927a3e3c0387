//! # Operator Alerts
//!
//! Raised when a run cannot start (missing credentials, invalid
//! configuration). Every alert is emitted through an [`AlertEmitter`] and
//! persisted in `sync_alerts`.

use chrono::{DateTime, Utc};
use mercato_core::JobKind;
use mercato_db::Database;
use std::sync::Arc;
use tracing::{error, warn};

/// An alert about a job that could not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub job: JobKind,
    pub message: String,
    /// Configured recipient (e.g. an operator mailbox), if any.
    pub destination: Option<String>,
    pub raised_at: DateTime<Utc>,
}

/// Delivers alerts to an operator.
pub trait AlertEmitter: Send + Sync {
    fn emit(&self, alert: &Alert);
}

/// Writes alerts to the error log.
#[derive(Debug, Default)]
pub struct LogAlertEmitter;

impl AlertEmitter for LogAlertEmitter {
    fn emit(&self, alert: &Alert) {
        error!(
            job = %alert.job,
            destination = alert.destination.as_deref().unwrap_or("-"),
            message = %alert.message,
            "Sync alert"
        );
    }
}

/// Drops alerts. Used in tests.
#[derive(Debug, Default)]
pub struct NoOpAlertEmitter;

impl AlertEmitter for NoOpAlertEmitter {
    fn emit(&self, _alert: &Alert) {}
}

/// Emits and persists alerts.
#[derive(Clone)]
pub struct AlertSink {
    db: Database,
    emitter: Arc<dyn AlertEmitter>,
    destination: Option<String>,
}

impl AlertSink {
    pub fn new(db: Database, emitter: Arc<dyn AlertEmitter>, destination: Option<String>) -> Self {
        AlertSink {
            db,
            emitter,
            destination,
        }
    }

    /// Emits the alert, then stores it. A storage failure is logged only.
    pub async fn raise(&self, job: JobKind, message: &str, now: DateTime<Utc>) -> Alert {
        let alert = Alert {
            job,
            message: message.to_string(),
            destination: self.destination.clone(),
            raised_at: now,
        };

        self.emitter.emit(&alert);

        if let Err(e) = self
            .db
            .alerts()
            .insert(job.as_str(), message, alert.destination.as_deref(), now)
            .await
        {
            warn!(job = %job, error = %e, "Failed to persist alert");
        }
        alert
    }
}

impl std::fmt::Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSink")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}
