//! # Mercato Worker
//!
//! Entry point the scheduler invokes. Each invocation runs one command and
//! exits; overlapping invocations are serialized by the run locks.
//!
//! ## Commands
//! ```text
//! mercato-worker [--config <path>] dispatch
//! mercato-worker [--config <path>] sync-products
//! mercato-worker [--config <path>] all                 (default)
//! mercato-worker [--config <path>] enqueue <type> <payload-json>
//! mercato-worker [--config <path>] status
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mercato_core::{JobKind, MappingStatus};
use mercato_db::{Database, DbConfig};
use mercato_sync::{JobOutcome, JobRunner, SyncConfig};

const USAGE: &str = "usage: mercato-worker [--config <path>] \
                     [dispatch | sync-products | all | enqueue <type> <payload-json> | status]";

/// What this invocation should do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Dispatch,
    SyncProducts,
    All,
    Enqueue { event_type: String, payload: String },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => positional.push(arg),
        }
    }

    let command = match positional.as_slice() {
        [] => Command::All,
        [cmd] if cmd == "all" => Command::All,
        [cmd] if cmd == "dispatch" => Command::Dispatch,
        [cmd] if cmd == "sync-products" => Command::SyncProducts,
        [cmd] if cmd == "status" => Command::Status,
        [cmd, event_type, payload] if cmd == "enqueue" => {
            serde_json::from_str::<serde_json::Value>(payload)
                .context("payload is not valid JSON")?;
            Command::Enqueue {
                event_type: event_type.clone(),
                payload: payload.clone(),
            }
        }
        _ => bail!("{}", USAGE),
    };

    Ok(Args { config, command })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let config = Arc::new(SyncConfig::load(args.config).context("failed to load configuration")?);
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let db = Database::new(DbConfig::new(&db_path))
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    info!(path = %db_path.display(), "Database ready");

    let runner = JobRunner::new(db.clone(), config.clone());

    let result = match args.command {
        Command::Dispatch => report(JobKind::WebhookDispatcher, runner.run_webhook_dispatcher().await),
        Command::SyncProducts => report(JobKind::ProductSync, runner.run_product_synchronizer().await),
        Command::All => {
            // The synchronizer still runs when the dispatcher fails.
            let dispatched = report(JobKind::WebhookDispatcher, runner.run_webhook_dispatcher().await);
            let synced = report(JobKind::ProductSync, runner.run_product_synchronizer().await);
            dispatched.and(synced)
        }
        Command::Enqueue { event_type, payload } => {
            let event = db
                .webhook_events()
                .enqueue(&event_type, &payload, Utc::now())
                .await
                .context("failed to enqueue webhook")?;
            info!(event_id = %event.id, event_type = %event.event_type, priority = event.priority, "Webhook enqueued");
            println!("{}", event.id);
            Ok(())
        }
        Command::Status => status(&db, &config).await,
    };

    db.close().await;
    result
}

/// Prints a finished run as JSON, or turns a run error into the exit error.
fn report(job: JobKind, outcome: mercato_sync::SyncResult<JobOutcome>) -> anyhow::Result<()> {
    match outcome {
        Ok(JobOutcome::Completed(summary)) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Ok(JobOutcome::Skipped(reason)) => {
            info!(job = %job, ?reason, "Run skipped");
            Ok(())
        }
        Err(e) => {
            error!(job = %job, error = %e, "Run failed");
            Err(anyhow::Error::new(e).context(format!("{} failed", job)))
        }
    }
}

async fn status(db: &Database, config: &SyncConfig) -> anyhow::Result<()> {
    let pending = db
        .webhook_events()
        .count_pending(config.dispatcher.max_retries)
        .await?;
    println!("pending webhooks: {}", pending);

    let mappings = db.mappings();
    for status in [
        MappingStatus::Pending,
        MappingStatus::Active,
        MappingStatus::Error,
        MappingStatus::Rejected,
    ] {
        println!("mappings {:<9} {}", status.as_str(), mappings.count_by_status(status).await?);
    }

    for job in [JobKind::WebhookDispatcher, JobKind::ProductSync] {
        let lock = job.as_str();
        match db.run_locks().get(lock).await? {
            Some(held) => println!(
                "lock {}: held by {} since {}",
                lock,
                held.owner,
                held.acquired_at.to_rfc3339()
            ),
            None => println!("lock {}: free", lock),
        }
    }

    Ok(())
}
