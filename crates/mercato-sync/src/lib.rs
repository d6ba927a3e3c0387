//! # mercato-sync: Reconciliation Engine for Mercato
//!
//! The two scheduled jobs that keep a local catalog and a marketplace seller
//! account consistent.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Mercato Jobs                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                JobRunner (lock, flags, stats, alerts)            │  │
//! │  └───────────────┬──────────────────────────────┬───────────────────┘  │
//! │                  │                              │                       │
//! │                  ▼                              ▼                       │
//! │  ┌───────────────────────────┐  ┌───────────────────────────────────┐  │
//! │  │    WebhookDispatcher      │  │      ProductSynchronizer          │  │
//! │  │                           │  │                                   │  │
//! │  │  marketplace → local      │  │  local → marketplace              │  │
//! │  │  priority queue, retries  │  │  seven passes, bulk calls         │  │
//! │  │  EventHandlers (order FSM,│  │  RateLimiter + ExecutionBudget    │  │
//! │  │  mappings, stock, price)  │  │                                   │  │
//! │  └─────────────┬─────────────┘  └────────────────┬──────────────────┘  │
//! │                │                                 │                      │
//! │                ▼                                 ▼                      │
//! │  ┌───────────────────────────┐  ┌───────────────────────────────────┐  │
//! │  │  mercato-db (SQLite)      │  │  MarketplaceClient                │  │
//! │  │  queue, mappings, orders, │  │  HttpMarketplaceClient (reqwest,  │  │
//! │  │  catalog, locks, stats    │  │  Basic auth, backoff retries)     │  │
//! │  └───────────────────────────┘  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`jobs`] - Job entry points and the run envelope
//! - [`dispatcher`] - Webhook queue draining, retries, retention
//! - [`handlers`] - Per-event-type handlers
//! - [`product_sync`] - Batch product synchronizer
//! - [`marketplace`] - Marketplace client trait, HTTP client, request bodies
//! - [`rate_limit`] - Call rate limiter and execution budget
//! - [`lock`] - Database-backed run locks
//! - [`stats`] - Run counters and persistence
//! - [`alert`] - Operator alerts
//! - [`config`] - Configuration (TOML + environment)
//! - [`error`] - Error types
//!
//! ## Usage
//! ```rust,ignore
//! let config = Arc::new(SyncConfig::load(None)?);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let runner = JobRunner::new(db, config);
//!
//! match runner.run_webhook_dispatcher().await? {
//!     JobOutcome::Completed(summary) => println!("{} events", summary.counters.processed),
//!     JobOutcome::Skipped(reason) => println!("skipped: {:?}", reason),
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod alert;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod lock;
pub mod marketplace;
pub mod product_sync;
pub mod rate_limit;
pub mod stats;

// =============================================================================
// Re-exports
// =============================================================================

pub use alert::{Alert, AlertEmitter, AlertSink, LogAlertEmitter, NoOpAlertEmitter};
pub use config::{Credentials, SyncConfig};
pub use dispatcher::WebhookDispatcher;
pub use error::{SyncError, SyncResult};
pub use handlers::EventHandlers;
pub use jobs::{JobOutcome, JobRunner, SkipReason};
pub use lock::{RunLease, RunLockCoordinator};
pub use marketplace::{HttpMarketplaceClient, MarketplaceClient};
pub use product_sync::ProductSynchronizer;
pub use rate_limit::{ExecutionBudget, RateLimiter};
pub use stats::{RunStats, StatsRecorder};
