//! # mercato-db: Database Layer for Mercato
//!
//! SQLite persistence for the reconciliation engine, using sqlx for async
//! access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mercato Data Flow                                │
//! │                                                                         │
//! │  Dispatcher / Synchronizer run (mercato-sync)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    mercato-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ WebhookEvent   │   │ 001_local_   │  │   │
//! │  │   │ SqlitePool    │◄───│ ProductMapping │   │   catalog    │  │   │
//! │  │   │ WAL, FKs      │    │ RemoteOrder    │   │ 002_market-  │  │   │
//! │  │   │               │    │ Catalog, Lock  │   │   place_sync │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   ~/.local/share/mercato/mercato.db (or MERCATO_DATABASE_PATH)  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - One repository per store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mercato_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("mercato.db")).await?;
//!
//! let event = db
//!     .webhook_events()
//!     .enqueue("ORDER_CREATED", r#"{"orderNumber":"A-1"}"#, Utc::now())
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::alert::{AlertRepository, SyncAlert};
pub use repository::catalog::{CatalogRepository, NewLocalOrder, NewProduct};
pub use repository::product_mapping::ProductMappingRepository;
pub use repository::remote_order::RemoteOrderRepository;
pub use repository::run_lock::{RunLock, RunLockRepository};
pub use repository::stats::StatsRepository;
pub use repository::webhook_event::{PurgeCounts, WebhookEventRepository};
