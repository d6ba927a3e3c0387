//! # mercato-core: Pure Domain Logic for Mercato
//!
//! Everything the reconciliation engine decides without touching a database
//! or the network lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mercato Architecture                             │
//! │                                                                         │
//! │  Marketplace webhooks            Local catalog                         │
//! │        │                               │                                │
//! │        ▼                               ▼                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          mercato-sync (dispatcher, handlers, synchronizer)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mercato-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   event   │  │   order   │  │   retry   │  │  payload  │  │   │
//! │  │   │ EventType │  │ Status FSM│  │  backoff  │  │  parsing  │  │   │
//! │  │   │ priority  │  │ codes     │  │  schedule │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    mercato-db (Database Layer)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`event`] - Webhook event classification and dispatch priority
//! - [`order`] - Remote order status state machine
//! - [`retry`] - Capped exponential retry schedule
//! - [`payload`] - Typed webhook payloads with validation
//! - [`money`] - Integer minor-unit money, parsed without floats
//! - [`types`] - Row types shared with the database layer
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use mercato_core::event::EventType;
//! use mercato_core::retry::retry_delay;
//!
//! let kind: EventType = "ORDER_CREATED".parse().unwrap();
//! assert_eq!(kind.priority(), 1);
//!
//! // First failure waits two minutes
//! assert_eq!(retry_delay(0).num_minutes(), 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod event;
pub mod money;
pub mod order;
pub mod payload;
pub mod retry;
pub mod types;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use event::{EventType, UNKNOWN_EVENT_PRIORITY};
pub use money::Money;
pub use order::{OrderStatus, Transition};
pub use retry::retry_delay;
pub use types::*;

// =============================================================================
// Constants
// =============================================================================

/// Processed events older than this are purged.
pub const PROCESSED_RETENTION_DAYS: i64 = 30;

/// Abandoned events (retries exhausted) older than this are purged.
pub const ABANDONED_RETENTION_DAYS: i64 = 7;

/// Fresh events older than this are no longer picked up by the main pass.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Mapped products not pushed for this long are re-sent by the update pass.
pub const UPDATE_STALE_HOURS: i64 = 6;

/// Mapped products not pushed for this long are included in the bulk push.
pub const BULK_STALE_HOURS: i64 = 2;

/// Mappings stuck in `error` longer than this are reset to `pending`.
pub const ERROR_RESET_HOURS: i64 = 24;
