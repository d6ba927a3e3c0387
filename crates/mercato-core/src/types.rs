//! # Domain Types
//!
//! Row-shaped types shared between the engine and the database layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Event store              Mapping store            Order store         │
//! │  ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐   │
//! │  │  WebhookEvent   │     │ ProductMapping  │     │  RemoteOrder    │   │
//! │  │  id (UUID)      │     │ local_product_id│     │  order_number   │   │
//! │  │  event_type     │     │ remote id       │     │  status (FSM)   │   │
//! │  │  priority       │     │ sync_status     │     │  local_order_id │   │
//! │  │  retry_count    │     │ flags, stamps   │     │  tracking       │   │
//! │  └─────────────────┘     └─────────────────┘     └─────────────────┘   │
//! │                                                                         │
//! │  Local catalog (read by the synchronizer)                              │
//! │  ┌─────────────────┐     ┌─────────────────┐                           │
//! │  │  LocalProduct   │     │ ProductImage /  │                           │
//! │  │  MappedProduct  │     │ Attribute / Cat │                           │
//! │  └─────────────────┘     └─────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timestamps are always supplied by the caller; nothing in this crate reads
//! the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::EventType;
use crate::money::Money;
use crate::order::OrderStatus;

// =============================================================================
// Webhook Events
// =============================================================================

/// A queued marketplace webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct WebhookEvent {
    /// UUID assigned at intake.
    pub id: String,
    /// Event type exactly as delivered.
    pub event_type: String,
    /// Dispatch priority derived from `event_type` at intake.
    pub priority: i64,
    /// JSON document, stored verbatim.
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    /// Set while a dispatcher owns the event.
    pub processing: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// Classifies the raw event type.
    pub fn kind(&self) -> Result<EventType, crate::error::CoreError> {
        self.event_type.parse()
    }

    /// True once retries are exhausted and the event is never dispatched again.
    pub fn is_abandoned(&self, max_retries: i64) -> bool {
        !self.processed && self.retry_count >= max_retries
    }
}

// =============================================================================
// Product Mappings
// =============================================================================

/// Marketplace-side state of a local product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    /// Uploaded, waiting for marketplace approval.
    Pending,
    /// Approved and live.
    Active,
    /// Last upload attempt failed.
    Error,
    /// Rejected by the marketplace.
    Rejected,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Active => "active",
            MappingStatus::Error => "error",
            MappingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Association between a local product and its marketplace listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductMapping {
    pub local_product_id: i64,
    pub remote_product_id: Option<String>,
    pub barcode: Option<String>,
    pub sync_status: MappingStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_stock_sync_at: Option<DateTime<Utc>>,
    pub last_price_sync_at: Option<DateTime<Utc>>,
    pub images_synced: bool,
    pub attributes_synced: bool,
    pub rejection_reason: Option<String>,
    /// Error from the last individual update push; does not change status.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Remote Orders
// =============================================================================

/// Marketplace order as reconstructed from webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RemoteOrder {
    pub order_number: String,
    /// Set only after explicit conversion to a local order.
    pub local_order_id: Option<i64>,
    pub status: OrderStatus,
    pub gross_amount_cents: i64,
    pub total_discount_cents: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub cargo_provider: Option<String>,
    /// Raw payload of the last event applied to this order.
    pub last_event: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteOrder {
    pub fn gross_amount(&self) -> Money {
        Money::from_cents(self.gross_amount_cents)
    }

    pub fn total_discount(&self) -> Money {
        Money::from_cents(self.total_discount_cents)
    }
}

/// Values for a new remote order row.
#[derive(Debug, Clone)]
pub struct NewRemoteOrder {
    pub order_number: String,
    pub status: OrderStatus,
    pub gross_amount: Money,
    pub total_discount: Money,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    pub raw_event: String,
}

// =============================================================================
// Local Catalog
// =============================================================================

/// A product in the local catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalProduct {
    pub id: i64,
    pub sku: String,
    /// Model code; used as the marketplace main product id when present.
    pub model: Option<String>,
    pub barcode: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub brand_id: Option<i64>,
    pub price_cents: i64,
    pub special_price_cents: Option<i64>,
    pub quantity: i64,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalProduct {
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Price the marketplace should sell at: the special price when set.
    pub fn sale_price(&self) -> Money {
        self.special_price_cents
            .filter(|cents| *cents > 0)
            .map(Money::from_cents)
            .unwrap_or_else(|| self.price())
    }

    /// Barcode sent to the marketplace; falls back to the SKU.
    pub fn marketplace_barcode(&self) -> &str {
        self.barcode
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(&self.sku)
    }

    /// True if the product may be listed at all.
    pub fn is_listable(&self) -> bool {
        self.is_enabled && self.quantity > 0 && self.price_cents > 0
    }
}

/// A local product joined with its mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MappedProduct {
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub product: LocalProduct,
    pub mapping_barcode: Option<String>,
    pub remote_product_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl MappedProduct {
    /// Barcode the marketplace knows this product by.
    pub fn barcode(&self) -> &str {
        self.mapping_barcode
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.product.marketplace_barcode())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductImage {
    pub product_id: i64,
    pub url: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductAttribute {
    pub product_id: i64,
    pub attribute_id: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductCategory {
    pub product_id: i64,
    pub category_id: i64,
    pub name: Option<String>,
}

/// A local order row, written by order conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalOrder {
    pub id: i64,
    pub order_status_id: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub total_cents: i64,
    pub source_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One note in a local order's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderHistoryEntry {
    pub order_id: i64,
    pub order_status_id: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Jobs & Statistics
// =============================================================================

/// The scheduled jobs this engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    WebhookDispatcher,
    ProductSync,
}

impl JobKind {
    /// Name used for run locks and statistics rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::WebhookDispatcher => "webhook_dispatcher",
            JobKind::ProductSync => "product_sync",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated during one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub retried: i64,
    pub uploaded: i64,
    pub updated: i64,
    pub bulk_operations: i64,
    pub api_calls: i64,
}

/// Summary of one finished run, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub job: JobKind,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

/// Persisted per-(job, day) statistics row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DailyJobStats {
    pub job_name: String,
    pub day: String,
    pub runs: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub retried: i64,
    pub uploaded: i64,
    pub updated: i64,
    pub bulk_operations: i64,
    pub api_calls: i64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_duration_ms: i64,
}

/// Persisted per-day webhook queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct WebhookDailyStats {
    pub day: String,
    pub total_received: i64,
    pub total_processed: i64,
    pub total_failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn product() -> LocalProduct {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        LocalProduct {
            id: 1,
            sku: "TEA-500".into(),
            model: None,
            barcode: None,
            name: "Black Tea 500g".into(),
            description: None,
            brand_id: None,
            price_cents: 4500,
            special_price_cents: None,
            quantity: 10,
            is_enabled: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_sale_price_prefers_special() {
        let mut p = product();
        assert_eq!(p.sale_price().cents(), 4500);
        p.special_price_cents = Some(3900);
        assert_eq!(p.sale_price().cents(), 3900);
        p.special_price_cents = Some(0);
        assert_eq!(p.sale_price().cents(), 4500);
    }

    #[test]
    fn test_barcode_falls_back_to_sku() {
        let mut p = product();
        assert_eq!(p.marketplace_barcode(), "TEA-500");
        p.barcode = Some("8690000000017".into());
        assert_eq!(p.marketplace_barcode(), "8690000000017");
    }

    #[test]
    fn test_listable_requires_stock_and_price() {
        let mut p = product();
        assert!(p.is_listable());
        p.quantity = 0;
        assert!(!p.is_listable());
    }
}
