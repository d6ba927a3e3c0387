//! # Webhook Event Classification
//!
//! Maps the raw `event_type` string a marketplace delivers onto a closed set of
//! event kinds, and gives each kind its dispatch priority.
//!
//! ## Priority Tiers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tier │ Events                                           │ Why first    │
//! │  ─────┼──────────────────────────────────────────────────┼────────────  │
//! │   1   │ order-created, order-cancelled                   │ money moves  │
//! │   2   │ order-status-changed, shipment-created,          │ fulfilment   │
//! │       │ return-initiated                                 │              │
//! │   3   │ inventory-updated, price-updated                 │ catalog      │
//! │   4   │ product-approved, product-rejected               │ listing      │
//! │   5   │ anything unrecognised                            │ fails anyway │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Aliasing
//! Matching ignores case, `-`, `_` and spaces, so `ORDER_CREATED`,
//! `order-created` and `OrderCreated` are the same kind. A few marketplace
//! spellings (`NewOrder`, `OrderCanceled`, `StockUpdated`, ...) are accepted
//! as well.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Priority assigned to event types that do not parse.
pub const UNKNOWN_EVENT_PRIORITY: i64 = 5;

/// The closed set of webhook event kinds the dispatcher handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    OrderCreated,
    OrderStatusChanged,
    OrderCancelled,
    ShipmentCreated,
    ProductApproved,
    ProductRejected,
    InventoryUpdated,
    PriceUpdated,
    ReturnInitiated,
}

impl EventType {
    /// Every event kind, in declaration order.
    pub const ALL: [EventType; 9] = [
        EventType::OrderCreated,
        EventType::OrderStatusChanged,
        EventType::OrderCancelled,
        EventType::ShipmentCreated,
        EventType::ProductApproved,
        EventType::ProductRejected,
        EventType::InventoryUpdated,
        EventType::PriceUpdated,
        EventType::ReturnInitiated,
    ];

    /// Dispatch priority, lower is more urgent.
    pub fn priority(&self) -> i64 {
        match self {
            EventType::OrderCreated | EventType::OrderCancelled => 1,
            EventType::OrderStatusChanged
            | EventType::ShipmentCreated
            | EventType::ReturnInitiated => 2,
            EventType::InventoryUpdated | EventType::PriceUpdated => 3,
            EventType::ProductApproved | EventType::ProductRejected => 4,
        }
    }

    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order-created",
            EventType::OrderStatusChanged => "order-status-changed",
            EventType::OrderCancelled => "order-cancelled",
            EventType::ShipmentCreated => "shipment-created",
            EventType::ProductApproved => "product-approved",
            EventType::ProductRejected => "product-rejected",
            EventType::InventoryUpdated => "inventory-updated",
            EventType::PriceUpdated => "price-updated",
            EventType::ReturnInitiated => "return-initiated",
        }
    }
}

/// Priority for a raw event type string as delivered.
///
/// Unknown strings get [`UNKNOWN_EVENT_PRIORITY`] so they sort last and fail
/// with an explicit error when dispatched.
pub fn priority_of(raw: &str) -> i64 {
    raw.parse::<EventType>()
        .map(|kind| kind.priority())
        .unwrap_or(UNKNOWN_EVENT_PRIORITY)
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match normalize(s).as_str() {
            "ordercreated" | "neworder" => EventType::OrderCreated,
            "orderstatuschanged" | "orderstatusupdated" | "statuschanged" => {
                EventType::OrderStatusChanged
            }
            "ordercancelled" | "ordercanceled" | "cancelled" => EventType::OrderCancelled,
            "shipmentcreated" | "shipmentpackagecreated" | "shipped" => {
                EventType::ShipmentCreated
            }
            "productapproved" => EventType::ProductApproved,
            "productrejected" => EventType::ProductRejected,
            "inventoryupdated" | "stockupdated" => EventType::InventoryUpdated,
            "priceupdated" => EventType::PriceUpdated,
            "returninitiated" | "returncreated" => EventType::ReturnInitiated,
            _ => return Err(CoreError::UnsupportedEventType(s.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
