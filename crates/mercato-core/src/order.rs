//! # Remote Order State Machine
//!
//! Status of a marketplace order as reconstructed from webhook events.
//!
//! ## Transitions
//! ```text
//!                ┌────────────────────────────────────────┐
//!                │                                        ▼
//!   Created ──► Approved ──► Shipped ──► Delivered
//!      │           │            │            │
//!      │           │            └─────┬──────┘
//!      ▼           ▼                  ▼
//!   Cancelled ◄────┘           ReturnInitiated
//!   (terminal)                 (side branch)
//! ```
//!
//! - Forward moves along `Created → Approved → Shipped → Delivered` may skip
//!   steps (a shipment event can arrive while the order is still `Created`).
//! - `Cancelled` is only reachable before shipping and never left.
//! - `ReturnInitiated` is only reachable after shipping.
//! - Re-applying the current status is a no-op, which keeps redelivered
//!   events harmless.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle status of a remote order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Approved,
    Shipped,
    Delivered,
    Cancelled,
    ReturnInitiated,
}

/// Outcome of asking whether a status change may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The change is allowed and should be written.
    Apply,
    /// The order is already in the requested status.
    Unchanged,
    /// The change is not in the transition graph (stale or out-of-order event).
    Rejected,
}

impl OrderStatus {
    /// Position on the forward fulfilment path, if the status is on it.
    fn forward_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Created => Some(0),
            OrderStatus::Approved => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled | OrderStatus::ReturnInitiated => None,
        }
    }

    /// Decides whether `self → next` is a legal transition.
    pub fn transition_to(&self, next: OrderStatus) -> Transition {
        if *self == next {
            return Transition::Unchanged;
        }

        let allowed = match (self, next) {
            (OrderStatus::Cancelled, _) => false,
            (OrderStatus::Created | OrderStatus::Approved, OrderStatus::Cancelled) => true,
            (OrderStatus::Shipped | OrderStatus::Delivered, OrderStatus::ReturnInitiated) => true,
            (OrderStatus::ReturnInitiated, _) => false,
            (current, next) => match (current.forward_rank(), next.forward_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        };

        if allowed {
            Transition::Apply
        } else {
            Transition::Rejected
        }
    }

    /// Status code written to a linked local order.
    pub fn local_status_code(&self) -> i64 {
        match self {
            OrderStatus::Created => 1,
            OrderStatus::Approved => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Delivered => 5,
            OrderStatus::Cancelled => 7,
            OrderStatus::ReturnInitiated => 11,
        }
    }

    /// Snake-case name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Approved => "approved",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::ReturnInitiated => "return_initiated",
        }
    }

    /// Human-readable label used in order history notes.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Approved => "Approved",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::ReturnInitiated => "Return Initiated",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    /// Parses marketplace status strings, including the intermediate package
    /// states the marketplace reports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "created" | "awaiting" | "new" => Ok(OrderStatus::Created),
            "approved" | "picking" | "invoiced" => Ok(OrderStatus::Approved),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" | "unsupplied" => Ok(OrderStatus::Cancelled),
            "returninitiated" | "returned" => Ok(OrderStatus::ReturnInitiated),
            _ => Err(CoreError::UnknownOrderStatus(s.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
