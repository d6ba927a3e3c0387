//! # Webhook Payloads
//!
//! Typed views over the JSON documents marketplace webhooks carry, with the
//! field checks each handler relies on.
//!
//! ## Key Spellings
//! The marketplace sends camelCase keys (`orderNumber`, `trackingNumber`);
//! payloads entered by hand or replayed from other tools often use
//! snake_case. Every field lookup accepts both.
//!
//! ## Usage
//! ```rust
//! use mercato_core::payload::{Document, InventoryChange};
//!
//! let doc = Document::parse(r#"{"barcode": "B1", "quantity": 7}"#).unwrap();
//! let change = InventoryChange::from_document(&doc).unwrap();
//! assert_eq!(change.quantity, 7);
//! ```

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::order::OrderStatus;

/// Longest accepted order number or barcode.
pub const MAX_KEY_LEN: usize = 64;

// =============================================================================
// Document
// =============================================================================

/// A parsed webhook payload object.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Parses raw payload text; the top level must be a JSON object.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| CoreError::InvalidPayload {
            event_type: "webhook".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_value(value)
    }

    /// Wraps an already-parsed JSON value.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(fields) => Ok(Document { fields }),
            other => Err(CoreError::InvalidPayload {
                event_type: "webhook".to_string(),
                reason: format!("expected an object, got {}", type_name(&other)),
            }),
        }
    }

    fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|k| self.fields.get(*k))
            .find(|v| !v.is_null())
    }

    /// Non-empty trimmed text; numbers are accepted and stringified.
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        match self.lookup(keys)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required_key(&self, field: &str, keys: &[&str]) -> CoreResult<String> {
        let value = self
            .text(keys)
            .ok_or_else(|| ValidationError::required(field))?;
        if value.len() > MAX_KEY_LEN {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max: MAX_KEY_LEN,
            }
            .into());
        }
        Ok(value)
    }

    /// Integer field; numeric strings are accepted.
    pub fn integer(&self, field: &str, keys: &[&str]) -> CoreResult<Option<i64>> {
        let Some(value) = self.lookup(keys) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| {
            ValidationError::InvalidFormat {
                field: field.to_string(),
                reason: format!("expected an integer, got {}", value),
            }
            .into()
        })
    }

    /// Decimal amount field.
    pub fn money(&self, keys: &[&str]) -> CoreResult<Option<Money>> {
        self.lookup(keys).map(Money::from_json).transpose()
    }

    fn order_number(&self) -> CoreResult<String> {
        self.required_key("orderNumber", &["orderNumber", "order_number"])
    }

    fn barcode(&self) -> CoreResult<String> {
        self.required_key("barcode", &["barcode"])
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Order Payloads
// =============================================================================

/// Payload of an order-created event.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCreated {
    pub order_number: String,
    pub status: OrderStatus,
    pub gross_amount: Money,
    pub total_discount: Money,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
}

impl OrderCreated {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let order_number = doc.order_number()?;

        let status = match doc.text(&["status"]) {
            Some(s) => s.parse::<OrderStatus>()?,
            None => OrderStatus::Created,
        };

        let first = doc.text(&["customerFirstName", "customer_first_name"]);
        let last = doc.text(&["customerLastName", "customer_last_name"]);
        let customer_name = match (first, last) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(name), None) | (None, Some(name)) => Some(name),
            (None, None) => doc.text(&["customerName", "customer_name"]),
        };

        let order_date = doc
            .integer("orderDate", &["orderDate", "order_date"])?
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(OrderCreated {
            order_number,
            status,
            gross_amount: doc
                .money(&["grossAmount", "gross_amount"])?
                .unwrap_or(Money::ZERO),
            total_discount: doc
                .money(&["totalDiscount", "total_discount"])?
                .unwrap_or(Money::ZERO),
            customer_name,
            customer_email: doc.text(&["customerEmail", "customer_email"]),
            order_date,
        })
    }
}

/// Payload of an order-status-changed event.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub order_number: String,
    pub status: OrderStatus,
}

impl StatusChange {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let order_number = doc.order_number()?;
        let status = doc
            .text(&["status", "shipmentPackageStatus"])
            .ok_or_else(|| ValidationError::required("status"))?
            .parse::<OrderStatus>()?;
        Ok(StatusChange {
            order_number,
            status,
        })
    }
}

/// Payload of an order-cancelled event.
#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub order_number: String,
}

impl Cancellation {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(Cancellation {
            order_number: doc.order_number()?,
        })
    }
}

/// Payload of a shipment-created event.
#[derive(Debug, Clone, PartialEq)]
pub struct Shipment {
    pub order_number: String,
    pub tracking_number: Option<String>,
    pub cargo_provider: Option<String>,
}

impl Shipment {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(Shipment {
            order_number: doc.order_number()?,
            tracking_number: doc.text(&["trackingNumber", "tracking_number", "cargoTrackingNumber"]),
            cargo_provider: doc.text(&["cargoProviderName", "cargo_provider", "cargoProvider"]),
        })
    }
}

/// Payload of a return-initiated event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnRequest {
    pub order_number: String,
    pub reason: String,
}

impl ReturnRequest {
    pub const DEFAULT_REASON: &'static str = "Customer return";

    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(ReturnRequest {
            order_number: doc.order_number()?,
            reason: doc
                .text(&["returnReason", "return_reason", "reason"])
                .unwrap_or_else(|| Self::DEFAULT_REASON.to_string()),
        })
    }
}

// =============================================================================
// Product Payloads
// =============================================================================

/// Payload of a product-approved or product-rejected event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDecision {
    pub barcode: String,
    pub rejection_reason: Option<String>,
}

impl ProductDecision {
    pub const DEFAULT_REJECTION: &'static str = "No reason provided";

    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        Ok(ProductDecision {
            barcode: doc.barcode()?,
            rejection_reason: doc.text(&["rejectionReason", "rejection_reason", "reason"]),
        })
    }

    /// Rejection reason with the default filled in.
    pub fn reason_or_default(&self) -> &str {
        self.rejection_reason
            .as_deref()
            .unwrap_or(Self::DEFAULT_REJECTION)
    }
}

/// Payload of an inventory-updated event.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryChange {
    pub barcode: String,
    /// Never negative; negative stock reports are clamped to zero.
    pub quantity: i64,
}

impl InventoryChange {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let barcode = doc.barcode()?;
        let quantity = doc
            .integer("quantity", &["quantity", "stock"])?
            .ok_or_else(|| ValidationError::required("quantity"))?;
        Ok(InventoryChange {
            barcode,
            quantity: quantity.max(0),
        })
    }
}

/// Payload of a price-updated event.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub barcode: String,
    pub list_price: Money,
    pub sale_price: Money,
}

impl PriceChange {
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let barcode = doc.barcode()?;
        let list_price = doc
            .money(&["listPrice", "list_price"])?
            .ok_or_else(|| ValidationError::required("listPrice"))?;
        let sale_price = doc
            .money(&["salePrice", "sale_price"])?
            .unwrap_or(list_price);

        if list_price.cents() < 0 || sale_price.cents() < 0 {
            return Err(ValidationError::Negative {
                field: "price".to_string(),
            }
            .into());
        }

        Ok(PriceChange {
            barcode,
            list_price,
            sale_price,
        })
    }

    /// Special price to store locally: the sale price when it differs.
    pub fn special_price(&self) -> Option<Money> {
        (self.sale_price != self.list_price).then_some(self.sale_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(raw: &str) -> Document {
        Document::parse(raw).unwrap()
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(Document::parse("[1,2]").is_err());
        assert!(Document::parse("not json").is_err());
    }

    #[test]
    fn test_order_created_fields() {
        let created = OrderCreated::from_document(&doc(
            r#"{
                "orderNumber": "TY-1001",
                "grossAmount": 259.8,
                "totalDiscount": 20,
                "customerFirstName": "Ada",
                "customerLastName": "Yilmaz",
                "customerEmail": "ada@example.com",
                "orderDate": 1717243200000
            }"#,
        ))
        .unwrap();

        assert_eq!(created.order_number, "TY-1001");
        assert_eq!(created.status, OrderStatus::Created);
        assert_eq!(created.gross_amount.cents(), 25980);
        assert_eq!(created.total_discount.cents(), 2000);
        assert_eq!(created.customer_name.as_deref(), Some("Ada Yilmaz"));
        assert_eq!(
            created.order_date.map(|d| d.timestamp_millis()),
            Some(1717243200000)
        );
    }

    #[test]
    fn test_order_number_required() {
        let err = OrderCreated::from_document(&doc(r#"{"grossAmount": 10}"#)).unwrap_err();
        assert!(err.to_string().contains("orderNumber is required"));
    }

    #[test]
    fn test_snake_case_keys_accepted() {
        let change = StatusChange::from_document(&doc(
            r#"{"order_number": 555, "status": "Delivered"}"#,
        ))
        .unwrap();
        assert_eq!(change.order_number, "555");
        assert_eq!(change.status, OrderStatus::Delivered);
    }

    #[test]
    fn test_inventory_quantity_clamped() {
        let change =
            InventoryChange::from_document(&doc(r#"{"barcode": "B1", "quantity": -4}"#)).unwrap();
        assert_eq!(change.quantity, 0);

        assert!(InventoryChange::from_document(&doc(r#"{"barcode": "B1"}"#)).is_err());
        assert!(
            InventoryChange::from_document(&doc(r#"{"barcode": "B1", "quantity": "lots"}"#))
                .is_err()
        );
    }

    #[test]
    fn test_price_special_only_when_different() {
        let same = PriceChange::from_document(&doc(
            r#"{"barcode": "B1", "listPrice": 100, "salePrice": 100}"#,
        ))
        .unwrap();
        assert_eq!(same.special_price(), None);

        let discounted = PriceChange::from_document(&doc(
            r#"{"barcode": "B1", "listPrice": 100, "salePrice": 79.9}"#,
        ))
        .unwrap();
        assert_eq!(discounted.special_price().map(|m| m.cents()), Some(7990));
    }

    #[test]
    fn test_defaults_for_reasons() {
        let ret = ReturnRequest::from_document(&doc(r#"{"orderNumber": "A"}"#)).unwrap();
        assert_eq!(ret.reason, "Customer return");

        let decision = ProductDecision::from_document(&doc(r#"{"barcode": "B1"}"#)).unwrap();
        assert_eq!(decision.reason_or_default(), "No reason provided");
    }
}
