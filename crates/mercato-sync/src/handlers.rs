//! # Webhook Event Handlers
//!
//! Applies one queued marketplace event to local state.
//!
//! ## Dispatch Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ORDER EVENTS (remote order FSM, propagated to a linked local order)   │
//! │  ─────────────                                                         │
//! │  order-created         insert-if-absent (+ optional conversion)        │
//! │  order-status-changed  transition to payload status                    │
//! │  order-cancelled       transition to Cancelled                         │
//! │  shipment-created      transition to Shipped + tracking details        │
//! │  return-initiated      transition to ReturnInitiated                   │
//! │                                                                         │
//! │  PRODUCT EVENTS (mapping by barcode)                                   │
//! │  ──────────────                                                        │
//! │  product-approved      mapping → active                                │
//! │  product-rejected      mapping → rejected (+ reason)                   │
//! │  inventory-updated     local quantity, stock-sync stamp                │
//! │  price-updated         local price / special price, price-sync stamp   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A handler error is recorded against the event and retried later; it never
//! aborts the run.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mercato_core::payload::{
    Cancellation, Document, InventoryChange, OrderCreated, PriceChange, ProductDecision,
    ReturnRequest, Shipment, StatusChange,
};
use mercato_core::{EventType, Money, NewRemoteOrder, OrderStatus, Transition, WebhookEvent};
use mercato_db::{Database, DbError, NewLocalOrder};

use crate::config::FeatureFlags;
use crate::error::{SyncError, SyncResult};

/// Routes events to the handler for their type.
#[derive(Debug, Clone)]
pub struct EventHandlers {
    db: Database,
    auto_convert_orders: bool,
}

impl EventHandlers {
    pub fn new(db: Database, features: &FeatureFlags) -> Self {
        EventHandlers {
            db,
            auto_convert_orders: features.auto_convert_orders,
        }
    }

    /// Handles one event. `Ok` means the event is resolved.
    pub async fn handle(&self, event: &WebhookEvent, now: DateTime<Utc>) -> SyncResult<()> {
        let kind = event.kind()?;
        let doc = Document::parse(&event.payload)?;
        let raw = event.payload.as_str();

        debug!(id = %event.id, kind = %kind, "Handling webhook event");

        match kind {
            EventType::OrderCreated => self.order_created(&OrderCreated::from_document(&doc)?, raw, now).await,
            EventType::OrderStatusChanged => {
                let change = StatusChange::from_document(&doc)?;
                let note = format!("Status changed to {}", change.status.label());
                self.transition(&change.order_number, change.status, raw, &note, now)
                    .await
            }
            EventType::OrderCancelled => {
                let cancel = Cancellation::from_document(&doc)?;
                self.transition(&cancel.order_number, OrderStatus::Cancelled, raw, "Order cancelled", now)
                    .await
            }
            EventType::ShipmentCreated => self.shipment(&Shipment::from_document(&doc)?, raw, now).await,
            EventType::ReturnInitiated => {
                let request = ReturnRequest::from_document(&doc)?;
                let note = format!("Return initiated: {}", request.reason);
                self.transition(&request.order_number, OrderStatus::ReturnInitiated, raw, &note, now)
                    .await
            }
            EventType::ProductApproved => self.product_approved(&ProductDecision::from_document(&doc)?, now).await,
            EventType::ProductRejected => self.product_rejected(&ProductDecision::from_document(&doc)?, now).await,
            EventType::InventoryUpdated => self.inventory(&InventoryChange::from_document(&doc)?, now).await,
            EventType::PriceUpdated => self.price(&PriceChange::from_document(&doc)?, now).await,
        }
    }

    // =========================================================================
    // Orders
    // =========================================================================

    async fn order_created(&self, created: &OrderCreated, raw: &str, now: DateTime<Utc>) -> SyncResult<()> {
        let order = NewRemoteOrder {
            order_number: created.order_number.clone(),
            status: created.status,
            gross_amount: created.gross_amount,
            total_discount: created.total_discount,
            customer_name: created.customer_name.clone(),
            customer_email: created.customer_email.clone(),
            order_date: created.order_date,
            raw_event: raw.to_string(),
        };

        let orders = self.db.remote_orders();
        if orders.insert_if_absent(&order, now).await? {
            info!(
                order_number = %created.order_number,
                status = %created.status.as_str(),
                "Remote order recorded"
            );
        } else {
            debug!(order_number = %created.order_number, "Order already recorded");
        }

        if !self.auto_convert_orders {
            return Ok(());
        }

        // A redelivery after a failed conversion still has to finish it.
        let linked = orders
            .get(&created.order_number)
            .await?
            .and_then(|o| o.local_order_id);
        if linked.is_some() {
            return Ok(());
        }
        self.convert(created, now).await
    }

    /// Links the remote order to its local order, creating the local order
    /// unless an earlier attempt already did.
    async fn convert(&self, created: &OrderCreated, now: DateTime<Utc>) -> SyncResult<()> {
        let catalog = self.db.catalog();
        if let Some(existing) = catalog.find_order_by_source(&created.order_number).await? {
            self.db
                .remote_orders()
                .link_local_order(&created.order_number, existing.id, now)
                .await?;
            info!(
                order_number = %created.order_number,
                local_order_id = existing.id,
                "Order linked to existing local order"
            );
            return Ok(());
        }

        let total = Money::from_cents(created.gross_amount.cents() - created.total_discount.cents());
        let local = NewLocalOrder {
            order_status_id: OrderStatus::Created.local_status_code(),
            customer_name: created.customer_name.clone(),
            customer_email: created.customer_email.clone(),
            total,
            source_reference: created.order_number.clone(),
        };
        let note = format!("Imported from marketplace order {}", created.order_number);

        let local_id = catalog.create_local_order(&local, &note, now).await?;
        self.db
            .remote_orders()
            .link_local_order(&created.order_number, local_id, now)
            .await?;

        info!(order_number = %created.order_number, local_order_id = local_id, "Order converted");
        Ok(())
    }

    async fn shipment(&self, shipment: &Shipment, raw: &str, now: DateTime<Utc>) -> SyncResult<()> {
        let note = match (&shipment.tracking_number, &shipment.cargo_provider) {
            (Some(tracking), Some(provider)) => {
                format!("Shipment created. Tracking: {} ({})", tracking, provider)
            }
            (Some(tracking), None) => format!("Shipment created. Tracking: {}", tracking),
            _ => "Shipment created.".to_string(),
        };
        self.apply(&shipment.order_number, OrderStatus::Shipped, raw, &note, Some(shipment), now)
            .await
    }

    async fn transition(
        &self,
        order_number: &str,
        next: OrderStatus,
        raw: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.apply(order_number, next, raw, note, None, now).await
    }

    /// Moves a remote order along the FSM and mirrors the result locally.
    async fn apply(
        &self,
        order_number: &str,
        next: OrderStatus,
        raw: &str,
        note: &str,
        shipment: Option<&Shipment>,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let orders = self.db.remote_orders();
        let order = orders
            .get(order_number)
            .await?
            .ok_or_else(|| SyncError::OrderNotFound(order_number.to_string()))?;

        match order.status.transition_to(next) {
            Transition::Apply => {}
            Transition::Unchanged => {
                debug!(order_number, status = %next.as_str(), "Order already in status");
                return Ok(());
            }
            Transition::Rejected => {
                warn!(
                    order_number,
                    from = %order.status.as_str(),
                    to = %next.as_str(),
                    "Ignoring out-of-order status transition"
                );
                return Ok(());
            }
        }

        match shipment {
            Some(s) => {
                orders
                    .set_shipment(
                        order_number,
                        s.tracking_number.as_deref(),
                        s.cargo_provider.as_deref(),
                        raw,
                        now,
                    )
                    .await?;
            }
            None => {
                orders.update_status(order_number, next, raw, now).await?;
            }
        }

        info!(
            order_number,
            from = %order.status.as_str(),
            to = %next.as_str(),
            "Order status updated"
        );

        if let Some(local_id) = order.local_order_id {
            let result = self
                .db
                .catalog()
                .update_order_status(local_id, next.local_status_code(), note, now)
                .await;
            match result {
                Ok(()) => {}
                Err(DbError::NotFound { .. }) => {
                    warn!(order_number, local_order_id = local_id, "Linked local order no longer exists");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    async fn product_approved(&self, decision: &ProductDecision, now: DateTime<Utc>) -> SyncResult<()> {
        let changed = self.db.mappings().approve_by_barcode(&decision.barcode, now).await?;
        if changed == 0 {
            warn!(barcode = %decision.barcode, "Approval for unknown barcode");
        } else {
            info!(barcode = %decision.barcode, "Product approved");
        }
        Ok(())
    }

    async fn product_rejected(&self, decision: &ProductDecision, now: DateTime<Utc>) -> SyncResult<()> {
        let reason = decision.reason_or_default();
        let changed = self
            .db
            .mappings()
            .reject_by_barcode(&decision.barcode, reason, now)
            .await?;
        if changed == 0 {
            warn!(barcode = %decision.barcode, "Rejection for unknown barcode");
        } else {
            warn!(barcode = %decision.barcode, reason, "Product rejected");
        }
        Ok(())
    }

    async fn inventory(&self, change: &InventoryChange, now: DateTime<Utc>) -> SyncResult<()> {
        if self.db.mappings().touch_stock_sync(&change.barcode, now).await? == 0 {
            warn!(barcode = %change.barcode, "Inventory update for unknown barcode");
            return Ok(());
        }

        let products = self
            .db
            .catalog()
            .set_quantity_by_barcode(&change.barcode, change.quantity)
            .await?;
        debug!(barcode = %change.barcode, quantity = change.quantity, products, "Stock updated");
        Ok(())
    }

    async fn price(&self, change: &PriceChange, now: DateTime<Utc>) -> SyncResult<()> {
        if self.db.mappings().touch_price_sync(&change.barcode, now).await? == 0 {
            warn!(barcode = %change.barcode, "Price update for unknown barcode");
            return Ok(());
        }

        let products = self
            .db
            .catalog()
            .set_prices_by_barcode(&change.barcode, change.list_price, change.special_price())
            .await?;
        debug!(
            barcode = %change.barcode,
            list_price = %change.list_price,
            sale_price = %change.sale_price,
            products,
            "Price updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercato_core::MappingStatus;
    use mercato_db::{DbConfig, NewProduct};

    async fn setup(auto_convert: bool) -> (Database, EventHandlers) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let features = FeatureFlags {
            auto_convert_orders: auto_convert,
            ..FeatureFlags::default()
        };
        let handlers = EventHandlers::new(db.clone(), &features);
        (db, handlers)
    }

    async fn deliver(db: &Database, handlers: &EventHandlers, kind: &str, payload: &str) -> SyncResult<()> {
        let now = Utc::now();
        let event = db.webhook_events().enqueue(kind, payload, now).await.unwrap();
        handlers.handle(&event, now).await
    }

    /// Product with an approved mapping under `barcode`.
    async fn mapped_product(db: &Database, barcode: &str, quantity: i64) -> i64 {
        let now = Utc::now();
        let id = db
            .catalog()
            .insert_product(&NewProduct::new("SKU-1", "Kettle", Money::from_cents(12990), quantity), now)
            .await
            .unwrap();
        db.mappings().record_upload(id, Some("R-1"), barcode, now).await.unwrap();
        db.mappings().approve_by_barcode(barcode, now).await.unwrap();
        id
    }

    const CREATED: &str = r#"{
        "orderNumber": "TY-1001",
        "grossAmount": "250.00",
        "totalDiscount": 25.5,
        "customerFirstName": "Ayla",
        "customerLastName": "Demir",
        "customerEmail": "ayla@example.com",
        "orderDate": 1717243200000
    }"#;

    #[tokio::test]
    async fn test_order_created_is_idempotent() {
        let (db, handlers) = setup(false).await;

        deliver(&db, &handlers, "ORDER_CREATED", CREATED).await.unwrap();
        deliver(&db, &handlers, "ORDER_CREATED", CREATED).await.unwrap();

        let order = db.remote_orders().get("TY-1001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.gross_amount().cents(), 25000);
        assert_eq!(order.total_discount().cents(), 2550);
        assert_eq!(order.customer_name.as_deref(), Some("Ayla Demir"));
        assert_eq!(order.local_order_id, None);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM remote_orders")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    async fn local_order_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_conversion_retried_after_failure() {
        let (db, handlers) = setup(true).await;
        let now = Utc::now();
        let event = db
            .webhook_events()
            .enqueue("ORDER_CREATED", r#"{"orderNumber": "TY-9", "grossAmount": 40}"#, now)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TRIGGER block_orders BEFORE INSERT ON orders \
             BEGIN SELECT RAISE(ABORT, 'orders blocked'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(handlers.handle(&event, now).await.is_err());
        let order = db.remote_orders().get("TY-9").await.unwrap().unwrap();
        assert_eq!(order.local_order_id, None);
        assert_eq!(local_order_count(&db).await, 0);

        sqlx::query("DROP TRIGGER block_orders")
            .execute(db.pool())
            .await
            .unwrap();

        handlers.handle(&event, now).await.unwrap();
        let order = db.remote_orders().get("TY-9").await.unwrap().unwrap();
        let local_id = order.local_order_id.expect("converted on retry");
        let local = db.catalog().get_order(local_id).await.unwrap().unwrap();
        assert_eq!(local.source_reference.as_deref(), Some("TY-9"));
        assert_eq!(local_order_count(&db).await, 1);

        // Further redeliveries change nothing
        handlers.handle(&event, now).await.unwrap();
        assert_eq!(local_order_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_conversion_links_orphaned_local_order() {
        let (db, handlers) = setup(true).await;
        let orphan = db
            .catalog()
            .create_local_order(
                &NewLocalOrder {
                    order_status_id: 1,
                    customer_name: None,
                    customer_email: None,
                    total: Money::from_cents(4000),
                    source_reference: "TY-10".into(),
                },
                "Imported from marketplace order TY-10",
                Utc::now(),
            )
            .await
            .unwrap();

        deliver(&db, &handlers, "ORDER_CREATED", r#"{"orderNumber": "TY-10"}"#)
            .await
            .unwrap();

        let order = db.remote_orders().get("TY-10").await.unwrap().unwrap();
        assert_eq!(order.local_order_id, Some(orphan));
        assert_eq!(local_order_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_status_change_for_unknown_order_fails() {
        let (db, handlers) = setup(false).await;
        let err = deliver(
            &db,
            &handlers,
            "ORDER_STATUS_CHANGED",
            r#"{"orderNumber": "TY-404", "status": "Picking"}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::OrderNotFound(n) if n == "TY-404"));
    }

    #[tokio::test]
    async fn test_lifecycle_propagates_to_local_order() {
        let (db, handlers) = setup(true).await;
        deliver(&db, &handlers, "ORDER_CREATED", CREATED).await.unwrap();

        let order = db.remote_orders().get("TY-1001").await.unwrap().unwrap();
        let local_id = order.local_order_id.expect("converted");
        let local = db.catalog().get_order(local_id).await.unwrap().unwrap();
        assert_eq!(local.order_status_id, 1);
        assert_eq!(local.total_cents, 22450);

        deliver(
            &db,
            &handlers,
            "SHIPMENT_CREATED",
            r#"{"orderNumber": "TY-1001", "trackingNumber": "T-77", "cargoProviderName": "Yurtici"}"#,
        )
        .await
        .unwrap();
        deliver(
            &db,
            &handlers,
            "RETURN_INITIATED",
            r#"{"orderNumber": "TY-1001"}"#,
        )
        .await
        .unwrap();

        let order = db.remote_orders().get("TY-1001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::ReturnInitiated);
        assert_eq!(order.tracking_number.as_deref(), Some("T-77"));
        assert_eq!(order.cargo_provider.as_deref(), Some("Yurtici"));

        let local = db.catalog().get_order(local_id).await.unwrap().unwrap();
        assert_eq!(local.order_status_id, 11);

        let notes: Vec<String> = db
            .catalog()
            .order_history(local_id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.comment)
            .collect();
        assert_eq!(notes[1], "Shipment created. Tracking: T-77 (Yurtici)");
        assert_eq!(notes[2], "Return initiated: Customer return");
    }

    #[tokio::test]
    async fn test_out_of_order_transition_is_ignored() {
        let (db, handlers) = setup(false).await;
        deliver(&db, &handlers, "ORDER_CREATED", CREATED).await.unwrap();
        deliver(&db, &handlers, "ORDER_CANCELLED", r#"{"orderNumber": "TY-1001"}"#)
            .await
            .unwrap();

        // Cancelled is terminal; a late shipment still resolves
        deliver(&db, &handlers, "SHIPMENT_CREATED", r#"{"orderNumber": "TY-1001", "trackingNumber": "T-1"}"#)
            .await
            .unwrap();

        let order = db.remote_orders().get("TY-1001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.tracking_number, None);
    }

    #[tokio::test]
    async fn test_product_decisions() {
        let (db, handlers) = setup(false).await;
        let now = Utc::now();
        let id = db
            .catalog()
            .insert_product(&NewProduct::new("SKU-9", "Lamp", Money::from_cents(5000), 2), now)
            .await
            .unwrap();
        db.mappings().record_upload(id, None, "B9", now).await.unwrap();

        deliver(&db, &handlers, "PRODUCT_REJECTED", r#"{"barcode": "B9"}"#).await.unwrap();
        let mapping = db.mappings().get(id).await.unwrap().unwrap();
        assert_eq!(mapping.sync_status, MappingStatus::Rejected);
        assert_eq!(mapping.rejection_reason.as_deref(), Some("No reason provided"));

        deliver(&db, &handlers, "PRODUCT_APPROVED", r#"{"barcode": "B9"}"#).await.unwrap();
        let mapping = db.mappings().get(id).await.unwrap().unwrap();
        assert_eq!(mapping.sync_status, MappingStatus::Active);
        assert_eq!(mapping.rejection_reason, None);
    }

    #[tokio::test]
    async fn test_price_update() {
        let (db, handlers) = setup(false).await;
        let id = mapped_product(&db, "B1", 3).await;

        deliver(&db, &handlers, "PRICE_UPDATED", r#"{"barcode": "B1", "listPrice": "149.90", "salePrice": 119.9}"#)
            .await
            .unwrap();
        let product = db.catalog().get_product(id).await.unwrap().unwrap();
        assert_eq!(product.price_cents, 14990);
        assert_eq!(product.special_price_cents, Some(11990));

        deliver(&db, &handlers, "PRICE_UPDATED", r#"{"barcode": "B1", "list_price": 99}"#)
            .await
            .unwrap();
        let product = db.catalog().get_product(id).await.unwrap().unwrap();
        assert_eq!(product.price_cents, 9900);
        assert_eq!(product.special_price_cents, None);

        let mapping = db.mappings().get(id).await.unwrap().unwrap();
        assert!(mapping.last_price_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_barcode_resolves() {
        let (db, handlers) = setup(false).await;
        deliver(&db, &handlers, "INVENTORY_UPDATED", r#"{"barcode": "NOPE", "quantity": 4}"#)
            .await
            .unwrap();
        deliver(&db, &handlers, "PRODUCT_APPROVED", r#"{"barcode": "NOPE"}"#)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_and_malformed_events_fail() {
        let (db, handlers) = setup(false).await;

        let err = deliver(&db, &handlers, "ORDER_TELEPORTED", "{}").await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported event type: ORDER_TELEPORTED");

        assert!(deliver(&db, &handlers, "ORDER_CREATED", "not json").await.is_err());
        assert!(deliver(&db, &handlers, "INVENTORY_UPDATED", r#"{"barcode": "B1"}"#).await.is_err());
    }
}
