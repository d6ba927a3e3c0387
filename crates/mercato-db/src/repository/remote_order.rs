//! # Remote Order Repository
//!
//! Marketplace orders keyed by order number. Transition rules live in
//! `mercato_core::order`; this layer only stores what the handlers decided.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use mercato_core::{NewRemoteOrder, OrderStatus, RemoteOrder};

const ORDER_COLUMNS: &str = "order_number, local_order_id, status, gross_amount_cents, \
     total_discount_cents, customer_name, customer_email, order_date, tracking_number, \
     cargo_provider, last_event, created_at, updated_at";

/// Repository for remote orders.
#[derive(Debug, Clone)]
pub struct RemoteOrderRepository {
    pool: SqlitePool,
}

impl RemoteOrderRepository {
    /// Creates a new RemoteOrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RemoteOrderRepository { pool }
    }

    /// Inserts the order unless one with the same number already exists.
    ///
    /// Returns `false` for a redelivered creation event.
    pub async fn insert_if_absent(&self, order: &NewRemoteOrder, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO remote_orders (
                order_number, status, gross_amount_cents, total_discount_cents,
                customer_name, customer_email, order_date, last_event,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(&order.order_number)
        .bind(order.status)
        .bind(order.gross_amount.cents())
        .bind(order.total_discount.cents())
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(order.order_date)
        .bind(&order.raw_event)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(order_number = %order.order_number, inserted, "Remote order insert");
        Ok(inserted)
    }

    /// Gets an order by marketplace order number.
    pub async fn get(&self, order_number: &str) -> DbResult<Option<RemoteOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM remote_orders WHERE order_number = ?1");
        let order = sqlx::query_as::<_, RemoteOrder>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Writes a new status along with the event that caused it.
    pub async fn update_status(
        &self,
        order_number: &str,
        status: OrderStatus,
        raw_event: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE remote_orders
            SET status = ?2, last_event = ?3, updated_at = ?4
            WHERE order_number = ?1
            "#,
        )
        .bind(order_number)
        .bind(status)
        .bind(raw_event)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Records shipment details and moves the order to `shipped`.
    pub async fn set_shipment(
        &self,
        order_number: &str,
        tracking_number: Option<&str>,
        cargo_provider: Option<&str>,
        raw_event: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE remote_orders
            SET status = ?2,
                tracking_number = COALESCE(?3, tracking_number),
                cargo_provider = COALESCE(?4, cargo_provider),
                last_event = ?5,
                updated_at = ?6
            WHERE order_number = ?1
            "#,
        )
        .bind(order_number)
        .bind(OrderStatus::Shipped)
        .bind(tracking_number)
        .bind(cargo_provider)
        .bind(raw_event)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Links the order to the local order it was converted into.
    pub async fn link_local_order(
        &self,
        order_number: &str,
        local_order_id: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE remote_orders SET local_order_id = ?2, updated_at = ?3 WHERE order_number = ?1",
        )
        .bind(order_number)
        .bind(local_order_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use mercato_core::{Money, NewRemoteOrder, OrderStatus};

    fn new_order(number: &str) -> NewRemoteOrder {
        NewRemoteOrder {
            order_number: number.to_string(),
            status: OrderStatus::Created,
            gross_amount: Money::from_cents(12_990),
            total_discount: Money::from_cents(1_000),
            customer_name: Some("Ayse Demir".into()),
            customer_email: None,
            order_date: None,
            raw_event: r#"{"orderNumber":"A-1"}"#.into(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.remote_orders();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert!(repo.insert_if_absent(&new_order("A-1"), now).await.unwrap());
        assert!(!repo.insert_if_absent(&new_order("A-1"), now).await.unwrap());

        let order = repo.get("A-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.gross_amount().cents(), 12_990);
    }

    #[tokio::test]
    async fn test_shipment_keeps_existing_tracking_when_absent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.remote_orders();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        repo.insert_if_absent(&new_order("A-2"), now).await.unwrap();
        repo.set_shipment("A-2", Some("TRK1"), Some("Yurtici"), "{}", now)
            .await
            .unwrap();
        repo.set_shipment("A-2", None, None, "{}", now).await.unwrap();

        let order = repo.get("A-2").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.tracking_number.as_deref(), Some("TRK1"));
        assert!(!repo.update_status("missing", OrderStatus::Approved, "{}", now).await.unwrap());
    }
}
