//! # Catalog Repository
//!
//! The local side of the reconciliation: products the synchronizer reads and
//! orders the webhook handlers write back into.
//!
//! ## Candidate Queries
//! ```text
//! list_unmapped_products   enabled, qty > 0, price > 0, no mapping, newest first
//! list_updated_products    active mapping AND (modified since last push
//!                          OR never pushed OR pushed before stale cutoff)
//! list_bulk_candidates     active mapping AND (never pushed OR before cutoff)
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use mercato_core::{
    LocalOrder, LocalProduct, MappedProduct, MappingStatus, Money, OrderHistoryEntry,
    ProductAttribute, ProductCategory, ProductImage,
};

const PRODUCT_COLUMNS: &str = "p.id, p.sku, p.model, p.barcode, p.name, p.description, p.brand_id, \
     p.price_cents, p.special_price_cents, p.quantity, p.is_enabled, p.created_at, p.updated_at";

const ORDER_COLUMNS: &str = "id, order_status_id, customer_name, customer_email, total_cents, \
     source_reference, created_at, updated_at";

/// Values for a new catalog product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub model: Option<String>,
    pub barcode: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub brand_id: Option<i64>,
    pub price: Money,
    pub special_price: Option<Money>,
    pub quantity: i64,
    pub is_enabled: bool,
}

impl NewProduct {
    /// An enabled product with only the required fields set.
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: Money, quantity: i64) -> Self {
        NewProduct {
            sku: sku.into(),
            model: None,
            barcode: None,
            name: name.into(),
            description: None,
            brand_id: None,
            price,
            special_price: None,
            quantity,
            is_enabled: true,
        }
    }
}

/// Values for a local order converted from a marketplace order.
#[derive(Debug, Clone)]
pub struct NewLocalOrder {
    pub order_status_id: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub total: Money,
    /// Marketplace order number.
    pub source_reference: String,
}

/// Repository for the local catalog and order store.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Inserts a product and returns its id.
    pub async fn insert_product(&self, product: &NewProduct, now: DateTime<Utc>) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO products (
                sku, model, barcode, name, description, brand_id,
                price_cents, special_price_cents, quantity, is_enabled,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
        )
        .bind(&product.sku)
        .bind(&product.model)
        .bind(&product.barcode)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.brand_id)
        .bind(product.price.cents())
        .bind(product.special_price.map(|p| p.cents()))
        .bind(product.quantity)
        .bind(product.is_enabled)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, sku = %product.sku, "Product inserted");
        Ok(id)
    }

    /// Gets a product by id.
    pub async fn get_product(&self, id: i64) -> DbResult<Option<LocalProduct>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?1");
        let product = sqlx::query_as::<_, LocalProduct>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn count_products(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Stamps a product as modified.
    pub async fn touch_product(&self, id: i64, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE products SET updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Listable products that have never been offered to the marketplace.
    pub async fn list_unmapped_products(&self, limit: i64) -> DbResult<Vec<LocalProduct>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p \
             LEFT JOIN product_mappings m ON m.local_product_id = p.id \
             WHERE m.local_product_id IS NULL \
               AND p.is_enabled = 1 AND p.quantity > 0 AND p.price_cents > 0 \
             ORDER BY p.created_at DESC, p.id DESC \
             LIMIT ?1"
        );
        let products = sqlx::query_as::<_, LocalProduct>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Active listings whose local data changed or whose last push is stale.
    pub async fn list_updated_products(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> DbResult<Vec<MappedProduct>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS}, m.barcode AS mapping_barcode, m.remote_product_id, m.last_sync_at \
             FROM products p \
             JOIN product_mappings m ON m.local_product_id = p.id \
             WHERE m.sync_status = ?1 \
               AND p.is_enabled = 1 \
               AND (m.last_sync_at IS NULL OR p.updated_at > m.last_sync_at OR m.last_sync_at < ?2) \
             ORDER BY p.updated_at DESC, p.id DESC \
             LIMIT ?3"
        );
        let products = sqlx::query_as::<_, MappedProduct>(&sql)
            .bind(MappingStatus::Active)
            .bind(stale_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Active listings due for the bulk price/inventory push.
    pub async fn list_bulk_candidates(
        &self,
        limit: i64,
        synced_before: DateTime<Utc>,
    ) -> DbResult<Vec<MappedProduct>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS}, m.barcode AS mapping_barcode, m.remote_product_id, m.last_sync_at \
             FROM products p \
             JOIN product_mappings m ON m.local_product_id = p.id \
             WHERE m.sync_status = ?1 \
               AND (m.last_sync_at IS NULL OR m.last_sync_at < ?2) \
             ORDER BY m.last_sync_at IS NOT NULL, m.last_sync_at ASC, p.id ASC \
             LIMIT ?3"
        );
        let products = sqlx::query_as::<_, MappedProduct>(&sql)
            .bind(MappingStatus::Active)
            .bind(synced_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Sets stock for every product mapped under `barcode`.
    ///
    /// Returns the number of products changed; writing the same quantity
    /// twice still counts the row. `updated_at` is left alone: the value came
    /// from the marketplace and must not be pushed back to it.
    pub async fn set_quantity_by_barcode(&self, barcode: &str, quantity: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET quantity = ?2
            WHERE id IN (SELECT local_product_id FROM product_mappings WHERE barcode = ?1)
            "#,
        )
        .bind(barcode)
        .bind(quantity.max(0))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Sets list and special price for every product mapped under `barcode`.
    /// Like stock, this does not mark the product as locally edited.
    pub async fn set_prices_by_barcode(
        &self,
        barcode: &str,
        price: Money,
        special_price: Option<Money>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET price_cents = ?2, special_price_cents = ?3
            WHERE id IN (SELECT local_product_id FROM product_mappings WHERE barcode = ?1)
            "#,
        )
        .bind(barcode)
        .bind(price.cents())
        .bind(special_price.map(|p| p.cents()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Product Content
    // =========================================================================

    pub async fn add_image(&self, product_id: i64, url: &str, sort_order: i64) -> DbResult<()> {
        sqlx::query("INSERT INTO product_images (product_id, url, sort_order) VALUES (?1, ?2, ?3)")
            .bind(product_id)
            .bind(url)
            .bind(sort_order)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_attribute(
        &self,
        product_id: i64,
        attribute_id: i64,
        name: &str,
        value: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_attributes (product_id, attribute_id, name, value)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (product_id, attribute_id) DO UPDATE SET
                name = excluded.name,
                value = excluded.value
            "#,
        )
        .bind(product_id)
        .bind(attribute_id)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_category(
        &self,
        product_id: i64,
        category_id: i64,
        name: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_categories (product_id, category_id, name)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (product_id, category_id) DO NOTHING
            "#,
        )
        .bind(product_id)
        .bind(category_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Images in display order.
    pub async fn images(&self, product_id: i64) -> DbResult<Vec<ProductImage>> {
        let images = sqlx::query_as::<_, ProductImage>(
            "SELECT product_id, url, sort_order FROM product_images \
             WHERE product_id = ?1 ORDER BY sort_order ASC, id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    pub async fn attributes(&self, product_id: i64) -> DbResult<Vec<ProductAttribute>> {
        let attributes = sqlx::query_as::<_, ProductAttribute>(
            "SELECT product_id, attribute_id, name, value FROM product_attributes \
             WHERE product_id = ?1 ORDER BY attribute_id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attributes)
    }

    pub async fn categories(&self, product_id: i64) -> DbResult<Vec<ProductCategory>> {
        let categories = sqlx::query_as::<_, ProductCategory>(
            "SELECT product_id, category_id, name FROM product_categories \
             WHERE product_id = ?1 ORDER BY category_id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Creates a local order and its first history entry in one transaction.
    pub async fn create_local_order(
        &self,
        order: &NewLocalOrder,
        comment: &str,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_status_id, customer_name, customer_email, total_cents,
                source_reference, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(order.order_status_id)
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(order.total.cents())
        .bind(&order.source_reference)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let order_id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO order_history (order_id, order_status_id, comment, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(order_id)
        .bind(order.order_status_id)
        .bind(comment)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(order_id, source = %order.source_reference, "Local order created");
        Ok(order_id)
    }

    pub async fn get_order(&self, id: i64) -> DbResult<Option<LocalOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let order = sqlx::query_as::<_, LocalOrder>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Local order created for an external reference, if any.
    pub async fn find_order_by_source(&self, source_reference: &str) -> DbResult<Option<LocalOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE source_reference = ?1");
        let order = sqlx::query_as::<_, LocalOrder>(&sql)
            .bind(source_reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Sets a local order's status code and appends a history note.
    pub async fn update_order_status(
        &self,
        order_id: i64,
        order_status_id: i64,
        comment: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query("UPDATE orders SET order_status_id = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(order_id)
            .bind(order_status_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", order_id));
        }

        sqlx::query(
            "INSERT INTO order_history (order_id, order_status_id, comment, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(order_id)
        .bind(order_status_id)
        .bind(comment)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// History notes, oldest first.
    pub async fn order_history(&self, order_id: i64) -> DbResult<Vec<OrderHistoryEntry>> {
        let entries = sqlx::query_as::<_, OrderHistoryEntry>(
            "SELECT order_id, order_status_id, comment, created_at FROM order_history \
             WHERE order_id = ?1 ORDER BY id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unmapped_products_filters_and_orders() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let older = catalog
            .insert_product(&NewProduct::new("A", "Older", Money::from_cents(1000), 5), t0())
            .await
            .unwrap();
        let newer = catalog
            .insert_product(
                &NewProduct::new("B", "Newer", Money::from_cents(1000), 5),
                t0() + Duration::minutes(1),
            )
            .await
            .unwrap();
        catalog
            .insert_product(&NewProduct::new("C", "No stock", Money::from_cents(1000), 0), t0())
            .await
            .unwrap();
        catalog
            .insert_product(&NewProduct::new("D", "Free", Money::ZERO, 5), t0())
            .await
            .unwrap();
        let mapped = catalog
            .insert_product(&NewProduct::new("E", "Mapped", Money::from_cents(1000), 5), t0())
            .await
            .unwrap();
        db.mappings().record_upload(mapped, None, "E", t0()).await.unwrap();

        let ids: Vec<i64> = catalog
            .list_unmapped_products(10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_updated_products_selection() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        let mappings = db.mappings();

        let fresh = catalog
            .insert_product(&NewProduct::new("F", "Fresh", Money::from_cents(500), 1), t0())
            .await
            .unwrap();
        let edited = catalog
            .insert_product(&NewProduct::new("G", "Edited", Money::from_cents(500), 1), t0())
            .await
            .unwrap();
        for (id, sku) in [(fresh, "F"), (edited, "G")] {
            mappings.record_upload(id, None, sku, t0()).await.unwrap();
            mappings.approve_by_barcode(sku, t0()).await.unwrap();
            mappings.mark_synced(id, t0() + Duration::hours(1)).await.unwrap();
        }
        catalog.touch_product(edited, t0() + Duration::hours(2)).await.unwrap();

        let due = catalog
            .list_updated_products(10, t0() - Duration::hours(6))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].product.id, edited);
        assert_eq!(due[0].barcode(), "G");
    }

    #[tokio::test]
    async fn test_set_quantity_goes_through_mapping() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let id = catalog
            .insert_product(&NewProduct::new("SKU-42", "Kettle", Money::from_cents(2500), 3), t0())
            .await
            .unwrap();
        assert_eq!(catalog.set_quantity_by_barcode("B1", 7).await.unwrap(), 0);

        db.mappings().record_upload(id, None, "B1", t0()).await.unwrap();
        assert_eq!(catalog.set_quantity_by_barcode("B1", 7).await.unwrap(), 1);
        assert_eq!(catalog.get_product(id).await.unwrap().unwrap().quantity, 7);
    }

    #[tokio::test]
    async fn test_marketplace_writes_do_not_mark_product_edited() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        let mappings = db.mappings();

        let id = catalog
            .insert_product(&NewProduct::new("H", "Tray", Money::from_cents(900), 2), t0())
            .await
            .unwrap();
        mappings.record_upload(id, None, "H", t0()).await.unwrap();
        mappings.approve_by_barcode("H", t0()).await.unwrap();
        mappings.mark_synced(id, t0() + Duration::hours(1)).await.unwrap();

        catalog.set_quantity_by_barcode("H", 9).await.unwrap();
        catalog
            .set_prices_by_barcode("H", Money::from_cents(1200), Some(Money::from_cents(1000)))
            .await
            .unwrap();

        let product = catalog.get_product(id).await.unwrap().unwrap();
        assert_eq!(product.quantity, 9);
        assert_eq!(product.price_cents, 1200);
        assert_eq!(product.updated_at, t0());

        let due = catalog
            .list_updated_products(10, t0() - Duration::hours(6))
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_products_are_not_pushed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        let mappings = db.mappings();

        let id = catalog
            .insert_product(&NewProduct::new("J", "Strainer", Money::from_cents(400), 3), t0())
            .await
            .unwrap();
        mappings.record_upload(id, None, "J", t0()).await.unwrap();
        mappings.approve_by_barcode("J", t0()).await.unwrap();

        let stale_before = t0() + Duration::hours(1);
        assert_eq!(catalog.list_updated_products(10, stale_before).await.unwrap().len(), 1);

        sqlx::query("UPDATE products SET is_enabled = 0 WHERE id = ?1")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
        assert!(catalog.list_updated_products(10, stale_before).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_order_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let order_id = catalog
            .create_local_order(
                &NewLocalOrder {
                    order_status_id: 1,
                    customer_name: Some("Ayse Demir".into()),
                    customer_email: None,
                    total: Money::from_cents(11_990),
                    source_reference: "A-1".into(),
                },
                "Imported from marketplace",
                t0(),
            )
            .await
            .unwrap();

        catalog
            .update_order_status(order_id, 3, "Shipped", t0() + Duration::hours(1))
            .await
            .unwrap();

        let history = catalog.order_history(order_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].order_status_id, 3);
        assert_eq!(catalog.get_order(order_id).await.unwrap().unwrap().order_status_id, 3);

        let missing = catalog.update_order_status(999, 3, "x", t0()).await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));
    }
}
