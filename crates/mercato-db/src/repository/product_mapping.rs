//! # Product Mapping Repository
//!
//! One row per local product that has been offered to the marketplace.
//!
//! ## Status Flow
//! ```text
//!   upload ok ──► pending ── product-approved ──► active ◄─┐
//!       │            │                              │      │ price / stock
//!       │            └── product-rejected ──► rejected      │ pushes only
//!       ▼                                           └──────┘ touch stamps
//!   upload failed ──► error ── 24h ──► pending (reset_stale_errors)
//! ```
//!
//! Price and stock bookkeeping never touches `images_synced` or
//! `attributes_synced`.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use mercato_core::{MappingStatus, ProductMapping};

const MAPPING_COLUMNS: &str = "local_product_id, remote_product_id, barcode, sync_status, \
     last_sync_at, last_stock_sync_at, last_price_sync_at, images_synced, attributes_synced, \
     rejection_reason, last_error, created_at, updated_at";

/// Repository for product mappings.
#[derive(Debug, Clone)]
pub struct ProductMappingRepository {
    pool: SqlitePool,
}

impl ProductMappingRepository {
    /// Creates a new ProductMappingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductMappingRepository { pool }
    }

    /// Gets the mapping for a local product.
    pub async fn get(&self, local_product_id: i64) -> DbResult<Option<ProductMapping>> {
        let sql = format!("SELECT {MAPPING_COLUMNS} FROM product_mappings WHERE local_product_id = ?1");
        let mapping = sqlx::query_as::<_, ProductMapping>(&sql)
            .bind(local_product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(mapping)
    }

    /// Records a successful upload: the mapping becomes `pending`.
    pub async fn record_upload(
        &self,
        local_product_id: i64,
        remote_product_id: Option<&str>,
        barcode: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_mappings (
                local_product_id, remote_product_id, barcode, sync_status,
                last_sync_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)
            ON CONFLICT (local_product_id) DO UPDATE SET
                remote_product_id = COALESCE(excluded.remote_product_id, product_mappings.remote_product_id),
                barcode = excluded.barcode,
                sync_status = excluded.sync_status,
                last_sync_at = excluded.last_sync_at,
                rejection_reason = NULL,
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(local_product_id)
        .bind(remote_product_id)
        .bind(barcode)
        .bind(MappingStatus::Pending)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(local_product_id, barcode = %barcode, "Mapping recorded as pending");
        Ok(())
    }

    /// Records a failed upload: the mapping exists in `error` so later runs
    /// don't rediscover the product as new.
    pub async fn record_upload_error(
        &self,
        local_product_id: i64,
        barcode: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_mappings (
                local_product_id, barcode, sync_status, rejection_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (local_product_id) DO UPDATE SET
                sync_status = excluded.sync_status,
                rejection_reason = excluded.rejection_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(local_product_id)
        .bind(barcode)
        .bind(MappingStatus::Error)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stamps a successful individual price/stock push.
    pub async fn mark_synced(&self, local_product_id: i64, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE product_mappings
            SET last_sync_at = ?2, last_error = NULL, updated_at = ?2
            WHERE local_product_id = ?1
            "#,
        )
        .bind(local_product_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamps every mapping included in one successful bulk push.
    ///
    /// Single statement, so either all listed rows advance or none do.
    pub async fn mark_synced_many(
        &self,
        local_product_ids: &[i64],
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        if local_product_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE product_mappings SET last_sync_at = ");
        builder.push_bind(now);
        builder.push(", updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE local_product_id IN (");
        let mut ids = builder.separated(", ");
        for id in local_product_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Records a failed individual push without changing the status.
    pub async fn record_push_error(
        &self,
        local_product_id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE product_mappings
            SET last_error = ?2, updated_at = ?3
            WHERE local_product_id = ?1
            "#,
        )
        .bind(local_product_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active mappings whose image set has not been pushed yet.
    pub async fn list_pending_images(&self, limit: i64) -> DbResult<Vec<ProductMapping>> {
        self.list_active_where("images_synced = 0", limit).await
    }

    /// Active mappings whose attributes have not been pushed yet.
    pub async fn list_pending_attributes(&self, limit: i64) -> DbResult<Vec<ProductMapping>> {
        self.list_active_where("attributes_synced = 0", limit).await
    }

    async fn list_active_where(&self, flag: &str, limit: i64) -> DbResult<Vec<ProductMapping>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM product_mappings \
             WHERE sync_status = ?1 AND {flag} \
             ORDER BY updated_at ASC LIMIT ?2"
        );
        let mappings = sqlx::query_as::<_, ProductMapping>(&sql)
            .bind(MappingStatus::Active)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(mappings)
    }

    pub async fn mark_images_synced(&self, local_product_id: i64, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE product_mappings SET images_synced = 1, updated_at = ?2 WHERE local_product_id = ?1",
        )
        .bind(local_product_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_attributes_synced(
        &self,
        local_product_id: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE product_mappings SET attributes_synced = 1, updated_at = ?2 WHERE local_product_id = ?1",
        )
        .bind(local_product_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marketplace approved the listing.
    pub async fn approve_by_barcode(&self, barcode: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE product_mappings
            SET sync_status = ?2, rejection_reason = NULL, updated_at = ?3
            WHERE barcode = ?1
            "#,
        )
        .bind(barcode)
        .bind(MappingStatus::Active)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Marketplace rejected the listing.
    pub async fn reject_by_barcode(
        &self,
        barcode: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE product_mappings
            SET sync_status = ?2, rejection_reason = ?3, updated_at = ?4
            WHERE barcode = ?1
            "#,
        )
        .bind(barcode)
        .bind(MappingStatus::Rejected)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Advances the stock-sync stamp after an inventory webhook.
    pub async fn touch_stock_sync(&self, barcode: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE product_mappings SET last_stock_sync_at = ?2, updated_at = ?2 WHERE barcode = ?1",
        )
        .bind(barcode)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Advances the price-sync stamp after a price webhook.
    pub async fn touch_price_sync(&self, barcode: &str, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE product_mappings SET last_price_sync_at = ?2, updated_at = ?2 WHERE barcode = ?1",
        )
        .bind(barcode)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Moves mappings stuck in `error` since before `stuck_before` back to
    /// `pending`, clearing the rejection reason.
    pub async fn reset_stale_errors(
        &self,
        stuck_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE product_mappings
            SET sync_status = ?1, rejection_reason = NULL, updated_at = ?3
            WHERE sync_status = ?2 AND updated_at < ?4
            "#,
        )
        .bind(MappingStatus::Pending)
        .bind(MappingStatus::Error)
        .bind(now)
        .bind(stuck_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Counts mappings in a given status.
    pub async fn count_by_status(&self, status: MappingStatus) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product_mappings WHERE sync_status = ?1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{Duration, TimeZone, Utc};
    use mercato_core::MappingStatus;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_error_keeps_single_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.record_upload_error(7, "B7", "brand missing", t0()).await.unwrap();
        let m = repo.get(7).await.unwrap().unwrap();
        assert_eq!(m.sync_status, MappingStatus::Error);
        assert_eq!(m.rejection_reason.as_deref(), Some("brand missing"));

        repo.record_upload(7, Some("R-7"), "B7", t0()).await.unwrap();
        let m = repo.get(7).await.unwrap().unwrap();
        assert_eq!(m.sync_status, MappingStatus::Pending);
        assert_eq!(m.remote_product_id.as_deref(), Some("R-7"));
        assert_eq!(m.rejection_reason, None);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_mappings")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_pushes_do_not_reset_content_flags() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.record_upload(1, None, "B1", t0()).await.unwrap();
        repo.approve_by_barcode("B1", t0()).await.unwrap();
        repo.mark_images_synced(1, t0()).await.unwrap();
        repo.mark_attributes_synced(1, t0()).await.unwrap();

        let later = t0() + Duration::hours(3);
        repo.mark_synced(1, later).await.unwrap();
        repo.mark_synced_many(&[1], later).await.unwrap();
        repo.touch_stock_sync("B1", later).await.unwrap();

        let m = repo.get(1).await.unwrap().unwrap();
        assert_eq!(m.sync_status, MappingStatus::Active);
        assert!(m.images_synced);
        assert!(m.attributes_synced);
        assert_eq!(m.last_sync_at, Some(later));
        assert_eq!(m.last_stock_sync_at, Some(later));
    }

    #[tokio::test]
    async fn test_reset_stale_errors_respects_age() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.record_upload_error(1, "B1", "old failure", t0() - Duration::hours(30))
            .await
            .unwrap();
        repo.record_upload_error(2, "B2", "fresh failure", t0() - Duration::hours(2))
            .await
            .unwrap();

        let reset = repo
            .reset_stale_errors(t0() - Duration::hours(24), t0())
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let old = repo.get(1).await.unwrap().unwrap();
        assert_eq!(old.sync_status, MappingStatus::Pending);
        assert_eq!(old.rejection_reason, None);
        assert_eq!(repo.get(2).await.unwrap().unwrap().sync_status, MappingStatus::Error);
    }

    #[tokio::test]
    async fn test_mark_synced_many_empty_is_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.mappings().mark_synced_many(&[], t0()).await.unwrap(), 0);
    }
}
