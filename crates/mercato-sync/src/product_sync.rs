//! # Batch Product Synchronizer
//!
//! Pushes the local catalog to the marketplace in seven passes. Every pass
//! stops starting new work once the execution budget is spent, and every
//! outbound call goes through the rate limiter.
//!
//! ## Passes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  #  Pass              Selects                          Limit           │
//! │  ─  ────              ───────                          ─────           │
//! │  1  new products      listable, unmapped, newest       batch           │
//! │  2  updated products  active, changed or stale (6h)    batch           │
//! │  3  images            active, images_synced = 0        batch / 2       │
//! │  4  attributes        active, attributes_synced = 0    batch / 2       │
//! │  5  bulk price/stock  active, unsynced or older 2h     bulk (1 call)   │
//! │  6  bulk upload       listable, unmapped               bulk / 2 (1 call)│
//! │  7  error cleanup     error for more than 24h          -               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Bookkeeping
//! ```text
//!   individual upload ok ───► mapping pending (remote id, barcode, last_sync_at)
//!   individual upload err ──► mapping error (reason in rejection_reason)
//!   update push ok ─────────► last_sync_at = now, last_error cleared
//!   update push err ────────► last_error, status unchanged
//!   bulk push ok ───────────► every included last_sync_at = now (one statement)
//!   bulk push err ──────────► nothing
//! ```
//!
//! A failed item never stops the pass; a local persistence error skips the
//! item.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use mercato_core::{
    LocalProduct, ProductMapping, BULK_STALE_HOURS, ERROR_RESET_HOURS, UPDATE_STALE_HOURS,
};
use mercato_db::Database;

use crate::config::ProductSyncSettings;
use crate::error::SyncResult;
use crate::marketplace::format::{AttributeSetItem, ImageSetItem, PriceInventoryItem, ProductItem};
use crate::marketplace::MarketplaceClient;
use crate::rate_limit::{ExecutionBudget, RateLimiter};
use crate::stats::RunStats;

// =============================================================================
// Pass Context
// =============================================================================

/// Per-run state shared by the passes.
struct PassContext<'a> {
    now: DateTime<Utc>,
    budget: ExecutionBudget,
    limiter: RateLimiter,
    stats: &'a mut RunStats,
}

impl<'a> PassContext<'a> {
    fn new(now: DateTime<Utc>, settings: &ProductSyncSettings, stats: &'a mut RunStats) -> Self {
        PassContext {
            now,
            budget: ExecutionBudget::start(
                Duration::from_secs(settings.max_execution_secs),
                Duration::from_secs(settings.safety_margin_secs),
            ),
            limiter: RateLimiter::new(
                settings.rate_limit_per_minute,
                Duration::from_millis(settings.min_call_spacing_ms),
            ),
            stats,
        }
    }

    fn out_of_time(&self, pass: &str) -> bool {
        let exhausted = self.budget.is_exhausted();
        if exhausted {
            info!(pass, elapsed_ms = self.budget.elapsed().as_millis() as u64, "Execution budget exhausted");
        }
        exhausted
    }

    /// Waits for the rate limiter and counts the call.
    async fn before_call(&mut self) {
        self.limiter.allow().await;
        self.stats.counters_mut().api_calls += 1;
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Local catalog → marketplace.
pub struct ProductSynchronizer<C> {
    db: Database,
    client: C,
    settings: ProductSyncSettings,
}

impl<C: MarketplaceClient> ProductSynchronizer<C> {
    pub fn new(db: Database, client: C, settings: ProductSyncSettings) -> Self {
        ProductSynchronizer {
            db,
            client,
            settings,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs all seven passes once.
    pub async fn run(&self, now: DateTime<Utc>, stats: &mut RunStats) -> SyncResult<()> {
        let mut cx = PassContext::new(now, &self.settings, stats);

        self.upload_new_products(&mut cx).await?;
        cx.stats.phase_done("new_products");

        self.push_updated_products(&mut cx).await?;
        cx.stats.phase_done("updated_products");

        self.push_images(&mut cx).await?;
        cx.stats.phase_done("images");

        self.push_attributes(&mut cx).await?;
        cx.stats.phase_done("attributes");

        self.bulk_push_price_inventory(&mut cx).await?;
        cx.stats.phase_done("bulk_price_inventory");

        self.bulk_upload_new_products(&mut cx).await?;
        cx.stats.phase_done("bulk_upload");

        self.reset_stale_errors(&mut cx).await?;
        cx.stats.phase_done("error_cleanup");

        Ok(())
    }

    fn batch(&self) -> i64 {
        i64::from(self.settings.batch_size)
    }

    fn half_batch(&self) -> i64 {
        i64::from(self.settings.batch_size / 2)
    }

    fn bulk_batch(&self) -> i64 {
        i64::from(self.settings.bulk_batch_size)
    }

    async fn build_item(&self, product: &LocalProduct) -> SyncResult<ProductItem> {
        let catalog = self.db.catalog();
        let images = catalog.images(product.id).await?;
        let attributes = catalog.attributes(product.id).await?;
        let categories = catalog.categories(product.id).await?;
        Ok(ProductItem::build(product, &images, &attributes, &categories, &self.settings))
    }

    /// Barcode the listing is known by, falling back to the product's own.
    async fn listing_barcode(&self, mapping: &ProductMapping) -> SyncResult<Option<String>> {
        if let Some(barcode) = mapping.barcode.as_deref().filter(|b| !b.trim().is_empty()) {
            return Ok(Some(barcode.to_string()));
        }
        let product = self.db.catalog().get_product(mapping.local_product_id).await?;
        Ok(product.map(|p| p.marketplace_barcode().to_string()))
    }

    // =========================================================================
    // Pass 1: New Products
    // =========================================================================

    async fn upload_new_products(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let products = self.db.catalog().list_unmapped_products(self.batch()).await?;
        if products.is_empty() {
            return Ok(());
        }
        info!(count = products.len(), "Uploading new products");

        for product in &products {
            if cx.out_of_time("new_products") {
                break;
            }
            if let Err(e) = self.upload_one(product, cx).await {
                warn!(product_id = product.id, error = %e, "Skipping product");
            }
        }
        Ok(())
    }

    async fn upload_one(&self, product: &LocalProduct, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let item = self.build_item(product).await?;
        let mappings = self.db.mappings();

        cx.stats.counters_mut().processed += 1;
        cx.before_call().await;

        match self.client.upload_product(&item).await {
            Ok(uploaded) => {
                let barcode = uploaded.barcode.as_deref().unwrap_or(&item.barcode);
                mappings
                    .record_upload(product.id, uploaded.remote_product_id.as_deref(), barcode, cx.now)
                    .await?;
                cx.stats.counters_mut().uploaded += 1;
                cx.stats.counters_mut().succeeded += 1;
                info!(product_id = product.id, barcode, "Product uploaded");
            }
            Err(err) => {
                cx.stats.counters_mut().failed += 1;
                warn!(product_id = product.id, barcode = %item.barcode, error = %err, "Product upload failed");
                mappings
                    .record_upload_error(product.id, &item.barcode, &err.to_string(), cx.now)
                    .await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Pass 2: Updated Products
    // =========================================================================

    async fn push_updated_products(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let stale_before = cx.now - ChronoDuration::hours(UPDATE_STALE_HOURS);
        let products = self
            .db
            .catalog()
            .list_updated_products(self.batch(), stale_before)
            .await?;
        if products.is_empty() {
            return Ok(());
        }
        info!(count = products.len(), "Pushing updated products");

        let mappings = self.db.mappings();
        for mapped in &products {
            if cx.out_of_time("updated_products") {
                break;
            }
            let item = PriceInventoryItem::from_mapped(mapped);
            let id = mapped.product.id;

            cx.stats.counters_mut().processed += 1;
            cx.before_call().await;

            let outcome = match self.client.update_product(&item).await {
                Ok(()) => {
                    cx.stats.counters_mut().updated += 1;
                    cx.stats.counters_mut().succeeded += 1;
                    mappings.mark_synced(id, cx.now).await
                }
                Err(err) => {
                    cx.stats.counters_mut().failed += 1;
                    warn!(product_id = id, barcode = %item.barcode, error = %err, "Product update failed");
                    mappings.record_push_error(id, &err.to_string(), cx.now).await
                }
            };
            if let Err(e) = outcome {
                warn!(product_id = id, error = %e, "Failed to record update result");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Pass 3 & 4: Images and Attributes
    // =========================================================================

    async fn push_images(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let pending = self.db.mappings().list_pending_images(self.half_batch()).await?;
        for mapping in &pending {
            if cx.out_of_time("images") {
                break;
            }
            if let Err(e) = self.push_image_set(mapping, cx).await {
                warn!(product_id = mapping.local_product_id, error = %e, "Image push failed");
            }
        }
        Ok(())
    }

    async fn push_image_set(&self, mapping: &ProductMapping, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let id = mapping.local_product_id;
        let images = self.db.catalog().images(id).await?;

        if !images.is_empty() {
            let Some(barcode) = self.listing_barcode(mapping).await? else {
                return Ok(());
            };
            cx.before_call().await;
            if let Err(err) = self.client.push_images(&ImageSetItem::new(barcode, &images)).await {
                cx.stats.counters_mut().failed += 1;
                self.db.mappings().record_push_error(id, &err.to_string(), cx.now).await?;
                return Err(err);
            }
            debug!(product_id = id, count = images.len(), "Images pushed");
        }

        self.db.mappings().mark_images_synced(id, cx.now).await?;
        Ok(())
    }

    async fn push_attributes(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let pending = self.db.mappings().list_pending_attributes(self.half_batch()).await?;
        for mapping in &pending {
            if cx.out_of_time("attributes") {
                break;
            }
            if let Err(e) = self.push_attribute_set(mapping, cx).await {
                warn!(product_id = mapping.local_product_id, error = %e, "Attribute push failed");
            }
        }
        Ok(())
    }

    async fn push_attribute_set(
        &self,
        mapping: &ProductMapping,
        cx: &mut PassContext<'_>,
    ) -> SyncResult<()> {
        let id = mapping.local_product_id;
        let attributes = self.db.catalog().attributes(id).await?;

        if !attributes.is_empty() {
            let Some(barcode) = self.listing_barcode(mapping).await? else {
                return Ok(());
            };
            cx.before_call().await;
            let item = AttributeSetItem::new(barcode, &attributes);
            if let Err(err) = self.client.push_attributes(&item).await {
                cx.stats.counters_mut().failed += 1;
                self.db.mappings().record_push_error(id, &err.to_string(), cx.now).await?;
                return Err(err);
            }
            debug!(product_id = id, count = attributes.len(), "Attributes pushed");
        }

        self.db.mappings().mark_attributes_synced(id, cx.now).await?;
        Ok(())
    }

    // =========================================================================
    // Pass 5: Bulk Price / Inventory
    // =========================================================================

    async fn bulk_push_price_inventory(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        if cx.out_of_time("bulk_price_inventory") {
            return Ok(());
        }

        let synced_before = cx.now - ChronoDuration::hours(BULK_STALE_HOURS);
        let candidates = self
            .db
            .catalog()
            .list_bulk_candidates(self.bulk_batch(), synced_before)
            .await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let items: Vec<PriceInventoryItem> = candidates.iter().map(PriceInventoryItem::from_mapped).collect();
        let ids: Vec<i64> = candidates.iter().map(|m| m.product.id).collect();

        cx.before_call().await;
        match self.client.update_price_inventory(&items).await {
            Ok(()) => {
                let stamped = self.db.mappings().mark_synced_many(&ids, cx.now).await?;
                let counters = cx.stats.counters_mut();
                counters.bulk_operations += 1;
                counters.updated += items.len() as i64;
                info!(count = items.len(), stamped, "Bulk price/inventory push complete");
            }
            Err(err) => {
                cx.stats.counters_mut().failed += items.len() as i64;
                warn!(count = items.len(), error = %err, "Bulk price/inventory push failed");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Pass 6: Bulk Upload
    // =========================================================================

    async fn bulk_upload_new_products(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        if cx.out_of_time("bulk_upload") {
            return Ok(());
        }

        let limit = i64::from(self.settings.bulk_batch_size / 2);
        let products = self.db.catalog().list_unmapped_products(limit).await?;
        if products.is_empty() {
            return Ok(());
        }

        let mut items = Vec::with_capacity(products.len());
        for product in &products {
            items.push(self.build_item(product).await?);
        }

        cx.before_call().await;
        let uploaded = match self.client.upload_products(&items).await {
            Ok(uploaded) => uploaded,
            Err(err) => {
                cx.stats.counters_mut().failed += items.len() as i64;
                warn!(count = items.len(), error = %err, "Bulk upload failed");
                return Ok(());
            }
        };
        cx.stats.counters_mut().bulk_operations += 1;

        let mappings = self.db.mappings();
        for ((product, item), result) in products.iter().zip(&items).zip(&uploaded) {
            let barcode = result.barcode.as_deref().unwrap_or(&item.barcode);
            match mappings
                .record_upload(product.id, result.remote_product_id.as_deref(), barcode, cx.now)
                .await
            {
                Ok(()) => cx.stats.counters_mut().uploaded += 1,
                Err(e) => warn!(product_id = product.id, error = %e, "Failed to record bulk upload"),
            }
        }
        info!(count = items.len(), "Bulk upload complete");
        Ok(())
    }

    // =========================================================================
    // Pass 7: Error Cleanup
    // =========================================================================

    async fn reset_stale_errors(&self, cx: &mut PassContext<'_>) -> SyncResult<()> {
        let stuck_before = cx.now - ChronoDuration::hours(ERROR_RESET_HOURS);
        let reset = self.db.mappings().reset_stale_errors(stuck_before, cx.now).await?;
        if reset > 0 {
            info!(reset, "Reset stale mapping errors to pending");
        }
        Ok(())
    }
}
