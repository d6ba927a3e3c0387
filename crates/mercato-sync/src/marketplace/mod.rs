//! # Marketplace Client
//!
//! The seam between the synchronizer and the seller API.
//!
//! ## Endpoints
//! ```text
//! POST suppliers/{seller}/products                       upload (single or bulk)
//! POST suppliers/{seller}/products/price-and-inventory   price/stock (single or bulk)
//! POST suppliers/{seller}/products/images                image set
//! POST suppliers/{seller}/products/attributes            attribute set
//! ```
//!
//! Implementations only provide [`MarketplaceClient::request`] and
//! [`MarketplaceClient::seller_id`]; the typed calls are built on top.

pub mod format;
pub mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use format::{AttributeSetItem, ImageSetItem, PriceInventoryItem, ProductItem};

pub use http::HttpMarketplaceClient;

/// Body of every batched seller API call.
#[derive(Debug, Serialize)]
pub struct Items<'a, T> {
    pub items: &'a [T],
}

/// What the marketplace told us about one uploaded product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedProduct {
    pub remote_product_id: Option<String>,
    pub barcode: Option<String>,
}

impl UploadedProduct {
    /// Extracts the entry for item `index` of a (possibly batched) upload
    /// response. Missing fields stay `None`.
    pub fn from_response(response: &Value, index: usize) -> Self {
        let entry = match response {
            Value::Array(entries) => entries.get(index),
            Value::Object(map) => match map.get("items") {
                Some(Value::Array(entries)) => entries.get(index),
                _ if index == 0 => Some(response),
                _ => None,
            },
            _ => None,
        };

        let Some(entry) = entry else {
            return UploadedProduct::default();
        };

        let text = |keys: &[&str]| {
            keys.iter().find_map(|k| match entry.get(*k) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };

        UploadedProduct {
            remote_product_id: text(&["productId", "id", "contentId"]),
            barcode: text(&["barcode"]),
        }
    }
}

/// Seller API operations used by the synchronizer.
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Seller id used in every path.
    fn seller_id(&self) -> &str;

    /// Sends one request to `path` (relative to the base URL) and returns the
    /// decoded JSON body (`Null` for an empty body).
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value>;

    /// Uploads products; returns one entry per item, in order.
    async fn upload_products(&self, items: &[ProductItem]) -> SyncResult<Vec<UploadedProduct>> {
        let path = format!("suppliers/{}/products", self.seller_id());
        let response = self
            .request(Method::POST, &path, Some(to_body(&Items { items })?))
            .await?;
        Ok((0..items.len())
            .map(|i| UploadedProduct::from_response(&response, i))
            .collect())
    }

    /// Uploads one product.
    async fn upload_product(&self, item: &ProductItem) -> SyncResult<UploadedProduct> {
        let mut uploaded = self.upload_products(std::slice::from_ref(item)).await?;
        Ok(uploaded.pop().unwrap_or_default())
    }

    /// Pushes price and stock for one or more listings.
    async fn update_price_inventory(&self, items: &[PriceInventoryItem]) -> SyncResult<()> {
        let path = format!("suppliers/{}/products/price-and-inventory", self.seller_id());
        self.request(Method::POST, &path, Some(to_body(&Items { items })?))
            .await?;
        Ok(())
    }

    /// Pushes price and stock for one listing.
    async fn update_product(&self, item: &PriceInventoryItem) -> SyncResult<()> {
        self.update_price_inventory(std::slice::from_ref(item)).await
    }

    async fn push_images(&self, item: &ImageSetItem) -> SyncResult<()> {
        let path = format!("suppliers/{}/products/images", self.seller_id());
        let items = std::slice::from_ref(item);
        self.request(Method::POST, &path, Some(to_body(&Items { items })?))
            .await?;
        Ok(())
    }

    async fn push_attributes(&self, item: &AttributeSetItem) -> SyncResult<()> {
        let path = format!("suppliers/{}/products/attributes", self.seller_id());
        let items = std::slice::from_ref(item);
        self.request(Method::POST, &path, Some(to_body(&Items { items })?))
            .await?;
        Ok(())
    }
}

fn to_body<T: Serialize>(body: &T) -> SyncResult<Value> {
    serde_json::to_value(body).map_err(|e| SyncError::Internal(format!("encode body: {}", e)))
}
