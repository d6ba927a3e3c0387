//! # Request Bodies
//!
//! Serializable items for the seller API, built from local catalog rows.
//! Field names follow the marketplace's camelCase.

use mercato_core::{LocalProduct, MappedProduct, Money, ProductAttribute, ProductCategory, ProductImage};
use serde::{Serialize, Serializer};

use crate::config::ProductSyncSettings;

fn money_number<S: Serializer>(money: &Money, serializer: S) -> Result<S::Ok, S::Error> {
    money.to_json_number().serialize(serializer)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRef {
    pub url: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub attribute_id: i64,
    pub custom_attribute_value: String,
}

/// One product in an upload call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub barcode: String,
    pub title: String,
    pub product_main_id: String,
    pub stock_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    pub quantity: i64,
    #[serde(serialize_with = "money_number")]
    pub list_price: Money,
    #[serde(serialize_with = "money_number")]
    pub sale_price: Money,
    pub currency_type: String,
    pub vat_rate: u32,
    pub cargo_company_id: i64,
    pub description: String,
    pub images: Vec<ImageRef>,
    pub attributes: Vec<AttributeValue>,
}

impl ProductItem {
    /// Builds the upload body for a local product and its content.
    pub fn build(
        product: &LocalProduct,
        images: &[ProductImage],
        attributes: &[ProductAttribute],
        categories: &[ProductCategory],
        settings: &ProductSyncSettings,
    ) -> Self {
        ProductItem {
            barcode: product.marketplace_barcode().to_string(),
            title: product.name.trim().to_string(),
            product_main_id: product
                .model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(&product.sku)
                .to_string(),
            stock_code: product.sku.clone(),
            brand_id: product.brand_id,
            category_id: categories.first().map(|c| c.category_id),
            quantity: product.quantity.max(0),
            list_price: product.price(),
            sale_price: product.sale_price(),
            currency_type: settings.currency.clone(),
            vat_rate: settings.vat_rate,
            cargo_company_id: settings.cargo_company_id,
            description: strip_markup(product.description.as_deref().unwrap_or_default()),
            images: image_refs(images),
            attributes: attribute_values(attributes),
        }
    }
}

/// One listing in a price/stock call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInventoryItem {
    pub barcode: String,
    pub quantity: i64,
    #[serde(serialize_with = "money_number")]
    pub list_price: Money,
    #[serde(serialize_with = "money_number")]
    pub sale_price: Money,
}

impl PriceInventoryItem {
    pub fn from_mapped(mapped: &MappedProduct) -> Self {
        PriceInventoryItem {
            barcode: mapped.barcode().to_string(),
            quantity: mapped.product.quantity.max(0),
            list_price: mapped.product.price(),
            sale_price: mapped.product.sale_price(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSetItem {
    pub barcode: String,
    pub images: Vec<ImageRef>,
}

impl ImageSetItem {
    pub fn new(barcode: impl Into<String>, images: &[ProductImage]) -> Self {
        ImageSetItem {
            barcode: barcode.into(),
            images: image_refs(images),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSetItem {
    pub barcode: String,
    pub attributes: Vec<AttributeValue>,
}

impl AttributeSetItem {
    pub fn new(barcode: impl Into<String>, attributes: &[ProductAttribute]) -> Self {
        AttributeSetItem {
            barcode: barcode.into(),
            attributes: attribute_values(attributes),
        }
    }
}

fn image_refs(images: &[ProductImage]) -> Vec<ImageRef> {
    let mut sorted: Vec<&ProductImage> = images.iter().collect();
    sorted.sort_by_key(|img| img.sort_order);
    sorted
        .into_iter()
        .enumerate()
        .map(|(position, img)| ImageRef {
            url: img.url.clone(),
            order: position as i64 + 1,
        })
        .collect()
}

fn attribute_values(attributes: &[ProductAttribute]) -> Vec<AttributeValue> {
    attributes
        .iter()
        .map(|a| AttributeValue {
            attribute_id: a.attribute_id,
            custom_attribute_value: a.value.clone(),
        })
        .collect()
}

/// Removes HTML tags, decodes the common entities and collapses whitespace.
pub fn strip_markup(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn product() -> LocalProduct {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        LocalProduct {
            id: 42,
            sku: "KET-01".into(),
            model: None,
            barcode: Some("B1".into()),
            name: " Copper Kettle ".into(),
            description: Some("<p>Hand made &amp; <b>polished</b></p>".into()),
            brand_id: Some(1791),
            price_cents: 12990,
            special_price_cents: Some(9990),
            quantity: 3,
            is_enabled: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<p>Hand made &amp; <b>polished</b></p>"), "Hand made & polished");
        assert_eq!(strip_markup(""), "");
    }

    #[test]
    fn test_product_item_body() {
        let images = vec![
            ProductImage { product_id: 42, url: "https://cdn/2.jpg".into(), sort_order: 2 },
            ProductImage { product_id: 42, url: "https://cdn/1.jpg".into(), sort_order: 1 },
        ];
        let attributes = vec![ProductAttribute {
            product_id: 42,
            attribute_id: 47,
            name: "Color".into(),
            value: "Copper".into(),
        }];
        let categories = vec![ProductCategory { product_id: 42, category_id: 2210, name: None }];

        let item = ProductItem::build(
            &product(),
            &images,
            &attributes,
            &categories,
            &ProductSyncSettings::default(),
        );
        let body = serde_json::to_value(&item).unwrap();

        assert_eq!(body["productMainId"], "KET-01");
        assert_eq!(body["title"], "Copper Kettle");
        assert_eq!(body["categoryId"], 2210);
        assert_eq!(body["listPrice"], json!(129.9));
        assert_eq!(body["salePrice"], json!(99.9));
        assert_eq!(body["description"], "Hand made & polished");
        assert_eq!(body["images"][0], json!({"url": "https://cdn/1.jpg", "order": 1}));
        assert_eq!(body["attributes"][0], json!({"attributeId": 47, "customAttributeValue": "Copper"}));
    }
}
