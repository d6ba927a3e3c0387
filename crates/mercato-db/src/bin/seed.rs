//! # Seed Data Generator
//!
//! Populates a development database with a small catalog and a queue of
//! sample marketplace webhooks.
//!
//! ## Usage
//! ```bash
//! # 200 products and a handful of webhooks (default)
//! cargo run -p mercato-db --bin seed
//!
//! # Custom amount
//! cargo run -p mercato-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p mercato-db --bin seed -- --db ./data/mercato.db
//! ```
//!
//! ## Generated Data
//! - Products `{CATEGORY}-{INDEX}` with a barcode, two images, a brand and
//!   color attribute, and one category. Every seventh product is out of
//!   stock so discovery has something to skip.
//! - Webhooks covering each priority level, including one unknown type.

use chrono::Utc;
use mercato_core::Money;
use mercato_db::{Database, DbConfig, NewProduct};
use serde_json::json;
use std::env;

/// (code, marketplace category id, names)
const CATEGORIES: &[(&str, i64, &[&str])] = &[
    ("TEA", 1021, &["Black Tea", "Green Tea", "Earl Grey", "Chamomile", "Mint Tea"]),
    ("KIT", 2210, &["Kettle", "Teapot", "Glass Set", "Tray", "Strainer"]),
    ("SNK", 1544, &["Hazelnuts", "Pistachios", "Dried Apricots", "Figs", "Lokum"]),
];

const COLORS: &[&str] = &["Red", "Black", "White", "Copper"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./mercato_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Mercato Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./mercato_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Mercato Seed Data Generator");
    println!("===========================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().count_products().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating products...");

    let catalog = db.catalog();
    let start = std::time::Instant::now();
    let mut generated = 0;

    'outer: for (code, category_id, names) in CATEGORIES {
        for (name_idx, name) in names.iter().enumerate() {
            for variant in 0..(count / (CATEGORIES.len() * names.len())).max(1) {
                if generated >= count {
                    break 'outer;
                }

                let seed = generated;
                let product = generate_product(code, name, name_idx, variant, seed);
                let id = match catalog.insert_product(&product, Utc::now()).await {
                    Ok(id) => id,
                    Err(e) => {
                        eprintln!("Failed to insert {}: {}", product.sku, e);
                        continue;
                    }
                };

                for order in 0..2 {
                    let url = format!("https://cdn.example.com/{}/{}-{}.jpg", code, id, order);
                    catalog.add_image(id, &url, order).await?;
                }
                catalog.set_attribute(id, 47, "Color", COLORS[seed % COLORS.len()]).await?;
                catalog.set_attribute(id, 338, "Origin", "TR").await?;
                catalog.add_category(id, *category_id, Some(code)).await?;

                generated += 1;
                if generated % 50 == 0 {
                    println!("  Generated {} products...", generated);
                }
            }
        }
    }

    println!("✓ Generated {} products in {:?}", generated, start.elapsed());

    println!();
    println!("Queueing sample webhooks...");
    let events = db.webhook_events();
    let now = Utc::now();
    let samples = [
        (
            "ORDER_CREATED",
            json!({
                "orderNumber": "TY-100001",
                "status": "Created",
                "grossAmount": "259.90",
                "totalDiscount": "20.00",
                "customerFirstName": "Ayse",
                "customerLastName": "Demir",
                "customerEmail": "ayse@example.com",
                "orderDate": now.timestamp_millis()
            }),
        ),
        ("ORDER_STATUS_CHANGED", json!({"orderNumber": "TY-100001", "status": "Picking"})),
        (
            "SHIPMENT_CREATED",
            json!({"orderNumber": "TY-100001", "trackingNumber": "7330012345", "cargoProviderName": "Yurtici"}),
        ),
        ("INVENTORY_UPDATED", json!({"barcode": "8690000000000", "quantity": 12})),
        ("PRICE_UPDATED", json!({"barcode": "8690000000000", "listPrice": "49.90", "salePrice": "44.90"})),
        ("PRODUCT_APPROVED", json!({"barcode": "8690000000000"})),
        ("LOYALTY_POINTS_EARNED", json!({"customerId": 7})),
    ];

    for (event_type, payload) in samples {
        let event = events.enqueue(event_type, &payload.to_string(), now).await?;
        println!("  {} (priority {})", event.event_type, event.priority);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates a single catalog product.
fn generate_product(code: &str, name: &str, name_idx: usize, variant: usize, seed: usize) -> NewProduct {
    let sku = format!("{}-{:02}-{:03}", code, name_idx, variant);

    // EAN-13 shaped, checksum not computed
    let barcode = format!("869{:010}", seed);

    // 19.90 .. 99.90
    let price_cents = 1990 + ((seed * 37) % 80) as i64 * 100;
    let special_price = (seed % 5 == 0).then(|| Money::from_cents(price_cents - 500));

    // Every seventh product is out of stock
    let quantity = if seed % 7 == 0 { 0 } else { (seed % 40) as i64 + 1 };

    NewProduct {
        sku,
        model: Some(format!("{}-{:02}", code, name_idx)),
        barcode: Some(barcode),
        name: format!("{} #{}", name, variant + 1),
        description: Some(format!("<p>{} from the {} range.</p>", name, code)),
        brand_id: Some(1791),
        price: Money::from_cents(price_cents),
        special_price,
        quantity,
        is_enabled: true,
    }
}
