//! # Repository Module
//!
//! One repository per store. Each holds a clone of the pool and exposes
//! async methods with bind-parameter SQL.
//!
//! ```text
//! webhook_event     durable webhook queue
//! product_mapping   local product ↔ marketplace listing
//! remote_order      marketplace orders
//! catalog           local products, content, orders, history
//! run_lock          per-job leases
//! stats             daily run and queue rollups
//! alert             persisted fatal-run alerts
//! ```

pub mod alert;
pub mod catalog;
pub mod product_mapping;
pub mod remote_order;
pub mod run_lock;
pub mod stats;
pub mod webhook_event;
