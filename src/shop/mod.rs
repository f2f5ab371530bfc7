//! Read access to shop data (orders, customers, products).
//!
//! The shop platform owns this data. Workflows only read it through
//! [`ShopStore`], which has an in-memory implementation for embedding and
//! tests, and a SQLite snapshot mirror fed by the host or by `koban-sync import`.

mod memory_store;
mod models;
mod sqlite_store;

pub use memory_store::InMemoryShopStore;
pub use models::*;
pub use sqlite_store::SqliteShopStore;

use anyhow::Result;
use serde::Deserialize;

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait ShopStore: Send + Sync {
    fn get_order(&self, id: i64) -> Result<Option<Order>>;

    fn get_customer(&self, id: i64) -> Result<Option<Customer>>;

    fn get_product(&self, id: i64) -> Result<Option<Product>>;
}

/// Koban category code attached to a shop category.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CategoryCode {
    pub id: i64,
    pub koban_code: String,
}

/// Bulk export of shop data, as read by `koban-sync import`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShopSnapshot {
    pub orders: Vec<Order>,
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub categories: Vec<CategoryCode>,
}
