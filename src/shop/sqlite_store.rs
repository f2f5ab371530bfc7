//! SQLite mirror of shop entities, stored as JSON documents.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::models::{Customer, Order, Product};
use super::ShopStore;
use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION};

macro_rules! document_table {
    ($name:expr) => {
        Table {
            name: $name,
            columns: &[
                sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
                sqlite_column!("document", &SqlType::Text, non_null = true),
                sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
            ],
            indices: &[],
            unique_constraints: &[],
        }
    };
}

const ORDERS_TABLE_V0: Table = document_table!("orders");
const CUSTOMERS_TABLE_V0: Table = document_table!("customers");
const PRODUCTS_TABLE_V0: Table = document_table!("products");

const SHOP_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[ORDERS_TABLE_V0, CUSTOMERS_TABLE_V0, PRODUCTS_TABLE_V0],
    migration: None,
}];

#[derive(Clone)]
pub struct SqliteShopStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteShopStore {
    /// Open an existing mirror or create an empty one.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open(&db_path)?
        } else {
            let conn = Connection::open(&db_path)?;
            SHOP_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new shop mirror database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;
        if db_version < 0 || db_version as usize >= SHOP_VERSIONED_SCHEMAS.len() {
            bail!("Unsupported shop database version {}", db_version);
        }
        SHOP_VERSIONED_SCHEMAS
            .get(db_version as usize)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn upsert_order(&self, order: &Order) -> Result<()> {
        self.put("orders", order.id, order)
    }

    pub fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        self.put("customers", customer.id, customer)
    }

    pub fn upsert_product(&self, product: &Product) -> Result<()> {
        self.put("products", product.id, product)
    }

    fn put<T: Serialize>(&self, table: &str, id: i64, document: &T) -> Result<()> {
        let json = serde_json::to_string(document)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                r#"INSERT INTO {table} (id, document, updated_at) VALUES (?1, ?2, ?3)
                   ON CONFLICT (id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at"#
            ),
            rusqlite::params![id, json, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: &str, id: i64) -> Result<Option<T>> {
        let conn = self.conn.lock().unwrap();
        let document: Option<String> = conn
            .query_row(
                &format!("SELECT document FROM {table} WHERE id = ?1"),
                [id],
                |row| row.get(0),
            )
            .optional()?;

        document
            .map(|json| {
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupted {} document for id {}", table, id))
            })
            .transpose()
    }
}

impl ShopStore for SqliteShopStore {
    fn get_order(&self, id: i64) -> Result<Option<Order>> {
        self.get("orders", id)
    }

    fn get_customer(&self, id: i64) -> Result<Option<Customer>> {
        self.get("customers", id)
    }

    fn get_product(&self, id: i64) -> Result<Option<Product>> {
        self.get("products", id)
    }
}
