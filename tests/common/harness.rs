//! Wires the drivers over a temporary sync database, an in-memory shop and
//! the fake transport.

use std::path::PathBuf;
use std::sync::Arc;

use koban_sync::config::{KobanSettings, SerializerSettings, WorkflowSettings};
use koban_sync::drivers::{AuditLogger, SyncContext, SyncDrivers};
use koban_sync::koban::KobanTransport;
use koban_sync::shop::{InMemoryShopStore, ShopStore};
use koban_sync::store::{
    Checkpoints, EntityKind, EntityMetaStore, JobQueue, SqliteSyncStore, TransientLockStore,
    WorkflowLogEntry, WorkflowLogFilter, WorkflowLogStore,
};
use tempfile::TempDir;

use super::constants::*;
use super::fixtures;
use super::transport::FakeTransport;

const SYNC_DB_FILE: &str = "koban_sync.db";

pub struct TestHarness {
    pub store: Arc<SqliteSyncStore>,
    pub shop: Arc<InMemoryShopStore>,
    pub transport: Arc<FakeTransport>,
    pub ctx: SyncContext,
    pub drivers: SyncDrivers,
    pub pdf_dir: PathBuf,
    // Keep temp dir alive for the harness lifetime
    temp_dir: TempDir,
}

impl TestHarness {
    /// Harness with the fixture entities loaded and the category code set.
    pub fn new() -> Self {
        Self::with_workflow(WorkflowSettings::default())
    }

    pub fn with_workflow(workflow: WorkflowSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteSyncStore::new(temp_dir.path().join(SYNC_DB_FILE))
                .expect("Failed to open sync store"),
        );
        let pdf_dir = temp_dir.path().join("invoices");

        let shop = Arc::new(InMemoryShopStore::new());
        shop.insert_customer(fixtures::customer());
        shop.insert_order(fixtures::registered_order());
        shop.insert_order(fixtures::guest_order());
        shop.insert_product(fixtures::product());

        let transport = Arc::new(FakeTransport::new());

        let ctx = SyncContext {
            shop: shop.clone() as Arc<dyn ShopStore>,
            checkpoints: Checkpoints::new(store.clone() as Arc<dyn EntityMetaStore>),
            job_queue: store.clone() as Arc<dyn JobQueue>,
            locks: store.clone() as Arc<dyn TransientLockStore>,
            audit: AuditLogger::new(store.clone() as Arc<dyn WorkflowLogStore>),
            transport: transport.clone() as Arc<dyn KobanTransport>,
            koban: KobanSettings {
                api_url: KOBAN_URL.to_string(),
                api_key: "api-key".to_string(),
                user_key: "user-key".to_string(),
                backoff_base_secs: 0.0,
                ..KobanSettings::default()
            },
            serializer: SerializerSettings::default(),
            workflow,
            pdf_dir: pdf_dir.clone(),
        };
        ctx.checkpoints
            .set_category_code(CATEGORY_ID, CATEGORY_CODE)
            .expect("Failed to set category code");

        let drivers = SyncDrivers::new(ctx.clone());

        Self {
            store,
            shop,
            transport,
            ctx,
            drivers,
            pdf_dir,
            temp_dir,
        }
    }

    /// Path of the sync database, for opening a second connection to it.
    pub fn sync_db_path(&self) -> PathBuf {
        self.temp_dir.path().join(SYNC_DB_FILE)
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.ctx.checkpoints
    }

    pub fn meta(&self, kind: EntityKind, id: i64, key: &str) -> Option<String> {
        self.store
            .get_meta(kind, id, key)
            .expect("Failed to read meta")
    }

    pub fn events_for(&self, kind: EntityKind, id: i64) -> Vec<WorkflowLogEntry> {
        self.store
            .get_events(WorkflowLogFilter {
                entity_kind: Some(kind),
                entity_id: Some(id),
                ..Default::default()
            })
            .expect("Failed to read workflow log")
    }
}
