//! End-to-end tests for the product workflow

mod common;

use std::sync::Arc;

use common::*;
use koban_sync::drivers::{SyncContext, SyncDrivers};
use koban_sync::jobs::JOB_PRODUCT_UPDATE;
use koban_sync::shop::Product;
use koban_sync::store::{
    EntityKind, JobQueue, JobStatus, SqliteSyncStore, TransientLockStore, WorkflowEventType,
    WorkflowLogFilter, WorkflowLogStore,
};
use koban_sync::workflow::WorkflowStatus;

#[tokio::test]
async fn test_new_product_is_created_and_guid_stored() {
    let harness = TestHarness::new();
    harness.transport.push(posted(PRODUCT_GUID));

    let state = harness
        .drivers
        .product
        .handle(PRODUCT_ID, "wkf_create", 0)
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Success);
    let calls = harness.transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("ncProduct/PostOne?uniqueproperty=Reference"));

    let body = body_of(&harness.transport, 0);
    assert_eq!(body["Reference"], "WKS-55");
    assert_eq!(body["Catproduct"]["Reference"], CATEGORY_CODE);
    assert_eq!(body["Ttc"], 24.0);
    assert_eq!(body["eShopURL"], "https://shop.test/field-guide");
    assert!(body.get("Guid").is_none());

    assert_eq!(
        harness.checkpoints().product_guid(PRODUCT_ID).unwrap().as_deref(),
        Some(PRODUCT_GUID)
    );
}

#[tokio::test]
async fn test_synced_product_is_updated_by_guid() {
    let harness = TestHarness::new();
    harness
        .checkpoints()
        .set_product_guid(PRODUCT_ID, PRODUCT_GUID)
        .unwrap();
    harness.transport.push(posted(PRODUCT_GUID));

    let state = harness
        .drivers
        .product
        .handle(PRODUCT_ID, "wkf_update", 0)
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Success);
    assert!(harness.transport.calls()[0].contains("ncProduct/PostOne?uniqueproperty=Guid"));

    let body = body_of(&harness.transport, 0);
    assert_eq!(body["Guid"], PRODUCT_GUID);
    assert!(body.get("Reference").is_none());
}

#[tokio::test]
async fn test_product_without_category_code_has_null_reference() {
    let harness = TestHarness::new();
    harness.shop.insert_product(Product {
        id: 56,
        category_id: None,
        ..product()
    });
    harness.transport.push(posted("product-guid-56"));

    harness
        .drivers
        .product
        .handle(56, "wkf_nocat", 0)
        .await
        .unwrap();

    assert!(body_of(&harness.transport, 0)["Catproduct"]["Reference"].is_null());
}

#[tokio::test]
async fn test_missing_product_is_a_final_failure() {
    let harness = TestHarness::new();

    let state = harness
        .drivers
        .product
        .handle(MISSING_ID, "wkf_missing", 0)
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(!state.retry);
    assert_eq!(harness.transport.request_count(), 0);
}

#[tokio::test]
async fn test_duplicate_schedule_is_suppressed() {
    let harness = TestHarness::new();

    let first = harness.drivers.product.schedule(PRODUCT_ID).await.unwrap();
    let second = harness.drivers.product.schedule(PRODUCT_ID).await.unwrap();
    let other = harness.drivers.product.schedule(56).await.unwrap();

    assert!(first.is_some());
    assert_eq!(second, None);
    assert!(other.is_some());

    let pending = harness
        .store
        .list_jobs(Some(JobStatus::Pending), 10)
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|job| job.name == JOB_PRODUCT_UPDATE));

    let suppressed = harness
        .store
        .get_events(WorkflowLogFilter {
            entity_kind: Some(EntityKind::Product),
            entity_id: Some(PRODUCT_ID),
            event_type: Some(WorkflowEventType::DuplicateSuppressed),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(suppressed.len(), 1);
}

#[tokio::test]
async fn test_duplicate_guard_spans_separate_connections() {
    let harness = TestHarness::new();
    // A second trigger process opens its own connection to the same database
    let other_store = Arc::new(SqliteSyncStore::new(harness.sync_db_path()).unwrap());
    let other = SyncDrivers::new(SyncContext {
        job_queue: other_store.clone() as Arc<dyn JobQueue>,
        locks: other_store as Arc<dyn TransientLockStore>,
        ..harness.ctx.clone()
    });
    let same_process = SyncDrivers::new(harness.ctx.clone());

    let first = harness.drivers.product.schedule(PRODUCT_ID).await.unwrap();
    let from_other = other.product.schedule(PRODUCT_ID).await.unwrap();
    let from_same = same_process.product.schedule(PRODUCT_ID).await.unwrap();

    assert!(first.is_some());
    assert_eq!(from_other, None);
    assert_eq!(from_same, None);
    let pending = harness
        .store
        .list_jobs(Some(JobStatus::Pending), 10)
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_failed_upsert_resumes_at_upsert() {
    let harness = TestHarness::new();
    harness.transport.push(rejected("Reference already used"));

    let state = harness
        .drivers
        .product
        .handle(PRODUCT_ID, "wkf_resume", 0)
        .await
        .unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(
        harness
            .checkpoints()
            .get_failed_step(EntityKind::Product, PRODUCT_ID)
            .unwrap()
            .as_deref(),
        Some("upsert_koban_product")
    );

    harness.transport.push(posted(PRODUCT_GUID));
    let state = harness
        .drivers
        .product
        .handle(PRODUCT_ID, "wkf_resume", 1)
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Success);
    assert!(state.step_record("check_data_integrity").is_none());
    assert_eq!(
        harness.checkpoints().product_guid(PRODUCT_ID).unwrap().as_deref(),
        Some(PRODUCT_GUID)
    );
}
