//! Typed accessors over [`EntityMetaStore`] for workflow checkpoints and the
//! Koban identifiers stored on shop entities.

use std::sync::Arc;

use anyhow::Result;

use super::models::EntityKind;
use super::EntityMetaStore;
use crate::workflow::WorkflowStatus;

pub const META_WORKFLOW_STATUS: &str = "koban_workflow_status";
pub const META_WORKFLOW_FAILED_STEP: &str = "koban_workflow_failed_step";
/// Third guid on users, product guid on products.
pub const META_KOBAN_GUID: &str = "koban_guid";
pub const META_THIRD_GUID: &str = "koban_third_guid";
pub const META_INVOICE_GUID: &str = "koban_invoice_guid";
pub const META_PAYMENT_GUID: &str = "koban_payment_guid";
pub const META_INVOICE_PDF_PATH: &str = "koban_invoice_pdf_path";
pub const META_CATEGORY_CODE: &str = "koban_code";

#[derive(Clone)]
pub struct Checkpoints {
    meta: Arc<dyn EntityMetaStore>,
}

impl Checkpoints {
    pub fn new(meta: Arc<dyn EntityMetaStore>) -> Self {
        Self { meta }
    }

    pub fn meta_store(&self) -> &Arc<dyn EntityMetaStore> {
        &self.meta
    }

    // === Workflow checkpoint ===

    /// Last terminal status recorded for the entity.
    ///
    /// An unreadable stored value is reported as no status.
    pub fn get_status(&self, kind: EntityKind, id: i64) -> Result<Option<WorkflowStatus>> {
        Ok(self
            .meta
            .get_meta(kind, id, META_WORKFLOW_STATUS)?
            .and_then(|s| WorkflowStatus::from_str(&s)))
    }

    pub fn set_status(&self, kind: EntityKind, id: i64, status: WorkflowStatus) -> Result<()> {
        self.meta
            .set_meta(kind, id, META_WORKFLOW_STATUS, Some(status.as_str()))
    }

    pub fn get_failed_step(&self, kind: EntityKind, id: i64) -> Result<Option<String>> {
        self.meta.get_meta(kind, id, META_WORKFLOW_FAILED_STEP)
    }

    /// Store the failed step, or clear it with `None`.
    pub fn set_failed_step(&self, kind: EntityKind, id: i64, step: Option<&str>) -> Result<()> {
        self.meta.set_meta(kind, id, META_WORKFLOW_FAILED_STEP, step)
    }

    // === Koban identifiers ===

    pub fn user_third_guid(&self, user_id: i64) -> Result<Option<String>> {
        self.meta.get_meta(EntityKind::User, user_id, META_KOBAN_GUID)
    }

    pub fn set_user_third_guid(&self, user_id: i64, guid: &str) -> Result<()> {
        self.meta
            .set_meta(EntityKind::User, user_id, META_KOBAN_GUID, Some(guid))
    }

    pub fn product_guid(&self, product_id: i64) -> Result<Option<String>> {
        self.meta
            .get_meta(EntityKind::Product, product_id, META_KOBAN_GUID)
    }

    pub fn set_product_guid(&self, product_id: i64, guid: &str) -> Result<()> {
        self.meta
            .set_meta(EntityKind::Product, product_id, META_KOBAN_GUID, Some(guid))
    }

    pub fn category_code(&self, category_id: i64) -> Result<Option<String>> {
        self.meta
            .get_meta(EntityKind::Category, category_id, META_CATEGORY_CODE)
    }

    pub fn set_category_code(&self, category_id: i64, code: &str) -> Result<()> {
        self.meta.set_meta(
            EntityKind::Category,
            category_id,
            META_CATEGORY_CODE,
            Some(code),
        )
    }

    pub fn order_meta(&self, order_id: i64, key: &str) -> Result<Option<String>> {
        self.meta.get_meta(EntityKind::Order, order_id, key)
    }

    pub fn set_order_meta(&self, order_id: i64, key: &str, value: &str) -> Result<()> {
        self.meta
            .set_meta(EntityKind::Order, order_id, key, Some(value))
    }
}
