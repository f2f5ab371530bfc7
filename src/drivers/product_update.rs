//! Product saved in the shop: create or update the Koban product.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::{debug, info};

use crate::jobs::{SyncJob, JOB_PRODUCT_UPDATE};
use crate::koban::{KobanClient, KobanSerializer};
use crate::shop::Product;
use crate::store::EntityKind;
use crate::workflow::{new_workflow_id, StateMachine, StepOutcome, StepRunner, WorkflowState};

use super::context::SyncContext;
use super::duplicate_guard::{DuplicateGuard, TransientLock};
use super::exit_policy::{handle_exit, ExitTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductStep {
    CheckDataIntegrity,
    UpsertKobanProduct,
}

pub const PRODUCT_UPDATE_STEPS: &[(&str, ProductStep)] = &[
    ("check_data_integrity", ProductStep::CheckDataIntegrity),
    ("upsert_koban_product", ProductStep::UpsertKobanProduct),
];

fn guard_key(product_id: i64) -> String {
    format!("product:{}", product_id)
}

pub struct ProductUpdateDriver {
    ctx: SyncContext,
    guard: Arc<dyn DuplicateGuard>,
}

impl ProductUpdateDriver {
    /// Driver with a [`TransientLock`] sized from the workflow settings.
    pub fn new(ctx: SyncContext) -> Self {
        let window = Duration::from_secs(ctx.workflow.duplicate_window_secs);
        let guard = TransientLock::new(ctx.locks.clone(), window);
        Self::with_guard(ctx, Arc::new(guard))
    }

    pub fn with_guard(ctx: SyncContext, guard: Arc<dyn DuplicateGuard>) -> Self {
        Self { ctx, guard }
    }

    /// Enqueue the sync of a saved product, unless the same product was
    /// scheduled within the duplicate window.
    pub async fn schedule(&self, product_id: i64) -> Result<Option<String>> {
        if !self.guard.try_acquire(&guard_key(product_id)).await? {
            debug!("Duplicate update of product {} suppressed", product_id);
            self.ctx.audit.log_duplicate_suppressed(
                EntityKind::Product,
                product_id,
                JOB_PRODUCT_UPDATE,
            )?;
            return Ok(None);
        }

        let workflow_id = new_workflow_id();
        let job = SyncJob::ProductUpdate {
            product_id,
            workflow_id: workflow_id.clone(),
            attempt: 0,
        };
        self.ctx.job_queue.enqueue_async(job.name(), job.payload())?;
        self.ctx
            .audit
            .log_scheduled(&job, EntityKind::Product, product_id)?;

        info!(workflow_id = %workflow_id, "Scheduled sync of product {}", product_id);
        Ok(Some(workflow_id))
    }

    pub async fn handle(
        &self,
        product_id: i64,
        workflow_id: &str,
        attempt: u32,
    ) -> Result<WorkflowState> {
        let product = self.ctx.shop.get_product(product_id)?;
        let failed_step = self
            .ctx
            .checkpoints
            .get_failed_step(EntityKind::Product, product_id)?;

        let run = ProductRun {
            ctx: &self.ctx,
            client: self.ctx.koban_client(workflow_id),
            serializer: self.ctx.serializer(),
            product_id,
            product,
        };

        let mut data = Map::new();
        data.insert("product_id".into(), json!(product_id));
        let mut machine =
            StateMachine::new(PRODUCT_UPDATE_STEPS.to_vec(), workflow_id, data, failed_step);
        machine.process_steps(&run).await;
        let state = machine.into_state();

        handle_exit(
            &self.ctx,
            ExitTarget {
                kind: EntityKind::Product,
                entity_id: product_id,
                job_name: JOB_PRODUCT_UPDATE,
            },
            &state,
            attempt,
            |next_attempt| SyncJob::ProductUpdate {
                product_id,
                workflow_id: workflow_id.to_string(),
                attempt: next_attempt,
            },
        )?;

        Ok(state)
    }
}

struct ProductRun<'a> {
    ctx: &'a SyncContext,
    client: KobanClient,
    serializer: KobanSerializer,
    product_id: i64,
    product: Option<Product>,
}

impl ProductRun<'_> {
    fn invalid_product(&self) -> StepOutcome {
        StepOutcome::fatal(format!("Invalid ID: product {} not found", self.product_id))
    }

    fn check_data_integrity(&self) -> StepOutcome {
        match self.product {
            Some(_) => StepOutcome::success("Product is valid"),
            None => self.invalid_product(),
        }
    }

    async fn upsert_koban_product(&self) -> StepOutcome {
        let Some(product) = &self.product else {
            return self.invalid_product();
        };
        let checkpoints = &self.ctx.checkpoints;

        let category_code = match product.category_id {
            Some(category_id) => match checkpoints.category_code(category_id) {
                Ok(code) => code,
                Err(e) => {
                    return StepOutcome::failed(format!("Could not read category meta: {:#}", e))
                }
            },
            None => None,
        };
        let guid = match checkpoints.product_guid(self.product_id) {
            Ok(guid) => guid,
            Err(e) => return StepOutcome::failed(format!("Could not read product meta: {:#}", e)),
        };

        let payload = self
            .serializer
            .product(product, category_code.as_deref(), guid.as_deref());

        match guid {
            Some(guid) => match self.client.update_product(&payload).await {
                Ok(()) => StepOutcome::success_with(
                    "Koban product updated",
                    json!({ "koban_guid": guid }),
                ),
                Err(e) => StepOutcome::failed(format!("Could not update Koban product: {}", e)),
            },
            None => {
                let guid = match self.client.create_product(&payload).await {
                    Ok(guid) => guid,
                    Err(e) => {
                        return StepOutcome::failed(format!(
                            "Could not create Koban product: {}",
                            e
                        ))
                    }
                };
                if let Err(e) = checkpoints.set_product_guid(self.product_id, &guid) {
                    return StepOutcome::failed(format!("Could not store product guid: {:#}", e));
                }
                StepOutcome::success_with("Koban product created", json!({ "koban_guid": guid }))
            }
        }
    }
}

#[async_trait]
impl StepRunner for ProductRun<'_> {
    type Step = ProductStep;

    async fn run_step(&self, step: ProductStep, _state: &WorkflowState) -> StepOutcome {
        match step {
            ProductStep::CheckDataIntegrity => self.check_data_integrity(),
            ProductStep::UpsertKobanProduct => self.upsert_koban_product().await,
        }
    }
}
