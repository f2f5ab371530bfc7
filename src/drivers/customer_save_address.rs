//! Customer address saved: push the new billing address to the Koban third.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::{debug, info};

use crate::jobs::{SyncJob, JOB_CUSTOMER_SAVE_ADDRESS};
use crate::koban::{KobanClient, KobanSerializer};
use crate::shop::{AddressType, Customer};
use crate::store::EntityKind;
use crate::workflow::{new_workflow_id, StateMachine, StepOutcome, StepRunner, WorkflowState};

use super::context::SyncContext;
use super::exit_policy::{handle_exit, ExitTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStep {
    CheckDataIntegrity,
    UpdateKobanThird,
}

pub const CUSTOMER_SAVE_ADDRESS_STEPS: &[(&str, AddressStep)] = &[
    ("check_data_integrity", AddressStep::CheckDataIntegrity),
    ("update_koban_third", AddressStep::UpdateKobanThird),
];

pub struct CustomerSaveAddressDriver {
    ctx: SyncContext,
}

impl CustomerSaveAddressDriver {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Enqueue the sync of a saved address. Only billing addresses are synced;
    /// anything else returns `None` without touching the queue.
    pub fn schedule(
        &self,
        customer_id: i64,
        address_type: AddressType,
    ) -> Result<Option<String>> {
        if address_type != AddressType::Billing {
            debug!(
                "Skipping {} address of customer {}: only billing is synced",
                address_type, customer_id
            );
            return Ok(None);
        }

        let workflow_id = new_workflow_id();
        let job = SyncJob::CustomerSaveAddress {
            customer_id,
            address_type,
            workflow_id: workflow_id.clone(),
            attempt: 0,
        };
        self.ctx.job_queue.enqueue_async(job.name(), job.payload())?;
        self.ctx
            .audit
            .log_scheduled(&job, EntityKind::User, customer_id)?;

        info!(workflow_id = %workflow_id, "Scheduled address sync for customer {}", customer_id);
        Ok(Some(workflow_id))
    }

    pub async fn handle(
        &self,
        customer_id: i64,
        address_type: AddressType,
        workflow_id: &str,
        attempt: u32,
    ) -> Result<WorkflowState> {
        let customer = self.ctx.shop.get_customer(customer_id)?;
        let failed_step = self
            .ctx
            .checkpoints
            .get_failed_step(EntityKind::User, customer_id)?;

        let run = AddressRun {
            ctx: &self.ctx,
            client: self.ctx.koban_client(workflow_id),
            serializer: self.ctx.serializer(),
            customer_id,
            address_type,
            customer,
        };

        let mut data = Map::new();
        data.insert("customer_id".into(), json!(customer_id));
        data.insert("address_type".into(), json!(address_type));
        let mut machine = StateMachine::new(
            CUSTOMER_SAVE_ADDRESS_STEPS.to_vec(),
            workflow_id,
            data,
            failed_step,
        );
        machine.process_steps(&run).await;
        let state = machine.into_state();

        handle_exit(
            &self.ctx,
            ExitTarget {
                kind: EntityKind::User,
                entity_id: customer_id,
                job_name: JOB_CUSTOMER_SAVE_ADDRESS,
            },
            &state,
            attempt,
            |next_attempt| SyncJob::CustomerSaveAddress {
                customer_id,
                address_type,
                workflow_id: workflow_id.to_string(),
                attempt: next_attempt,
            },
        )?;

        Ok(state)
    }
}

struct AddressRun<'a> {
    ctx: &'a SyncContext,
    client: KobanClient,
    serializer: KobanSerializer,
    customer_id: i64,
    address_type: AddressType,
    customer: Option<Customer>,
}

impl AddressRun<'_> {
    fn check_data_integrity(&self) -> StepOutcome {
        match self.customer {
            Some(_) => StepOutcome::success("Customer is valid"),
            None => StepOutcome::fatal(format!("Invalid ID: user {} not found", self.customer_id)),
        }
    }

    async fn update_koban_third(&self) -> StepOutcome {
        let Some(customer) = &self.customer else {
            return StepOutcome::fatal(format!("Invalid ID: user {} not found", self.customer_id));
        };
        if self.address_type != AddressType::Billing {
            return StepOutcome::stop("Only billing addresses are synced");
        }

        let guid = match self.ctx.checkpoints.user_third_guid(self.customer_id) {
            Ok(Some(guid)) => guid,
            Ok(None) => return StepOutcome::stop("Customer has no Koban third yet"),
            Err(e) => return StepOutcome::failed(format!("Could not read user meta: {:#}", e)),
        };

        let mut billing = customer.billing.clone();
        if billing.email.is_empty() {
            billing.email = customer.email.clone();
        }
        let payload = self.serializer.third(&billing, Some(&guid));

        match self.client.upsert_third(&payload).await {
            Ok(_) => StepOutcome::success("Koban third updated"),
            Err(e) => StepOutcome::failed(format!("Could not update Koban third: {}", e)),
        }
    }
}

#[async_trait]
impl StepRunner for AddressRun<'_> {
    type Step = AddressStep;

    async fn run_step(&self, step: AddressStep, _state: &WorkflowState) -> StepOutcome {
        match step {
            AddressStep::CheckDataIntegrity => self.check_data_integrity(),
            AddressStep::UpdateKobanThird => self.update_koban_third().await,
        }
    }
}
