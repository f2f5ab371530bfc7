//! Payment completion: invoice the order in Koban.
//!
//! Resolves (or creates) the customer's third, then creates the invoice and
//! its payment and downloads the invoice PDF. Each remote identifier is
//! persisted on the order as soon as it is known, so a resumed run picks up
//! where the failed one stopped.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::info;

use crate::jobs::{SyncJob, JOB_PAYMENT_COMPLETE};
use crate::koban::{KobanClient, KobanSerializer};
use crate::shop::{Customer, Order};
use crate::store::{
    EntityKind, META_INVOICE_GUID, META_INVOICE_PDF_PATH, META_PAYMENT_GUID, META_THIRD_GUID,
};
use crate::workflow::{
    new_workflow_id, StateMachine, StepOutcome, StepRunner, WorkflowState, WorkflowStatus,
};

use super::context::SyncContext;
use super::exit_policy::{handle_exit, ExitTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStep {
    CheckDataIntegrity,
    FindKobanThirdGuid,
    CreateKobanInvoice,
    CreateKobanPayment,
    GetKobanInvoicePdf,
}

pub const PAYMENT_COMPLETE_STEPS: &[(&str, PaymentStep)] = &[
    ("check_data_integrity", PaymentStep::CheckDataIntegrity),
    ("find_koban_third_guid", PaymentStep::FindKobanThirdGuid),
    ("create_koban_invoice", PaymentStep::CreateKobanInvoice),
    ("create_koban_payment", PaymentStep::CreateKobanPayment),
    ("get_koban_invoice_pdf", PaymentStep::GetKobanInvoicePdf),
];

pub struct PaymentCompleteDriver {
    ctx: SyncContext,
}

impl PaymentCompleteDriver {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Enqueue the sync of a freshly paid order. Returns the workflow id.
    pub fn schedule(&self, order_id: i64) -> Result<Option<String>> {
        let workflow_id = new_workflow_id();
        let job = SyncJob::PaymentComplete {
            order_id,
            workflow_id: workflow_id.clone(),
            attempt: 0,
        };
        self.ctx.job_queue.enqueue_async(job.name(), job.payload())?;
        self.ctx.audit.log_scheduled(&job, EntityKind::Order, order_id)?;

        info!(workflow_id = %workflow_id, "Scheduled payment sync for order {}", order_id);
        Ok(Some(workflow_id))
    }

    /// Run (or resume) the payment workflow for an order.
    pub async fn handle(
        &self,
        order_id: i64,
        workflow_id: &str,
        attempt: u32,
    ) -> Result<WorkflowState> {
        let order = self.ctx.shop.get_order(order_id)?;
        let customer = match &order {
            Some(order) if !order.is_guest() => self.ctx.shop.get_customer(order.user_id)?,
            _ => None,
        };
        let failed_step = self
            .ctx
            .checkpoints
            .get_failed_step(EntityKind::Order, order_id)?;

        let run = PaymentRun {
            ctx: &self.ctx,
            client: self.ctx.koban_client(workflow_id),
            serializer: self.ctx.serializer(),
            order_id,
            order,
            customer,
        };

        let mut data = Map::new();
        data.insert("order_id".into(), json!(order_id));
        let mut machine = StateMachine::new(
            PAYMENT_COMPLETE_STEPS.to_vec(),
            workflow_id,
            data,
            failed_step,
        );
        machine.process_steps(&run).await;
        let state = machine.into_state();

        handle_exit(
            &self.ctx,
            ExitTarget {
                kind: EntityKind::Order,
                entity_id: order_id,
                job_name: JOB_PAYMENT_COMPLETE,
            },
            &state,
            attempt,
            |next_attempt| SyncJob::PaymentComplete {
                order_id,
                workflow_id: workflow_id.to_string(),
                attempt: next_attempt,
            },
        )?;

        Ok(state)
    }
}

/// One run of the payment workflow.
struct PaymentRun<'a> {
    ctx: &'a SyncContext,
    client: KobanClient,
    serializer: KobanSerializer,
    order_id: i64,
    order: Option<Order>,
    customer: Option<Customer>,
}

impl PaymentRun<'_> {
    fn invalid_order(&self) -> StepOutcome {
        StepOutcome::fatal(format!("Invalid ID: order {} not found", self.order_id))
    }

    /// Guid from this run's data, or from the order meta written by an
    /// earlier run.
    fn known_guid(&self, state: &WorkflowState, key: &str) -> Result<Option<String>> {
        if let Some(guid) = state.get_str(key) {
            return Ok(Some(guid.to_string()));
        }
        self.ctx.checkpoints.order_meta(self.order_id, key)
    }

    fn check_data_integrity(&self) -> StepOutcome {
        let Some(order) = &self.order else {
            return self.invalid_order();
        };
        if !order.is_guest() && self.customer.is_none() {
            return StepOutcome::fatal(format!("Invalid ID: user {} not found", order.user_id));
        }

        match self.already_invoiced() {
            Ok(true) => StepOutcome::stop("Invoice already generated"),
            Ok(false) => StepOutcome::success("Order and customer are valid"),
            Err(e) => StepOutcome::failed(format!("Could not read order checkpoint: {:#}", e)),
        }
    }

    /// A finished sync or a stored invoice guid both mean the invoice exists.
    fn already_invoiced(&self) -> Result<bool> {
        let checkpoints = &self.ctx.checkpoints;
        if checkpoints.get_status(EntityKind::Order, self.order_id)?
            == Some(WorkflowStatus::Success)
        {
            return Ok(true);
        }
        Ok(checkpoints
            .order_meta(self.order_id, META_INVOICE_GUID)?
            .is_some())
    }

    async fn find_koban_third_guid(&self) -> StepOutcome {
        let Some(order) = &self.order else {
            return self.invalid_order();
        };
        let checkpoints = &self.ctx.checkpoints;

        let stored = if order.is_guest() {
            None
        } else {
            match checkpoints.user_third_guid(order.user_id) {
                Ok(guid) => guid,
                Err(e) => return StepOutcome::failed(format!("Could not read user meta: {:#}", e)),
            }
        };

        let (guid, message) = match stored {
            Some(guid) => (guid, "Koban third known from user meta"),
            None => match self.client.find_third_by_email(&order.billing.email).await {
                Ok(Some(guid)) => (guid, "Koban third found by email"),
                Ok(None) => {
                    let payload = self.serializer.third(&order.billing, None);
                    match self.client.upsert_third(&payload).await {
                        Ok(guid) => (guid, "Koban third created"),
                        Err(e) => {
                            return StepOutcome::failed(format!(
                                "Could not create Koban third: {}",
                                e
                            ))
                        }
                    }
                }
                Err(e) => {
                    return StepOutcome::failed(format!("Koban third lookup failed: {}", e))
                }
            },
        };

        if !order.is_guest() {
            if let Err(e) = checkpoints.set_user_third_guid(order.user_id, &guid) {
                return StepOutcome::failed(format!("Could not store user third guid: {:#}", e));
            }
        }
        if let Err(e) = checkpoints.set_order_meta(self.order_id, META_THIRD_GUID, &guid) {
            return StepOutcome::failed(format!("Could not store order third guid: {:#}", e));
        }

        StepOutcome::success_with(message, json!({ META_THIRD_GUID: guid }))
    }

    async fn create_koban_invoice(&self, state: &WorkflowState) -> StepOutcome {
        let Some(order) = &self.order else {
            return self.invalid_order();
        };
        let third_guid = match self.known_guid(state, META_THIRD_GUID) {
            Ok(Some(guid)) => guid,
            Ok(None) => return StepOutcome::fatal("No Koban third guid for this order"),
            Err(e) => return StepOutcome::failed(format!("Could not read order meta: {:#}", e)),
        };

        let mut product_guids = HashMap::new();
        for product_id in order.items.iter().filter_map(|item| item.product_id) {
            match self.ctx.checkpoints.product_guid(product_id) {
                Ok(Some(guid)) => {
                    product_guids.insert(product_id, guid);
                }
                Ok(None) => {}
                Err(e) => {
                    return StepOutcome::failed(format!("Could not read product meta: {:#}", e))
                }
            }
        }

        let payload =
            self.serializer
                .invoice(order, &third_guid, &product_guids, chrono::Utc::now());
        let invoice_guid = match self.client.create_invoice(&payload).await {
            Ok(guid) => guid,
            Err(e) => return StepOutcome::failed(format!("Could not create Koban invoice: {}", e)),
        };

        if let Err(e) =
            self.ctx
                .checkpoints
                .set_order_meta(self.order_id, META_INVOICE_GUID, &invoice_guid)
        {
            return StepOutcome::failed(format!("Could not store invoice guid: {:#}", e));
        }
        StepOutcome::success_with(
            "Koban invoice created",
            json!({ META_INVOICE_GUID: invoice_guid }),
        )
    }

    async fn create_koban_payment(&self, state: &WorkflowState) -> StepOutcome {
        let Some(order) = &self.order else {
            return self.invalid_order();
        };
        let invoice_guid = match self.known_guid(state, META_INVOICE_GUID) {
            Ok(Some(guid)) => guid,
            Ok(None) => return StepOutcome::fatal("No Koban invoice guid for this order"),
            Err(e) => return StepOutcome::failed(format!("Could not read order meta: {:#}", e)),
        };

        let payload = self
            .serializer
            .payment(order, &invoice_guid, chrono::Utc::now());
        let payment_guid = match self.client.create_payment(&payload).await {
            Ok(guid) => guid,
            Err(e) => return StepOutcome::failed(format!("Could not create Koban payment: {}", e)),
        };

        if let Err(e) =
            self.ctx
                .checkpoints
                .set_order_meta(self.order_id, META_PAYMENT_GUID, &payment_guid)
        {
            return StepOutcome::failed(format!("Could not store payment guid: {:#}", e));
        }
        StepOutcome::success_with(
            "Koban payment created",
            json!({ META_PAYMENT_GUID: payment_guid }),
        )
    }

    async fn get_koban_invoice_pdf(&self, state: &WorkflowState) -> StepOutcome {
        if self.order.is_none() {
            return self.invalid_order();
        }
        let invoice_guid = match self.known_guid(state, META_INVOICE_GUID) {
            Ok(Some(guid)) => guid,
            Ok(None) => return StepOutcome::fatal("No Koban invoice guid for this order"),
            Err(e) => return StepOutcome::failed(format!("Could not read order meta: {:#}", e)),
        };

        let Some(file_name) = invoice_pdf_file_name(&invoice_guid) else {
            return StepOutcome::fatal(format!("Invalid Koban invoice guid {:?}", invoice_guid));
        };

        let pdf = match self.client.get_invoice_pdf(&invoice_guid).await {
            Ok(pdf) => pdf,
            Err(e) => {
                return StepOutcome::failed(format!("Could not download invoice PDF: {}", e))
            }
        };

        let pdf_dir = &self.ctx.pdf_dir;
        let path = pdf_dir.join(file_name);
        if let Err(e) = tokio::fs::create_dir_all(pdf_dir).await {
            return StepOutcome::failed(format!("Could not create {:?}: {}", pdf_dir, e));
        }
        if let Err(e) = tokio::fs::write(&path, &pdf).await {
            return StepOutcome::failed(format!("Could not write {:?}: {}", path, e));
        }

        let path = path.to_string_lossy().to_string();
        if let Err(e) =
            self.ctx
                .checkpoints
                .set_order_meta(self.order_id, META_INVOICE_PDF_PATH, &path)
        {
            return StepOutcome::failed(format!("Could not store invoice PDF path: {:#}", e));
        }
        StepOutcome::success_with(
            "Invoice PDF stored",
            json!({ META_INVOICE_PDF_PATH: path }),
        )
    }
}

/// PDF file name for an invoice. Only ASCII letters, digits and dashes are
/// accepted in the guid so the file stays inside the PDF directory.
fn invoice_pdf_file_name(guid: &str) -> Option<String> {
    let valid = !guid.is_empty() && guid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then(|| format!("koban-invoice-{}.pdf", guid))
}

#[async_trait]
impl StepRunner for PaymentRun<'_> {
    type Step = PaymentStep;

    async fn run_step(&self, step: PaymentStep, state: &WorkflowState) -> StepOutcome {
        match step {
            PaymentStep::CheckDataIntegrity => self.check_data_integrity(),
            PaymentStep::FindKobanThirdGuid => self.find_koban_third_guid().await,
            PaymentStep::CreateKobanInvoice => self.create_koban_invoice(state).await,
            PaymentStep::CreateKobanPayment => self.create_koban_payment(state).await,
            PaymentStep::GetKobanInvoicePdf => self.get_koban_invoice_pdf(state).await,
        }
    }
}
