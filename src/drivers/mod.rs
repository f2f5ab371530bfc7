//! Workflow drivers: one per shop event synced to Koban.
//!
//! A driver schedules its job when the shop event fires, then handles the job
//! when a worker picks it up: run the state machine, checkpoint the outcome
//! and reschedule on retryable failures.

mod audit_logger;
mod context;
mod customer_save_address;
mod duplicate_guard;
mod exit_policy;
mod payment_complete;
mod product_update;

pub use audit_logger::AuditLogger;
pub use context::SyncContext;
pub use customer_save_address::{
    AddressStep, CustomerSaveAddressDriver, CUSTOMER_SAVE_ADDRESS_STEPS,
};
pub use duplicate_guard::{DuplicateGuard, TransientLock};
pub use exit_policy::{handle_exit, ExitDecision, ExitPolicy, ExitTarget};
pub use payment_complete::{PaymentCompleteDriver, PaymentStep, PAYMENT_COMPLETE_STEPS};
pub use product_update::{ProductStep, ProductUpdateDriver, PRODUCT_UPDATE_STEPS};

use anyhow::Result;

use crate::jobs::SyncJob;
use crate::workflow::WorkflowState;

/// The three drivers, sharing one context.
pub struct SyncDrivers {
    pub payment: PaymentCompleteDriver,
    pub address: CustomerSaveAddressDriver,
    pub product: ProductUpdateDriver,
}

impl SyncDrivers {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            payment: PaymentCompleteDriver::new(ctx.clone()),
            address: CustomerSaveAddressDriver::new(ctx.clone()),
            product: ProductUpdateDriver::new(ctx),
        }
    }

    /// Route a queued job to its driver.
    pub async fn dispatch(&self, job: &SyncJob) -> Result<WorkflowState> {
        match job {
            SyncJob::PaymentComplete {
                order_id,
                workflow_id,
                attempt,
            } => self.payment.handle(*order_id, workflow_id, *attempt).await,
            SyncJob::CustomerSaveAddress {
                customer_id,
                address_type,
                workflow_id,
                attempt,
            } => {
                self.address
                    .handle(*customer_id, *address_type, workflow_id, *attempt)
                    .await
            }
            SyncJob::ProductUpdate {
                product_id,
                workflow_id,
                attempt,
            } => self.product.handle(*product_id, workflow_id, *attempt).await,
        }
    }
}
