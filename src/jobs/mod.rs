//! Queued sync jobs and the worker that runs them.

mod job;
mod worker;

pub use job::{
    JobError, SyncJob, JOB_CUSTOMER_SAVE_ADDRESS, JOB_PAYMENT_COMPLETE, JOB_PRODUCT_UPDATE,
};
pub use worker::SyncWorker;
