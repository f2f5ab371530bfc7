use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shop::AddressType;

pub const JOB_PAYMENT_COMPLETE: &str = "koban_handle_payment_complete";
pub const JOB_CUSTOMER_SAVE_ADDRESS: &str = "koban_handle_customer_save_address";
pub const JOB_PRODUCT_UPDATE: &str = "koban_handle_product_update";

/// Typed payload of a queued sync job.
///
/// The job name lives next to the payload in the queue; the payload itself
/// is the bare field set of the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncJob {
    PaymentComplete {
        order_id: i64,
        workflow_id: String,
        attempt: u32,
    },
    CustomerSaveAddress {
        customer_id: i64,
        address_type: AddressType,
        workflow_id: String,
        attempt: u32,
    },
    ProductUpdate {
        product_id: i64,
        workflow_id: String,
        attempt: u32,
    },
}

impl SyncJob {
    pub fn name(&self) -> &'static str {
        match self {
            SyncJob::PaymentComplete { .. } => JOB_PAYMENT_COMPLETE,
            SyncJob::CustomerSaveAddress { .. } => JOB_CUSTOMER_SAVE_ADDRESS,
            SyncJob::ProductUpdate { .. } => JOB_PRODUCT_UPDATE,
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            SyncJob::PaymentComplete { workflow_id, .. }
            | SyncJob::CustomerSaveAddress { workflow_id, .. }
            | SyncJob::ProductUpdate { workflow_id, .. } => workflow_id,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            SyncJob::PaymentComplete { attempt, .. }
            | SyncJob::CustomerSaveAddress { attempt, .. }
            | SyncJob::ProductUpdate { attempt, .. } => *attempt,
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuild a job from a queue row.
    pub fn from_parts(name: &str, payload: &Value) -> Result<Self, JobError> {
        if !matches!(
            name,
            JOB_PAYMENT_COMPLETE | JOB_CUSTOMER_SAVE_ADDRESS | JOB_PRODUCT_UPDATE
        ) {
            return Err(JobError::UnknownJob(name.to_string()));
        }
        let job: SyncJob = serde_json::from_value(payload.clone())
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        if job.name() != name {
            return Err(JobError::InvalidPayload(format!(
                "payload does not match job {}",
                name
            )));
        }
        Ok(job)
    }
}

/// Errors that can occur while running a queued job.
#[derive(Debug)]
pub enum JobError {
    UnknownJob(String),
    InvalidPayload(String),
    ExecutionFailed(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::UnknownJob(name) => write!(f, "Unknown job: {}", name),
            JobError::InvalidPayload(msg) => write!(f, "Invalid job payload: {}", msg),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_flat() {
        let job = SyncJob::PaymentComplete {
            order_id: 12,
            workflow_id: "wkf_a".into(),
            attempt: 1,
        };
        assert_eq!(
            job.payload(),
            json!({"order_id": 12, "workflow_id": "wkf_a", "attempt": 1})
        );
        assert_eq!(job.name(), JOB_PAYMENT_COMPLETE);
    }

    #[test]
    fn test_from_parts_roundtrip_each_kind() {
        let jobs = [
            SyncJob::PaymentComplete {
                order_id: 1,
                workflow_id: "wkf_1".into(),
                attempt: 0,
            },
            SyncJob::CustomerSaveAddress {
                customer_id: 2,
                address_type: AddressType::Billing,
                workflow_id: "wkf_2".into(),
                attempt: 2,
            },
            SyncJob::ProductUpdate {
                product_id: 3,
                workflow_id: "wkf_3".into(),
                attempt: 0,
            },
        ];
        for job in jobs {
            let rebuilt = SyncJob::from_parts(job.name(), &job.payload()).unwrap();
            assert_eq!(rebuilt, job);
        }
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let payload = json!({"product_id": 3, "workflow_id": "wkf_3", "attempt": 0});

        assert!(matches!(
            SyncJob::from_parts(JOB_PAYMENT_COMPLETE, &payload),
            Err(JobError::InvalidPayload(_))
        ));
        assert!(matches!(
            SyncJob::from_parts("koban_cleanup", &payload),
            Err(JobError::UnknownJob(_))
        ));
        assert!(matches!(
            SyncJob::from_parts(JOB_PRODUCT_UPDATE, &json!({"product_id": "x"})),
            Err(JobError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_job_error_display() {
        assert_eq!(
            JobError::UnknownJob("x".into()).to_string(),
            "Unknown job: x"
        );
    }
}
