//! Audit logging for workflow scheduling and outcomes.
//!
//! Builds [`WorkflowLogEntry`] rows on top of the raw [`WorkflowLogStore`].

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::jobs::SyncJob;
use crate::store::{EntityKind, WorkflowEventType, WorkflowLogEntry, WorkflowLogStore};
use crate::workflow::WorkflowState;

#[derive(Clone)]
pub struct AuditLogger {
    log_store: Arc<dyn WorkflowLogStore>,
}

impl AuditLogger {
    pub fn new(log_store: Arc<dyn WorkflowLogStore>) -> Self {
        Self { log_store }
    }

    pub fn log_store(&self) -> &Arc<dyn WorkflowLogStore> {
        &self.log_store
    }

    /// Log a job enqueued by a shop event.
    pub fn log_scheduled(&self, job: &SyncJob, kind: EntityKind, entity_id: i64) -> Result<()> {
        let entry = WorkflowLogEntry::new(WorkflowEventType::WorkflowScheduled)
            .with_workflow(job.workflow_id())
            .with_entity(kind, entity_id)
            .with_job(job.name())
            .with_details(json!({ "attempt": job.attempt() }));

        self.log_store.log_event(entry)
    }

    /// Log a scheduling request dropped by the duplicate guard.
    pub fn log_duplicate_suppressed(
        &self,
        kind: EntityKind,
        entity_id: i64,
        job_name: &str,
    ) -> Result<()> {
        let entry = WorkflowLogEntry::new(WorkflowEventType::DuplicateSuppressed)
            .with_entity(kind, entity_id)
            .with_job(job_name);

        self.log_store.log_event(entry)
    }

    /// Log the end of a run, whatever its status.
    pub fn log_finished(
        &self,
        kind: EntityKind,
        entity_id: i64,
        job_name: &str,
        state: &WorkflowState,
        attempt: u32,
    ) -> Result<()> {
        let entry = WorkflowLogEntry::new(WorkflowEventType::WorkflowFinished)
            .with_workflow(state.workflow_id.clone())
            .with_entity(kind, entity_id)
            .with_job(job_name)
            .with_details(json!({
                "status": state.status,
                "attempt": attempt,
                "retryable": state.retry,
                "failed_step": state.failed_step,
                "message": state.last_message(),
                "steps": state.step_records,
            }));

        self.log_store.log_event(entry)
    }

    /// Log a failed run rescheduled for a later attempt.
    pub fn log_retry_scheduled(
        &self,
        kind: EntityKind,
        entity_id: i64,
        job_name: &str,
        state: &WorkflowState,
        next_attempt: u32,
        scheduled_at: i64,
    ) -> Result<()> {
        let entry = WorkflowLogEntry::new(WorkflowEventType::RetryScheduled)
            .with_workflow(state.workflow_id.clone())
            .with_entity(kind, entity_id)
            .with_job(job_name)
            .with_details(json!({
                "next_attempt": next_attempt,
                "scheduled_at": scheduled_at,
                "failed_step": state.failed_step,
            }));

        self.log_store.log_event(entry)
    }

    /// Log a retryable failure on the last allowed attempt.
    ///
    /// Records how many attempts ran, the failed step and its message, so the
    /// entity can be fixed by hand.
    pub fn log_retries_exhausted(
        &self,
        kind: EntityKind,
        entity_id: i64,
        job_name: &str,
        state: &WorkflowState,
        attempt: u32,
    ) -> Result<()> {
        let entry = WorkflowLogEntry::new(WorkflowEventType::RetriesExhausted)
            .with_workflow(state.workflow_id.clone())
            .with_entity(kind, entity_id)
            .with_job(job_name)
            .with_details(json!({
                "attempts": attempt + 1,
                "failed_step": state.failed_step,
                "message": state.last_message(),
            }));

        self.log_store.log_event(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteSyncStore, WorkflowLogFilter};
    use crate::workflow::{StepOutcome, WorkflowStatus};
    use serde_json::Map;

    fn logger() -> (AuditLogger, Arc<SqliteSyncStore>) {
        let store = Arc::new(SqliteSyncStore::in_memory().unwrap());
        (AuditLogger::new(store.clone()), store)
    }

    #[test]
    fn test_log_scheduled_carries_job_fields() {
        let (audit, store) = logger();
        let job = SyncJob::ProductUpdate {
            product_id: 4,
            workflow_id: "wkf_p4".into(),
            attempt: 0,
        };

        audit.log_scheduled(&job, EntityKind::Product, 4).unwrap();

        let events = store.get_events(WorkflowLogFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WorkflowEventType::WorkflowScheduled);
        assert_eq!(events[0].workflow_id.as_deref(), Some("wkf_p4"));
        assert_eq!(events[0].job_name.as_deref(), Some("koban_handle_product_update"));
        assert_eq!(events[0].entity_id, Some(4));
    }

    #[test]
    fn test_log_finished_records_steps_and_failure() {
        let (audit, store) = logger();
        let mut state = WorkflowState::new("wkf_o1", Map::new(), None);
        state.current_step = Some("create_koban_invoice".into());
        state.apply(StepOutcome::failed("Koban is down"));
        state.status = WorkflowStatus::Failed;

        audit
            .log_finished(EntityKind::Order, 1, "koban_handle_payment_complete", &state, 1)
            .unwrap();

        let events = store
            .get_events(WorkflowLogFilter {
                workflow_id: Some("wkf_o1".into()),
                ..Default::default()
            })
            .unwrap();
        let details = events[0].details.as_ref().unwrap();
        assert_eq!(details["status"], "failed");
        assert_eq!(details["attempt"], 1);
        assert_eq!(details["failed_step"], "create_koban_invoice");
        assert_eq!(details["message"], "Koban is down");
        assert_eq!(details["steps"][0]["name"], "create_koban_invoice");
    }
}
