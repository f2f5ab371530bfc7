//! Data types for the sync database: entity meta, scheduled jobs and the
//! workflow log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job group every job of this service belongs to.
pub const JOB_GROUP: &str = "koban-sync";

// =============================================================================
// Entity meta
// =============================================================================

/// Kind of shop entity a meta value is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Order,
    User,
    Product,
    Category,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::User => "user",
            EntityKind::Product => "product",
            EntityKind::Category => "category",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "order" => Some(EntityKind::Order),
            "user" => Some(EntityKind::User),
            "product" => Some(EntityKind::Product),
            "category" => Some(EntityKind::Category),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Job queue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "RUNNING" => JobStatus::Running,
            "COMPLETE" => JobStatus::Complete,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// A job row: a named job with a JSON payload, due at `scheduled_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub group: String,
    pub payload: Value,
    pub status: JobStatus,
    /// Unix timestamp (seconds) from which the job may run.
    pub scheduled_at: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub error_message: Option<String>,
}

// =============================================================================
// Workflow log
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEventType {
    WorkflowScheduled,
    DuplicateSuppressed,
    WorkflowFinished,
    RetryScheduled,
    RetriesExhausted,
}

impl WorkflowEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEventType::WorkflowScheduled => "WORKFLOW_SCHEDULED",
            WorkflowEventType::DuplicateSuppressed => "DUPLICATE_SUPPRESSED",
            WorkflowEventType::WorkflowFinished => "WORKFLOW_FINISHED",
            WorkflowEventType::RetryScheduled => "RETRY_SCHEDULED",
            WorkflowEventType::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WORKFLOW_SCHEDULED" => Some(WorkflowEventType::WorkflowScheduled),
            "DUPLICATE_SUPPRESSED" => Some(WorkflowEventType::DuplicateSuppressed),
            "WORKFLOW_FINISHED" => Some(WorkflowEventType::WorkflowFinished),
            "RETRY_SCHEDULED" => Some(WorkflowEventType::RetryScheduled),
            "RETRIES_EXHAUSTED" => Some(WorkflowEventType::RetriesExhausted),
            _ => None,
        }
    }
}

/// One row of the workflow log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowLogEntry {
    pub id: i64,
    pub timestamp: i64,
    pub event_type: WorkflowEventType,
    pub workflow_id: Option<String>,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<i64>,
    pub job_name: Option<String>,
    pub details: Option<Value>,
}

impl WorkflowLogEntry {
    /// New entry stamped with the current time. `id` is assigned on insert.
    pub fn new(event_type: WorkflowEventType) -> Self {
        Self {
            id: 0,
            timestamp: chrono::Utc::now().timestamp(),
            event_type,
            workflow_id: None,
            entity_kind: None,
            entity_id: None,
            job_name: None,
            details: None,
        }
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_entity(mut self, kind: EntityKind, id: i64) -> Self {
        self.entity_kind = Some(kind);
        self.entity_id = Some(id);
        self
    }

    pub fn with_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Filter for [`super::WorkflowLogStore::get_events`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct WorkflowLogFilter {
    pub workflow_id: Option<String>,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<i64>,
    pub event_type: Option<WorkflowEventType>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_strings() {
        for kind in [
            EntityKind::Order,
            EntityKind::User,
            EntityKind::Product,
            EntityKind::Category,
        ] {
            assert_eq!(EntityKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::from_str("term"), None);
    }

    #[test]
    fn test_job_status_unknown_is_pending() {
        assert_eq!(JobStatus::from_db_str("RUNNING"), JobStatus::Running);
        assert_eq!(JobStatus::from_db_str("???"), JobStatus::Pending);
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = WorkflowLogEntry::new(WorkflowEventType::RetryScheduled)
            .with_workflow("wkf_1")
            .with_entity(EntityKind::Order, 42)
            .with_job("koban_handle_payment_complete")
            .with_details(json!({"attempt": 1}));

        assert_eq!(entry.workflow_id.as_deref(), Some("wkf_1"));
        assert_eq!(entry.entity_kind, Some(EntityKind::Order));
        assert_eq!(entry.entity_id, Some(42));
        assert_eq!(entry.details, Some(json!({"attempt": 1})));
        assert!(entry.timestamp > 0);
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(
            WorkflowEventType::from_str("RETRIES_EXHAUSTED"),
            Some(WorkflowEventType::RetriesExhausted)
        );
        assert_eq!(
            serde_json::to_value(WorkflowEventType::DuplicateSuppressed).unwrap(),
            json!("DUPLICATE_SUPPRESSED")
        );
    }
}
