//! Persistence for the sync service.
//!
//! One SQLite database (`koban_sync.db`) holds:
//! - Meta values attached to shop entities (Koban guids and workflow checkpoints)
//! - The job queue the drivers schedule into and the worker drains
//! - The workflow log, an audit trail of scheduling and run outcomes
//! - Transient locks used to drop duplicate scheduling requests

mod checkpoints;
mod models;
mod schema;
mod sqlite_store;

pub use checkpoints::*;
pub use models::*;
pub use sqlite_store::SqliteSyncStore;

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;

/// Generic key/value store for meta attached to shop entities.
pub trait EntityMetaStore: Send + Sync {
    fn get_meta(&self, kind: EntityKind, id: i64, key: &str) -> Result<Option<String>>;

    /// Set a value. `None` deletes the key.
    fn set_meta(&self, kind: EntityKind, id: i64, key: &str, value: Option<&str>) -> Result<()>;

    fn get_all_meta(&self, kind: EntityKind, id: i64) -> Result<HashMap<String, String>>;
}

/// Persistent job queue.
///
/// Timestamps are unix seconds.
pub trait JobQueue: Send + Sync {
    // === Producer side ===

    /// Enqueue a job to run as soon as a worker picks it up.
    fn enqueue_async(&self, name: &str, payload: Value) -> Result<i64>;

    /// Enqueue a job that becomes due at `at`.
    fn schedule_at(&self, at: i64, name: &str, payload: Value) -> Result<i64>;

    /// Whether a pending job with this name exists.
    fn has_scheduled(&self, name: &str) -> Result<bool>;

    /// Earliest pending job with this name whose payload contains every
    /// field of `payload_filter`.
    fn next_scheduled(&self, name: &str, payload_filter: Option<&Value>)
        -> Result<Option<ScheduledJob>>;

    /// Drop every pending job with this name. Returns how many were removed.
    fn unschedule_all(&self, name: &str) -> Result<usize>;

    // === Worker side ===

    /// Atomically move up to `limit` due jobs from PENDING to RUNNING.
    fn claim_due(&self, now: i64, limit: usize) -> Result<Vec<ScheduledJob>>;

    fn mark_complete(&self, id: i64) -> Result<()>;

    fn mark_failed(&self, id: i64, message: &str) -> Result<()>;

    /// Return jobs left RUNNING by a previous process to PENDING.
    fn reset_stale_running(&self) -> Result<usize>;

    // === Inspection ===

    fn get_job(&self, id: i64) -> Result<Option<ScheduledJob>>;

    /// Most recent jobs first.
    fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScheduledJob>>;
}

/// Audit trail of workflow scheduling and outcomes.
pub trait WorkflowLogStore: Send + Sync {
    fn log_event(&self, entry: WorkflowLogEntry) -> Result<()>;

    /// Entries matching the filter, most recent first.
    fn get_events(&self, filter: WorkflowLogFilter) -> Result<Vec<WorkflowLogEntry>>;

    /// Delete entries older than `older_than`. Returns how many were deleted.
    fn cleanup_older_than(&self, older_than: i64) -> Result<usize>;
}

/// Named locks with an expiry, visible to every process sharing the store.
///
/// Timestamps are unix milliseconds.
pub trait TransientLockStore: Send + Sync {
    /// Take `key` until `expires_at`. Returns false when a lock on `key`
    /// is still live at `now`.
    fn try_lock(&self, key: &str, now: i64, expires_at: i64) -> Result<bool>;

    /// Drop every lock. Returns how many were removed.
    fn clear_locks(&self) -> Result<usize>;
}

/// True when every field in `needle` is present in `haystack` with an equal
/// value, recursing into objects. Non-object values must be equal.
pub fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(key, value)| h.get(key).is_some_and(|v| json_contains(v, value))),
        _ => haystack == needle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_contains_subset() {
        let payload = json!({"order_id": 4, "attempt": 1, "workflow_id": "wkf_a"});

        assert!(json_contains(&payload, &json!({})));
        assert!(json_contains(&payload, &json!({"attempt": 1})));
        assert!(json_contains(&payload, &json!({"order_id": 4, "attempt": 1})));
        assert!(!json_contains(&payload, &json!({"attempt": 2})));
        assert!(!json_contains(&payload, &json!({"missing": null})));
    }

    #[test]
    fn test_json_contains_nested() {
        let payload = json!({"job": {"order_id": 4, "attempt": 0}});
        assert!(json_contains(&payload, &json!({"job": {"attempt": 0}})));
        assert!(!json_contains(&payload, &json!({"job": {"attempt": 1}})));
    }
}
