//! Database schema for koban_sync.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Entity Meta Table - Version 0
// =============================================================================

/// Key/value pairs attached to shop entities (remote guids, checkpoints)
const ENTITY_META_TABLE_V0: Table = Table {
    name: "entity_meta",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("entity_id", &SqlType::Integer, non_null = true),
        sqlite_column!("meta_key", &SqlType::Text, non_null = true),
        sqlite_column!("meta_value", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_entity_meta_entity", "kind, entity_id")],
    unique_constraints: &[&["kind", "entity_id", "meta_key"]],
};

// =============================================================================
// Job Queue Table - Version 0
// =============================================================================

const JOB_QUEUE_TABLE_V0: Table = Table {
    name: "job_queue",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("job_group", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'PENDING'")
        ),
        sqlite_column!("scheduled_at", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_queue_due", "status, scheduled_at"),
        ("idx_job_queue_name", "name"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Workflow Log Table - Version 0
// =============================================================================

const WORKFLOW_LOG_TABLE_V0: Table = Table {
    name: "workflow_log",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("workflow_id", &SqlType::Text),
        sqlite_column!("entity_kind", &SqlType::Text),
        sqlite_column!("entity_id", &SqlType::Integer),
        sqlite_column!("job_name", &SqlType::Text),
        sqlite_column!("details", &SqlType::Text),
    ],
    indices: &[
        ("idx_workflow_log_timestamp", "timestamp"),
        ("idx_workflow_log_workflow", "workflow_id"),
        ("idx_workflow_log_entity", "entity_kind, entity_id"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Transient Lock Table - Version 1
// =============================================================================

/// Short-lived named locks shared by every process opening the database
const TRANSIENT_LOCK_TABLE_V1: Table = Table {
    name: "transient_lock",
    columns: &[
        sqlite_column!(
            "lock_key",
            &SqlType::Text,
            is_primary_key = true,
            non_null = true
        ),
        // Unix milliseconds
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Migration from version 0 to version 1: add transient_lock table
fn migrate_v0_to_v1(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    TRANSIENT_LOCK_TABLE_V1.create(conn)
}

// =============================================================================
// Versioned Schemas
// =============================================================================

/// All versioned schemas for the sync database.
///
/// Version 0: Entity meta, job queue and workflow log
/// Version 1: Transient locks
pub const SYNC_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            ENTITY_META_TABLE_V0,
            JOB_QUEUE_TABLE_V0,
            WORKFLOW_LOG_TABLE_V0,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            ENTITY_META_TABLE_V0,
            JOB_QUEUE_TABLE_V0,
            WORKFLOW_LOG_TABLE_V0,
            TRANSIENT_LOCK_TABLE_V1,
        ],
        migration: Some(migrate_v0_to_v1),
    },
];
