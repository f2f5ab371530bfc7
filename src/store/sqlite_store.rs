//! SQLite-backed implementation of the sync stores.

use super::models::*;
use super::schema::SYNC_VERSIONED_SCHEMAS;
use super::{json_contains, EntityMetaStore, JobQueue, TransientLockStore, WorkflowLogStore};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// SQLite-backed store for entity meta, the job queue, the workflow log and
/// transient locks.
#[derive(Debug, Clone)]
pub struct SqliteSyncStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            SYNC_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new sync database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Sync database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = SYNC_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Sync database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        SYNC_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteSyncStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        SYNC_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteSyncStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = SYNC_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating sync database from version {} to {}",
            current_version, target_version
        );

        for schema in SYNC_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running sync database migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + target_version
            ),
            [],
        )?;

        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ScheduledJob> {
        let payload: String = row.get("payload")?;
        Ok(ScheduledJob {
            id: row.get("id")?,
            name: row.get("name")?,
            group: row.get("job_group")?,
            payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            status: JobStatus::from_db_str(&row.get::<_, String>("status")?),
            scheduled_at: row.get("scheduled_at")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            error_message: row.get("error_message")?,
        })
    }

    fn row_to_log_entry(row: &rusqlite::Row) -> rusqlite::Result<WorkflowLogEntry> {
        let event_type: String = row.get("event_type")?;
        let details: Option<String> = row.get("details")?;
        Ok(WorkflowLogEntry {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            event_type: WorkflowEventType::from_str(&event_type)
                .unwrap_or(WorkflowEventType::WorkflowFinished),
            workflow_id: row.get("workflow_id")?,
            entity_kind: row
                .get::<_, Option<String>>("entity_kind")?
                .and_then(|s| EntityKind::from_str(&s)),
            entity_id: row.get("entity_id")?,
            job_name: row.get("job_name")?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl EntityMetaStore for SqliteSyncStore {
    fn get_meta(&self, kind: EntityKind, id: i64, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT meta_value FROM entity_meta WHERE kind = ?1 AND entity_id = ?2 AND meta_key = ?3",
                rusqlite::params![kind.as_str(), id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, kind: EntityKind, id: i64, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match value {
            Some(value) => {
                conn.execute(
                    r#"INSERT INTO entity_meta (kind, entity_id, meta_key, meta_value, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT (kind, entity_id, meta_key)
                       DO UPDATE SET meta_value = excluded.meta_value, updated_at = excluded.updated_at"#,
                    rusqlite::params![kind.as_str(), id, key, value, Self::now()],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM entity_meta WHERE kind = ?1 AND entity_id = ?2 AND meta_key = ?3",
                    rusqlite::params![kind.as_str(), id, key],
                )?;
            }
        }
        Ok(())
    }

    fn get_all_meta(&self, kind: EntityKind, id: i64) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT meta_key, meta_value FROM entity_meta WHERE kind = ?1 AND entity_id = ?2",
        )?;
        let meta = stmt
            .query_map(rusqlite::params![kind.as_str(), id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(meta)
    }
}

impl JobQueue for SqliteSyncStore {
    fn enqueue_async(&self, name: &str, payload: Value) -> Result<i64> {
        self.schedule_at(Self::now(), name, payload)
    }

    fn schedule_at(&self, at: i64, name: &str, payload: Value) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO job_queue (name, job_group, payload, status, scheduled_at, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            rusqlite::params![
                name,
                JOB_GROUP,
                payload.to_string(),
                JobStatus::Pending.as_db_str(),
                at,
                Self::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn has_scheduled(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_queue WHERE name = ?1 AND status = 'PENDING'",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn next_scheduled(
        &self,
        name: &str,
        payload_filter: Option<&Value>,
    ) -> Result<Option<ScheduledJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM job_queue
               WHERE name = ?1 AND status = 'PENDING'
               ORDER BY scheduled_at ASC, id ASC"#,
        )?;
        let jobs = stmt
            .query_map([name], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs.into_iter().find(|job| {
            payload_filter
                .map(|filter| json_contains(&job.payload, filter))
                .unwrap_or(true)
        }))
    }

    fn unschedule_all(&self, name: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM job_queue WHERE name = ?1 AND status = 'PENDING'",
            [name],
        )?;
        Ok(removed)
    }

    fn claim_due(&self, now: i64, limit: usize) -> Result<Vec<ScheduledJob>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"SELECT id FROM job_queue
                   WHERE status = 'PENDING' AND scheduled_at <= ?1
                   ORDER BY scheduled_at ASC, id ASC
                   LIMIT ?2"#,
            )?;
            let ids = stmt
                .query_map(rusqlite::params![now, limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            ids
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                "UPDATE job_queue SET status = 'RUNNING', started_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            let job = tx.query_row(
                "SELECT * FROM job_queue WHERE id = ?1",
                [id],
                Self::row_to_job,
            )?;
            claimed.push(job);
        }

        tx.commit()?;
        Ok(claimed)
    }

    fn mark_complete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_queue SET status = 'COMPLETE', finished_at = ?1 WHERE id = ?2",
            rusqlite::params![Self::now(), id],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE job_queue SET status = 'FAILED', finished_at = ?1, error_message = ?2
               WHERE id = ?3"#,
            rusqlite::params![Self::now(), message, id],
        )?;
        Ok(())
    }

    fn reset_stale_running(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let reset = conn.execute(
            "UPDATE job_queue SET status = 'PENDING', started_at = NULL WHERE status = 'RUNNING'",
            [],
        )?;
        Ok(reset)
    }

    fn get_job(&self, id: i64) -> Result<Option<ScheduledJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row("SELECT * FROM job_queue WHERE id = ?1", [id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn.lock().unwrap();
        let jobs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_queue WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let jobs = stmt
                    .query_map(
                        rusqlite::params![status.as_db_str(), limit as i64],
                        Self::row_to_job,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM job_queue ORDER BY id DESC LIMIT ?1")?;
                let jobs = stmt
                    .query_map([limit as i64], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
        };
        Ok(jobs)
    }
}

impl WorkflowLogStore for SqliteSyncStore {
    fn log_event(&self, entry: WorkflowLogEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO workflow_log (
                timestamp, event_type, workflow_id, entity_kind, entity_id, job_name, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            rusqlite::params![
                entry.timestamp,
                entry.event_type.as_str(),
                entry.workflow_id,
                entry.entity_kind.map(|k| k.as_str()),
                entry.entity_id,
                entry.job_name,
                entry.details.as_ref().map(Value::to_string),
            ],
        )?;
        Ok(())
    }

    fn get_events(&self, filter: WorkflowLogFilter) -> Result<Vec<WorkflowLogEntry>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(workflow_id) = filter.workflow_id {
            conditions.push("workflow_id = ?");
            params.push(Box::new(workflow_id));
        }
        if let Some(kind) = filter.entity_kind {
            conditions.push("entity_kind = ?");
            params.push(Box::new(kind.as_str()));
        }
        if let Some(entity_id) = filter.entity_id {
            conditions.push("entity_id = ?");
            params.push(Box::new(entity_id));
        }
        if let Some(event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.as_str()));
        }
        if let Some(since) = filter.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since));
        }

        let mut sql = String::from("SELECT * FROM workflow_log");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                Self::row_to_log_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn cleanup_older_than(&self, older_than: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM workflow_log WHERE timestamp < ?1",
            [older_than],
        )?;
        Ok(deleted)
    }
}

impl TransientLockStore for SqliteSyncStore {
    fn try_lock(&self, key: &str, now: i64, expires_at: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Inserts a new lock or takes over an expired one in one statement
        let changed = conn.execute(
            r#"INSERT INTO transient_lock (lock_key, expires_at) VALUES (?1, ?2)
            ON CONFLICT(lock_key) DO UPDATE SET expires_at = excluded.expires_at
            WHERE transient_lock.expires_at <= ?3"#,
            rusqlite::params![key, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    fn clear_locks(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM transient_lock", [])?)
    }
}
