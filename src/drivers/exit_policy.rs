//! What happens once a run is over: checkpoint, reschedule or give up.
//!
//! The state machine already stopped at the first failing step. Retries at
//! this level are a fixed delay apart; per-request backoff is the Koban
//! client's job.

use anyhow::Result;
use tracing::{error, info, warn};

use crate::jobs::SyncJob;
use crate::store::EntityKind;
use crate::workflow::{WorkflowState, WorkflowStatus};

use super::context::SyncContext;

#[derive(Debug, Clone)]
pub struct ExitPolicy {
    /// Rescheduled runs allowed after the first one.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Success, stop, or a run that recorded nothing.
    Done,
    Retry { next_attempt: u32, at: i64 },
    /// Failed on its last allowed attempt.
    Exhausted,
    /// Failed in a way a retry cannot fix.
    FinalFailure,
}

impl ExitPolicy {
    /// Decide the follow-up of a run that ended in `state` on `attempt` (0-based).
    pub fn decide(&self, state: &WorkflowState, attempt: u32, now: i64) -> ExitDecision {
        if state.status != WorkflowStatus::Failed {
            return ExitDecision::Done;
        }
        if !state.retry {
            ExitDecision::FinalFailure
        } else if attempt < self.max_retries {
            ExitDecision::Retry {
                next_attempt: attempt + 1,
                at: now + self.retry_delay_secs as i64,
            }
        } else {
            ExitDecision::Exhausted
        }
    }
}

/// Entity a run was about.
#[derive(Debug, Clone, Copy)]
pub struct ExitTarget<'a> {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub job_name: &'a str,
}

/// Persist the outcome of a run and schedule its retry if one is due.
///
/// `retry_job` builds the job for the next attempt.
pub fn handle_exit<F>(
    ctx: &SyncContext,
    target: ExitTarget<'_>,
    state: &WorkflowState,
    attempt: u32,
    retry_job: F,
) -> Result<ExitDecision>
where
    F: FnOnce(u32) -> SyncJob,
{
    let checkpoints = &ctx.checkpoints;
    let ExitTarget {
        kind,
        entity_id,
        job_name,
    } = target;

    checkpoints.set_status(kind, entity_id, state.status)?;
    ctx.audit
        .log_finished(kind, entity_id, job_name, state, attempt)?;

    let now = chrono::Utc::now().timestamp();
    let decision = ctx.exit_policy().decide(state, attempt, now);
    match decision {
        ExitDecision::Retry { next_attempt, at } => {
            checkpoints.set_failed_step(kind, entity_id, state.failed_step.as_deref())?;
            let job = retry_job(next_attempt);
            ctx.job_queue.schedule_at(at, job.name(), job.payload())?;
            ctx.audit
                .log_retry_scheduled(kind, entity_id, job_name, state, next_attempt, at)?;
            warn!(
                workflow_id = %state.workflow_id,
                "{} {} failed at step {}, retry {} scheduled",
                kind,
                entity_id,
                state.failed_step.as_deref().unwrap_or("?"),
                next_attempt
            );
        }
        ExitDecision::Exhausted => {
            checkpoints.set_failed_step(kind, entity_id, None)?;
            ctx.audit
                .log_retries_exhausted(kind, entity_id, job_name, state, attempt)?;
            error!(
                workflow_id = %state.workflow_id,
                "{} {} sync failed after {} attempt(s) at step {}: {}",
                kind,
                entity_id,
                attempt + 1,
                state.failed_step.as_deref().unwrap_or("?"),
                state.last_message().unwrap_or("no message")
            );
        }
        ExitDecision::FinalFailure => {
            checkpoints.set_failed_step(kind, entity_id, None)?;
            error!(
                workflow_id = %state.workflow_id,
                "{} {} sync failed at step {} and will not be retried: {}",
                kind,
                entity_id,
                state.failed_step.as_deref().unwrap_or("?"),
                state.last_message().unwrap_or("no message")
            );
        }
        ExitDecision::Done => {
            checkpoints.set_failed_step(kind, entity_id, None)?;
            info!(
                workflow_id = %state.workflow_id,
                "{} {} sync ended with status {}",
                kind,
                entity_id,
                state.status
            );
        }
    }

    Ok(decision)
}
