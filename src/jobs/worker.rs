//! Queue worker: claims due jobs and hands them to the drivers.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::drivers::SyncDrivers;
use crate::store::{JobQueue, ScheduledJob};
use crate::workflow::WorkflowState;

use super::job::{JobError, SyncJob};

pub struct SyncWorker {
    drivers: Arc<SyncDrivers>,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
    concurrency: usize,
    shutdown_token: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        drivers: Arc<SyncDrivers>,
        queue: Arc<dyn JobQueue>,
        poll_interval: Duration,
        concurrency: usize,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            drivers,
            queue,
            poll_interval,
            concurrency: concurrency.max(1),
            shutdown_token,
        }
    }

    /// Main worker loop. Returns once the shutdown token is cancelled.
    pub async fn run(&self) {
        info!(
            "Starting sync worker (poll every {:?}, concurrency {})",
            self.poll_interval, self.concurrency
        );

        match self.queue.reset_stale_running() {
            Ok(count) if count > 0 => {
                info!("Reset {} jobs left running by a previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to reset stale jobs: {:#}", e);
            }
        }

        loop {
            if let Err(e) = self.run_due_jobs().await {
                error!("Failed to claim due jobs: {:#}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Sync worker received shutdown signal");
                    break;
                }
            }
        }

        info!("Sync worker stopped");
    }

    /// Claim and run the jobs due now. Returns how many were claimed.
    pub async fn run_due_jobs(&self) -> anyhow::Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let jobs = self.queue.claim_due(now, self.concurrency)?;
        let claimed = jobs.len();
        if claimed > 0 {
            debug!("Claimed {} due jobs", claimed);
        }

        stream::iter(jobs)
            .for_each_concurrent(self.concurrency, |job| self.run_job(job))
            .await;

        Ok(claimed)
    }

    async fn run_job(&self, job: ScheduledJob) {
        let started = std::time::Instant::now();
        let result = self.execute(&job).await;

        let marked = match &result {
            Ok(state) => {
                info!(
                    workflow_id = %state.workflow_id,
                    "Job {} ({}) ended with workflow status {} after {:?}",
                    job.id,
                    job.name,
                    state.status,
                    started.elapsed()
                );
                self.queue.mark_complete(job.id)
            }
            Err(e) => {
                error!("Job {} ({}) failed: {}", job.id, job.name, e);
                self.queue.mark_failed(job.id, &e.to_string())
            }
        };
        if let Err(e) = marked {
            warn!("Failed to record outcome of job {}: {:#}", job.id, e);
        }
    }

    async fn execute(&self, job: &ScheduledJob) -> Result<WorkflowState, JobError> {
        let sync_job = SyncJob::from_parts(&job.name, &job.payload)?;
        Ok(self.drivers.dispatch(&sync_job).await?)
    }
}
