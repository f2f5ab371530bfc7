use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{KobanSettings, SerializerSettings, WorkflowSettings};
use crate::koban::{KobanClient, KobanSerializer, KobanTransport};
use crate::shop::ShopStore;
use crate::store::{Checkpoints, JobQueue, TransientLockStore};

use super::audit_logger::AuditLogger;
use super::exit_policy::ExitPolicy;

/// Dependencies shared by the workflow drivers.
#[derive(Clone)]
pub struct SyncContext {
    pub shop: Arc<dyn ShopStore>,
    pub checkpoints: Checkpoints,
    pub job_queue: Arc<dyn JobQueue>,
    pub locks: Arc<dyn TransientLockStore>,
    pub audit: AuditLogger,
    pub transport: Arc<dyn KobanTransport>,
    pub koban: KobanSettings,
    pub serializer: SerializerSettings,
    pub workflow: WorkflowSettings,
    /// Where invoice PDFs are written
    pub pdf_dir: PathBuf,
}

impl SyncContext {
    /// Client for one workflow run; its logs carry the workflow id.
    pub fn koban_client(&self, workflow_id: &str) -> KobanClient {
        KobanClient::new(self.transport.clone(), &self.koban, workflow_id)
    }

    pub fn serializer(&self) -> KobanSerializer {
        KobanSerializer::new(self.serializer.clone())
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy {
            max_retries: self.workflow.max_retries,
            retry_delay_secs: self.workflow.retry_delay_secs,
        }
    }
}
