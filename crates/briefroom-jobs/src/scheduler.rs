//! Job scheduler: creates jobs and triggers single run slices under the
//! per-job run lock.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use briefroom_core::{
    CreateJobRequest, DocumentStore, Error, EventLevel, EventMessage, FileSearchClient,
    IngestionJob, JobLedger, JobType, ProgressUpdate, Result, RunLease, StoreCatalog,
};

use crate::config::RunConfig;
use crate::executor::StepExecutor;

/// Error recorded on jobs cancelled through [`JobScheduler::cancel_job`].
pub const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

/// Error recorded when a job's file store disappeared before it finished.
pub const STORE_NOT_FOUND: &str = "File store not found";

/// Entry point for creating, running and cancelling ingestion jobs.
///
/// Nothing runs in the background: every slice is triggered by a caller.
#[derive(Clone)]
pub struct JobScheduler {
    ledger: Arc<dyn JobLedger>,
    catalog: Arc<dyn StoreCatalog>,
    executor: StepExecutor,
    config: RunConfig,
}

impl JobScheduler {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        catalog: Arc<dyn StoreCatalog>,
        storage: Arc<dyn DocumentStore>,
        search: Arc<dyn FileSearchClient>,
        config: RunConfig,
    ) -> Self {
        let executor = StepExecutor::new(Arc::clone(&ledger), storage, search);
        Self {
            ledger,
            catalog,
            executor,
            config,
        }
    }

    /// The default slice configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Create an indexing job over explicit documents. Does not run anything.
    pub async fn create_job(&self, store_id: Uuid, document_ids: Vec<Uuid>) -> Result<Uuid> {
        if document_ids.is_empty() {
            return Err(Error::InvalidInput(
                "document_ids must not be empty".to_string(),
            ));
        }
        self.create(CreateJobRequest::index(store_id, document_ids))
            .await
    }

    /// Create an indexing job over every document attached to the store.
    pub async fn create_store_job(&self, store_id: Uuid) -> Result<Uuid> {
        if self.catalog.get_store(store_id).await?.is_none() {
            return Err(Error::InvalidInput(format!(
                "Unknown file store: {}",
                store_id
            )));
        }
        let document_ids = self.catalog.store_document_ids(store_id).await?;
        if document_ids.is_empty() {
            return Err(Error::InvalidInput(
                "File store has no documents attached".to_string(),
            ));
        }
        self.create(CreateJobRequest::index(store_id, document_ids))
            .await
    }

    /// Create a single-document re-index job.
    pub async fn create_reindex_job(&self, store_id: Uuid, document_id: Uuid) -> Result<Uuid> {
        self.create(CreateJobRequest {
            job_type: JobType::ReindexDocument,
            file_store_id: store_id,
            document_ids: vec![document_id],
            payload: Some(json!({ "document_id": document_id })),
        })
        .await
    }

    async fn create(&self, request: CreateJobRequest) -> Result<Uuid> {
        let job_type = request.job_type;
        let store_id = request.file_store_id;
        let job_id = self.ledger.create(request).await?;
        let job = self.ledger.get(job_id).await?;

        self.ledger
            .append_event(
                job_id,
                EventLevel::Info,
                EventMessage::JobStarted,
                Some(json!({ "total": job.total })),
            )
            .await?;

        info!(
            subsystem = "jobs",
            component = "scheduler",
            op = "create",
            %job_id,
            %store_id,
            job_type = job_type.as_str(),
            total = job.total,
            "Created ingestion job"
        );
        Ok(job_id)
    }

    /// Run one slice with the default configuration.
    pub async fn run_job(&self, job_id: Uuid) -> Result<IngestionJob> {
        self.run_job_with(job_id, &self.config).await
    }

    /// Run one slice with an explicit configuration.
    ///
    /// `JobNotFound` for unknown ids, `Conflict` for terminal jobs and
    /// `JobLocked` while another slice or a cancel holds the job. None of these
    /// change the ledger.
    #[instrument(skip(self, config), fields(subsystem = "jobs", component = "scheduler"))]
    pub async fn run_job_with(&self, job_id: Uuid, config: &RunConfig) -> Result<IngestionJob> {
        let job = self.ledger.get(job_id).await?;
        ensure_not_terminal(&job)?;

        let lease = self
            .ledger
            .try_lock(job_id)
            .await?
            .ok_or(Error::JobLocked(job_id))?;

        let result = self.run_locked(job_id, config).await;
        release(lease).await;
        result
    }

    async fn run_locked(&self, job_id: Uuid, config: &RunConfig) -> Result<IngestionJob> {
        // Re-read under the lock: a slice that just finished may have closed it.
        let job = self.ledger.get(job_id).await?;
        ensure_not_terminal(&job)?;

        let Some(store) = self.catalog.get_store(job.file_store_id).await? else {
            warn!(%job_id, store_id = %job.file_store_id, "File store disappeared");
            return self
                .executor
                .fail_job(job, STORE_NOT_FOUND.to_string())
                .await;
        };

        self.executor.run_slice(job, &store, config).await
    }

    /// Fail a non-terminal job on operator request.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler"))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<IngestionJob> {
        let job = self.ledger.get(job_id).await?;
        ensure_not_terminal(&job)?;

        let lease = self
            .ledger
            .try_lock(job_id)
            .await?
            .ok_or(Error::JobLocked(job_id))?;

        let result = self.cancel_locked(job_id).await;
        release(lease).await;
        result
    }

    async fn cancel_locked(&self, job_id: Uuid) -> Result<IngestionJob> {
        let job = self.ledger.get(job_id).await?;
        ensure_not_terminal(&job)?;

        let job = self
            .ledger
            .update_progress(
                job_id,
                ProgressUpdate::failed(CANCELLED_BY_OPERATOR).expecting(job.version),
            )
            .await?;
        self.ledger
            .append_event(
                job_id,
                EventLevel::Warn,
                EventMessage::JobCancelled,
                Some(json!({ "progress": job.progress, "total": job.total })),
            )
            .await?;
        self.ledger
            .append_event(
                job_id,
                EventLevel::Error,
                EventMessage::JobFailed,
                Some(json!({ "error": CANCELLED_BY_OPERATOR })),
            )
            .await?;

        info!(%job_id, progress = job.progress, total = job.total, "Job cancelled");
        Ok(job)
    }
}

fn ensure_not_terminal(job: &IngestionJob) -> Result<()> {
    if job.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "Job {} is already {}",
            job.id,
            job.status.as_str()
        )));
    }
    Ok(())
}

async fn release(lease: Box<dyn RunLease>) {
    let job_id = lease.job_id();
    if let Err(e) = lease.release().await {
        warn!(%job_id, error = %e, "Failed to release run lock");
    }
}
