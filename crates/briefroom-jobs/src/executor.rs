//! Step executor: advances a job's documents through the indexing state
//! machine within one time-boxed slice.
//!
//! Per document: `pending -> downloading -> uploading -> importing ->
//! polling_operation -> indexed | failed`. Every transition is persisted before
//! the external call it guards, so a slice that stops anywhere can be resumed:
//!
//! - terminal documents are skipped,
//! - documents left in `downloading`, `uploading` or `importing` are restarted
//!   from the download,
//! - documents in `polling_operation` keep polling their stored operation.
//!
//! External client failures are converted into `indexed_failed` events and a
//! `failed` document. Only ledger failures leave a slice as `Err`.

use std::sync::Arc;

use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use briefroom_core::{
    DocumentState, DocumentStore, DocumentUpdate, EventLevel, EventMessage, FileSearchClient,
    FileStore, IngestionJob, JobLedger, JobStatus, ProgressUpdate, Result, TargetDocument,
};

use crate::config::{max_time_budget, RunConfig};

/// Error recorded when an operation exhausts its poll attempts.
pub const OPERATION_INCOMPLETE: &str = "operation did not complete";

/// Outcome of one document within a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Indexed,
    Failed(String),
    /// Still polling; resumed by the next slice.
    Pending,
}

impl DocumentOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DocumentOutcome::Pending)
    }
}

/// Runs slices of ingestion jobs against the ledger and external clients.
#[derive(Clone)]
pub struct StepExecutor {
    ledger: Arc<dyn JobLedger>,
    storage: Arc<dyn DocumentStore>,
    search: Arc<dyn FileSearchClient>,
}

impl StepExecutor {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        storage: Arc<dyn DocumentStore>,
        search: Arc<dyn FileSearchClient>,
    ) -> Self {
        Self {
            ledger,
            storage,
            search,
        }
    }

    /// Run one slice of `job`. The caller holds the job's run lease.
    #[instrument(
        skip(self, job, store, config),
        fields(subsystem = "jobs", component = "executor", job_id = %job.id)
    )]
    pub async fn run_slice(
        &self,
        job: IngestionJob,
        store: &FileStore,
        config: &RunConfig,
    ) -> Result<IngestionJob> {
        let started = Instant::now();
        let deadline = started
            .checked_add(config.time_budget)
            .unwrap_or_else(|| started + max_time_budget());
        let job_id = job.id;
        let mut job = job;

        if job.status == JobStatus::Queued {
            job = self
                .ledger
                .update_progress(
                    job_id,
                    ProgressUpdate::status(JobStatus::Running).expecting(job.version),
                )
                .await?;
        }

        if !job.store_ready {
            if let Err(e) = self.search.ensure_store(store).await {
                warn!(
                    %job_id,
                    store = %store.search_store_name,
                    error = %e,
                    "Search store is not available"
                );
                return self
                    .fail_job(job, format!("Search store unavailable: {}", e))
                    .await;
            }
            self.ledger.mark_store_ready(job_id).await?;
            self.ledger
                .append_event(
                    job_id,
                    EventLevel::Info,
                    EventMessage::GeminiStoreReady,
                    Some(json!({ "gemini_store_name": store.search_store_name })),
                )
                .await?;
            job.store_ready = true;
        }

        let documents = self.ledger.documents(job_id).await?;
        let mut started_docs = 0usize;
        for doc in documents {
            if doc.state.is_terminal() {
                continue;
            }
            if Instant::now() >= deadline {
                debug!(%job_id, "Time budget exhausted, suspending slice");
                break;
            }
            if let Some(max) = config.max_documents_per_run {
                if started_docs >= max {
                    debug!(%job_id, max, "Batch size reached, suspending slice");
                    break;
                }
            }
            started_docs += 1;

            let outcome = self.process_document(&job, store, doc, deadline, config).await?;
            if outcome.is_terminal() {
                job = self
                    .ledger
                    .update_progress(job_id, ProgressUpdate::advance(1).expecting(job.version))
                    .await?;
            }
        }

        let job = self.finish_slice(job).await?;
        info!(
            %job_id,
            status = job.status.as_str(),
            progress = job.progress,
            total = job.total,
            documents_started = started_docs,
            duration_ms = started.elapsed().as_millis() as u64,
            "Slice finished"
        );
        Ok(job)
    }

    /// Drive one document as far as the slice allows.
    #[instrument(
        skip(self, job, store, doc, deadline, config),
        fields(document_id = %doc.document_id, state = doc.state.as_str())
    )]
    async fn process_document(
        &self,
        job: &IngestionJob,
        store: &FileStore,
        doc: TargetDocument,
        deadline: Instant,
        config: &RunConfig,
    ) -> Result<DocumentOutcome> {
        if doc.state == DocumentState::PollingOperation {
            if let Some(operation) = doc.operation.clone() {
                self.event(
                    job,
                    EventLevel::Info,
                    EventMessage::PollingOperation,
                    json!({
                        "document_id": doc.document_id,
                        "operation": operation,
                        "poll_attempts": doc.poll_attempts,
                    }),
                )
                .await?;
                return self
                    .poll_until_done(job, &doc, &operation, doc.poll_attempts, deadline, config)
                    .await;
            }
        }
        if doc.state.is_interrupted() {
            info!(
                job_id = %job.id,
                document_id = %doc.document_id,
                state = doc.state.as_str(),
                "Restarting interrupted document"
            );
        }

        let document_id = doc.document_id;

        self.set_state(job, &doc, DocumentUpdate::state(DocumentState::Downloading))
            .await?;
        self.event(
            job,
            EventLevel::Info,
            EventMessage::DownloadingFromStorage,
            json!({ "document_id": document_id, "source": doc.source.describe() }),
        )
        .await?;
        let bytes = match self.storage.fetch(&doc.source).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail_document(job, &doc, e.to_string()).await,
        };

        self.set_state(job, &doc, DocumentUpdate::state(DocumentState::Uploading))
            .await?;
        self.event(
            job,
            EventLevel::Info,
            EventMessage::UploadingToGeminiFilesApi,
            json!({ "document_id": document_id, "bytes": bytes.len(), "mime_type": doc.mime_type }),
        )
        .await?;
        let file_name = match self
            .search
            .upload(bytes, &doc.mime_type, &doc.display_name)
            .await
        {
            Ok(name) => name,
            Err(e) => return self.fail_document(job, &doc, e.to_string()).await,
        };

        self.set_state(
            job,
            &doc,
            DocumentUpdate::state(DocumentState::Importing).with_file_name(&file_name),
        )
        .await?;
        self.event(
            job,
            EventLevel::Info,
            EventMessage::ImportingIntoFileSearchStore,
            json!({
                "document_id": document_id,
                "file_name": file_name,
                "gemini_store_name": store.search_store_name,
            }),
        )
        .await?;
        let operation = match self
            .search
            .import(
                &file_name,
                &store.search_store_name,
                store.chunking_config.as_ref(),
            )
            .await
        {
            Ok(operation) => operation,
            Err(e) => return self.fail_document(job, &doc, e.to_string()).await,
        };

        self.set_state(
            job,
            &doc,
            DocumentUpdate::state(DocumentState::PollingOperation)
                .with_operation(&operation)
                .with_poll_attempts(0),
        )
        .await?;
        self.event(
            job,
            EventLevel::Info,
            EventMessage::PollingOperation,
            json!({ "document_id": document_id, "operation": operation, "poll_attempts": 0 }),
        )
        .await?;

        self.poll_until_done(job, &doc, &operation, 0, deadline, config)
            .await
    }

    /// Poll an import operation a bounded number of times, never sleeping past
    /// the deadline.
    async fn poll_until_done(
        &self,
        job: &IngestionJob,
        doc: &TargetDocument,
        operation: &str,
        previous_attempts: i32,
        deadline: Instant,
        config: &RunConfig,
    ) -> Result<DocumentOutcome> {
        let mut attempts = previous_attempts;

        for round in 0..config.poll_attempts_per_slice {
            if attempts >= config.max_poll_attempts {
                break;
            }
            if round > 0 {
                let next_poll = Instant::now().checked_add(config.poll_interval);
                if next_poll.map_or(true, |at| at > deadline) {
                    debug!(
                        job_id = %job.id,
                        document_id = %doc.document_id,
                        attempts,
                        "No budget left for another poll"
                    );
                    break;
                }
                sleep(config.poll_interval).await;
            }

            let status = match self.search.poll(operation).await {
                Ok(status) => status,
                Err(e) => return self.fail_document(job, doc, e.to_string()).await,
            };
            attempts += 1;

            if status.done {
                if let Some(error) = status.error {
                    return self.fail_document(job, doc, error).await;
                }
                self.set_state(
                    job,
                    doc,
                    DocumentUpdate::state(DocumentState::Indexed).with_poll_attempts(attempts),
                )
                .await?;
                self.event(
                    job,
                    EventLevel::Info,
                    EventMessage::IndexedOk,
                    json!({ "document_id": doc.document_id, "operation": operation }),
                )
                .await?;
                info!(
                    job_id = %job.id,
                    document_id = %doc.document_id,
                    poll_attempts = attempts,
                    "Document indexed"
                );
                return Ok(DocumentOutcome::Indexed);
            }

            self.set_state(
                job,
                doc,
                DocumentUpdate::state(DocumentState::PollingOperation).with_poll_attempts(attempts),
            )
            .await?;
        }

        if attempts >= config.max_poll_attempts {
            return self
                .fail_document(job, doc, OPERATION_INCOMPLETE.to_string())
                .await;
        }
        Ok(DocumentOutcome::Pending)
    }

    /// Close the job when every document is terminal; otherwise leave it running.
    async fn finish_slice(&self, job: IngestionJob) -> Result<IngestionJob> {
        let job_id = job.id;
        let documents = self.ledger.documents(job_id).await?;
        let terminal = documents.iter().filter(|d| d.state.is_terminal()).count() as i32;
        let failed = documents
            .iter()
            .filter(|d| d.state == DocumentState::Failed)
            .count() as i32;

        let mut job = job;
        // Documents finished by an interrupted slice that never counted them.
        if terminal > job.progress {
            job = self
                .ledger
                .update_progress(
                    job_id,
                    ProgressUpdate::advance(terminal - job.progress).expecting(job.version),
                )
                .await?;
        }

        if terminal < documents.len() as i32 {
            return Ok(job);
        }

        let processed = documents.len();
        if failed == 0 {
            let job = self
                .ledger
                .update_progress(
                    job_id,
                    ProgressUpdate::status(JobStatus::Succeeded)
                        .with_result(json!({ "processed": processed }))
                        .expecting(job.version),
                )
                .await?;
            self.ledger
                .append_event(
                    job_id,
                    EventLevel::Info,
                    EventMessage::JobSucceeded,
                    Some(json!({ "processed": processed })),
                )
                .await?;
            info!(%job_id, processed, "Job succeeded");
            return Ok(job);
        }

        let error = format!("{} of {} documents failed to index", failed, processed);
        let job = self
            .ledger
            .update_progress(
                job_id,
                ProgressUpdate::failed(&error)
                    .with_result(json!({ "processed": processed, "failed": failed }))
                    .expecting(job.version),
            )
            .await?;
        self.ledger
            .append_event(
                job_id,
                EventLevel::Error,
                EventMessage::JobFailed,
                Some(json!({ "error": error, "processed": processed, "failed": failed })),
            )
            .await?;
        warn!(%job_id, processed, failed, "Job failed");
        Ok(job)
    }

    /// Fail the whole job at once (store-level failure).
    pub(crate) async fn fail_job(
        &self,
        job: IngestionJob,
        error: String,
    ) -> Result<IngestionJob> {
        let job_id = job.id;
        let job = self
            .ledger
            .update_progress(
                job_id,
                ProgressUpdate::failed(&error).expecting(job.version),
            )
            .await?;
        self.ledger
            .append_event(
                job_id,
                EventLevel::Error,
                EventMessage::JobFailed,
                Some(json!({ "error": error })),
            )
            .await?;
        Ok(job)
    }

    async fn fail_document(
        &self,
        job: &IngestionJob,
        doc: &TargetDocument,
        error: String,
    ) -> Result<DocumentOutcome> {
        warn!(
            job_id = %job.id,
            document_id = %doc.document_id,
            error = %error,
            "Document failed to index"
        );
        self.set_state(job, doc, DocumentUpdate::failed(&error)).await?;
        self.event(
            job,
            EventLevel::Error,
            EventMessage::IndexedFailed,
            json!({ "document_id": doc.document_id, "error": error }),
        )
        .await?;
        Ok(DocumentOutcome::Failed(error))
    }

    async fn set_state(
        &self,
        job: &IngestionJob,
        doc: &TargetDocument,
        update: DocumentUpdate,
    ) -> Result<()> {
        self.ledger
            .update_document(job.id, doc.document_id, update)
            .await
    }

    async fn event(
        &self,
        job: &IngestionJob,
        level: EventLevel,
        message: EventMessage,
        data: serde_json::Value,
    ) -> Result<i64> {
        self.ledger
            .append_event(job.id, level, message, Some(data))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_terminality() {
        assert!(DocumentOutcome::Indexed.is_terminal());
        assert!(DocumentOutcome::Failed("boom".to_string()).is_terminal());
        assert!(!DocumentOutcome::Pending.is_terminal());
    }
}
