//! Capability traits at the seams of the ingestion pipeline.
//!
//! The executor and scheduler only see these traits, so the PostgreSQL ledger,
//! the in-memory ledger, the HTTP clients and the mock clients are all
//! interchangeable.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    CreateFileStoreRequest, CreateJobRequest, DocumentSource, DocumentUpdate, EventLevel,
    EventMessage, FileStore, IngestionJob, JobEvent, OperationStatus, ProgressUpdate, Result,
    TargetDocument,
};

// =============================================================================
// LEDGER
// =============================================================================

/// Exclusive right to run one slice of a job.
///
/// Dropping a lease without calling [`RunLease::release`] must still free the
/// lock, so an early return or a panic inside a slice cannot wedge the job.
#[async_trait]
pub trait RunLease: Send {
    /// The job this lease guards.
    fn job_id(&self) -> Uuid;

    /// Release the lock.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Durable record of jobs, their documents, and their event log.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Validate and persist a new queued job with one pending row per document.
    async fn create(&self, request: CreateJobRequest) -> Result<Uuid>;

    /// Get a job by id, `JobNotFound` if absent.
    async fn get(&self, job_id: Uuid) -> Result<IngestionJob>;

    /// Atomically add to progress (clamped to total) and optionally change status.
    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<IngestionJob>;

    /// Record that the job's search store has been confirmed.
    async fn mark_store_ready(&self, job_id: Uuid) -> Result<()>;

    /// Append an event and return its sequence id.
    async fn append_event(
        &self,
        job_id: Uuid,
        level: EventLevel,
        message: EventMessage,
        data: Option<JsonValue>,
    ) -> Result<i64>;

    /// Events with `id > after_id`, ascending, at most `limit`.
    async fn list_events(&self, job_id: Uuid, after_id: i64, limit: i64) -> Result<Vec<JobEvent>>;

    /// The job's documents in queue order.
    async fn documents(&self, job_id: Uuid) -> Result<Vec<TargetDocument>>;

    /// Persist a document's state change.
    async fn update_document(
        &self,
        job_id: Uuid,
        document_id: Uuid,
        update: DocumentUpdate,
    ) -> Result<()>;

    /// Try to take the per-job run lock. `None` when someone else holds it.
    async fn try_lock(&self, job_id: Uuid) -> Result<Option<Box<dyn RunLease>>>;
}

/// Read/write access to file stores and their attached documents.
#[async_trait]
pub trait StoreCatalog: Send + Sync {
    /// Get a file store by id.
    async fn get_store(&self, store_id: Uuid) -> Result<Option<FileStore>>;

    /// Ids of documents attached to a store, in attachment order.
    async fn store_document_ids(&self, store_id: Uuid) -> Result<Vec<Uuid>>;

    /// Register a file store backed by an already-provisioned search store.
    async fn create_store(
        &self,
        request: CreateFileStoreRequest,
        search_store_name: &str,
    ) -> Result<FileStore>;

    /// Attach documents to a store. Already-attached documents are ignored.
    async fn attach_documents(&self, store_id: Uuid, document_ids: &[Uuid]) -> Result<()>;
}

// =============================================================================
// EXTERNAL SERVICES
// =============================================================================

/// Source of document bytes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Download a document's bytes. `NotFound` when the object is missing.
    async fn fetch(&self, source: &DocumentSource) -> Result<Vec<u8>>;
}

/// Semantic file-search service.
#[async_trait]
pub trait FileSearchClient: Send + Sync {
    /// Provision a new search store, returning its resource name.
    async fn create_store(&self, display_name: &str) -> Result<String>;

    /// Confirm a store exists without re-creating it.
    async fn ensure_store(&self, store: &FileStore) -> Result<()>;

    /// Upload bytes, returning the uploaded file's resource name.
    async fn upload(&self, content: Vec<u8>, mime_type: &str, display_name: &str)
        -> Result<String>;

    /// Import an uploaded file into a store, returning the operation handle.
    async fn import(
        &self,
        file_name: &str,
        store_name: &str,
        chunking_config: Option<&JsonValue>,
    ) -> Result<String>;

    /// Poll a long-running operation once.
    async fn poll(&self, operation: &str) -> Result<OperationStatus>;
}
