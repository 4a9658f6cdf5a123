//! In-memory ledger and catalog.
//!
//! Mirrors the PostgreSQL semantics (validation, clamped progress, monotonic
//! status, CAS versions, per-job locks) so the executor, scheduler and API can
//! be exercised without a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use briefroom_core::{
    CreateFileStoreRequest, CreateJobRequest, DocumentState, DocumentUpdate, Error, EventLevel,
    EventMessage, FileStore, IngestionJob, JobEvent, JobLedger, JobStatus, ProgressUpdate, Result,
    RunLease, StoreCatalog, StoredDocument, TargetDocument,
};

use crate::jobs::rejected_transition;

#[derive(Default)]
struct State {
    stores: HashMap<Uuid, FileStore>,
    /// Attached document ids per store, in attachment order.
    attachments: HashMap<Uuid, Vec<Uuid>>,
    documents: HashMap<Uuid, StoredDocument>,
    jobs: HashMap<Uuid, IngestionJob>,
    targets: HashMap<Uuid, Vec<TargetDocument>>,
    events: Vec<JobEvent>,
    next_event_id: i64,
}

/// Shared in-memory database. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashSet<Uuid>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory ledger state poisoned".to_string()))
    }

    /// Register a document so jobs can reference it.
    pub fn insert_document(&self, doc: StoredDocument) -> Result<()> {
        self.state()?.documents.insert(doc.id, doc);
        Ok(())
    }

    /// Register a file store directly, bypassing the search service.
    pub fn insert_store(&self, store: FileStore) -> Result<()> {
        let mut state = self.state()?;
        state.attachments.entry(store.id).or_default();
        state.stores.insert(store.id, store);
        Ok(())
    }

    /// Remove a file store and its attachments.
    pub fn remove_store(&self, store_id: Uuid) -> Result<()> {
        let mut state = self.state()?;
        state.stores.remove(&store_id);
        state.attachments.remove(&store_id);
        Ok(())
    }

    /// Number of events recorded for a job.
    pub fn event_count(&self, job_id: Uuid) -> Result<usize> {
        Ok(self
            .state()?
            .events
            .iter()
            .filter(|e| e.job_id == job_id)
            .count())
    }
}

/// Lease over an entry in the shared lock set. Dropping it frees the entry.
pub struct MemoryRunLease {
    job_id: Uuid,
    locks: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for MemoryRunLease {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&self.job_id);
    }
}

#[async_trait]
impl RunLease for MemoryRunLease {
    fn job_id(&self) -> Uuid {
        self.job_id
    }

    async fn release(self: Box<Self>) -> Result<()> {
        debug!(job_id = %self.job_id, "Released run lock");
        Ok(())
    }
}

#[async_trait]
impl JobLedger for MemoryDatabase {
    async fn create(&self, request: CreateJobRequest) -> Result<Uuid> {
        let document_ids = request.unique_document_ids();
        if document_ids.is_empty() {
            return Err(Error::InvalidInput(
                "document_ids must not be empty".to_string(),
            ));
        }

        let mut state = self.state()?;
        if !state.stores.contains_key(&request.file_store_id) {
            return Err(Error::InvalidInput(format!(
                "Unknown file store: {}",
                request.file_store_id
            )));
        }
        let missing: Vec<String> = document_ids
            .iter()
            .filter(|id| !state.documents.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Unknown or unreadable documents: {}",
                missing.join(", ")
            )));
        }

        let job_id = Uuid::now_v7();
        let now = Utc::now();
        let targets: Vec<TargetDocument> = document_ids
            .iter()
            .enumerate()
            .filter_map(|(position, id)| state.documents.get(id).map(|doc| (position, doc)))
            .map(|(position, doc)| TargetDocument {
                job_id,
                document_id: doc.id,
                position: position as i32,
                state: DocumentState::Pending,
                source: doc.source.clone(),
                display_name: doc.display_name(),
                mime_type: doc.effective_mime_type(),
                file_name: None,
                operation: None,
                poll_attempts: 0,
                error: None,
            })
            .collect();

        state.jobs.insert(
            job_id,
            IngestionJob {
                id: job_id,
                job_type: request.job_type,
                status: JobStatus::Queued,
                file_store_id: request.file_store_id,
                progress: 0,
                total: targets.len() as i32,
                error: None,
                payload: request.payload,
                result: None,
                version: 0,
                store_ready: false,
                created_at: now,
                updated_at: now,
            },
        );
        state.targets.insert(job_id, targets);
        Ok(job_id)
    }

    async fn get(&self, job_id: Uuid) -> Result<IngestionJob> {
        self.state()?
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<IngestionJob> {
        if update.delta < 0 {
            return Err(Error::InvalidInput(format!(
                "Progress delta must not be negative: {}",
                update.delta
            )));
        }
        if update.status == Some(JobStatus::Queued) {
            return Err(Error::InvalidInput(
                "A job cannot move back to queued".to_string(),
            ));
        }

        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;

        if !job.status.can_transition_to(update.status.unwrap_or(job.status)) {
            return Err(rejected_transition(job_id, job.status, update.status));
        }
        if let Some(expected) = update.expected_version {
            if expected != job.version {
                return Err(Error::Conflict(format!(
                    "Job {} was modified concurrently (expected version {:?}, found {})",
                    job_id, update.expected_version, job.version
                )));
            }
        }

        job.progress = (job.progress + update.delta).min(job.total);
        if let Some(status) = update.status {
            job.status = status;
        }
        if update.error.is_some() {
            job.error = update.error;
        }
        if update.result.is_some() {
            job.result = update.result;
        }
        job.version += 1;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn mark_store_ready(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.store_ready = true;
        Ok(())
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        level: EventLevel,
        message: EventMessage,
        data: Option<JsonValue>,
    ) -> Result<i64> {
        let mut state = self.state()?;
        if !state.jobs.contains_key(&job_id) {
            return Err(Error::JobNotFound(job_id));
        }
        state.next_event_id += 1;
        let id = state.next_event_id;
        state.events.push(JobEvent {
            id,
            job_id,
            ts: Utc::now(),
            level,
            message,
            data,
        });
        Ok(id)
    }

    async fn list_events(&self, job_id: Uuid, after_id: i64, limit: i64) -> Result<Vec<JobEvent>> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .state()?
            .events
            .iter()
            .filter(|e| e.job_id == job_id && e.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn documents(&self, job_id: Uuid) -> Result<Vec<TargetDocument>> {
        Ok(self
            .state()?
            .targets
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_document(
        &self,
        job_id: Uuid,
        document_id: Uuid,
        update: DocumentUpdate,
    ) -> Result<()> {
        let mut state = self.state()?;
        let target = state
            .targets
            .get_mut(&job_id)
            .and_then(|docs| docs.iter_mut().find(|d| d.document_id == document_id))
            .ok_or_else(|| {
                Error::NotFound(format!("Document {} in job {}", document_id, job_id))
            })?;

        target.state = update.state;
        if update.file_name.is_some() {
            target.file_name = update.file_name;
        }
        if update.operation.is_some() {
            target.operation = update.operation;
        }
        if let Some(attempts) = update.poll_attempts {
            target.poll_attempts = attempts;
        }
        if update.error.is_some() {
            target.error = update.error;
        }
        Ok(())
    }

    async fn try_lock(&self, job_id: Uuid) -> Result<Option<Box<dyn RunLease>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Internal("memory lock set poisoned".to_string()))?;
        if !locks.insert(job_id) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryRunLease {
            job_id,
            locks: Arc::clone(&self.locks),
        })))
    }
}

#[async_trait]
impl StoreCatalog for MemoryDatabase {
    async fn get_store(&self, store_id: Uuid) -> Result<Option<FileStore>> {
        Ok(self.state()?.stores.get(&store_id).cloned())
    }

    async fn store_document_ids(&self, store_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state()?
            .attachments
            .get(&store_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_store(
        &self,
        request: CreateFileStoreRequest,
        search_store_name: &str,
    ) -> Result<FileStore> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("name must not be empty".to_string()));
        }

        let mut state = self.state()?;
        if state
            .stores
            .values()
            .any(|s| s.name == name || s.search_store_name == search_store_name)
        {
            return Err(Error::Conflict(format!(
                "A file store named {} already exists",
                request.name
            )));
        }

        let store = FileStore {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: request.description,
            search_store_name: search_store_name.to_string(),
            chunking_config: request.chunking_config,
            created_at: Utc::now(),
        };
        state.attachments.insert(store.id, Vec::new());
        state.stores.insert(store.id, store.clone());
        Ok(store)
    }

    async fn attach_documents(&self, store_id: Uuid, document_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state()?;
        if !state.stores.contains_key(&store_id) {
            return Err(Error::NotFound(format!("File store {}", store_id)));
        }
        let unknown: Vec<String> = document_ids
            .iter()
            .filter(|id| !state.documents.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Unknown documents: {}",
                unknown.join(", ")
            )));
        }

        let attached = state.attachments.entry(store_id).or_default();
        for id in document_ids {
            if !attached.contains(id) {
                attached.push(*id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefroom_core::DocumentSource;

    fn doc(title: &str) -> StoredDocument {
        StoredDocument {
            id: Uuid::new_v4(),
            title: title.to_string(),
            source: DocumentSource::Storage {
                path: format!("uploads/{}.pdf", title),
            },
            mime_type: Some("application/pdf".to_string()),
            original_filename: None,
        }
    }

    async fn seeded() -> (MemoryDatabase, FileStore, Vec<Uuid>) {
        let db = MemoryDatabase::new();
        let store = db
            .create_store(
                CreateFileStoreRequest {
                    name: "Board pack".to_string(),
                    description: None,
                    chunking_config: None,
                },
                "fileSearchStores/board-pack",
            )
            .await
            .unwrap();
        let ids: Vec<Uuid> = ["a", "b", "c"]
            .iter()
            .map(|t| {
                let d = doc(t);
                let id = d.id;
                db.insert_document(d).unwrap();
                id
            })
            .collect();
        (db, store, ids)
    }

    #[tokio::test]
    async fn test_create_rejects_empty_and_unknown() {
        let (db, store, _) = seeded().await;

        let empty = db.create(CreateJobRequest::index(store.id, vec![])).await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));

        let unknown = db
            .create(CreateJobRequest::index(store.id, vec![Uuid::new_v4()]))
            .await;
        assert!(matches!(unknown, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_collapses_duplicates_in_order() {
        let (db, store, ids) = seeded().await;
        let job_id = db
            .create(CreateJobRequest::index(
                store.id,
                vec![ids[2], ids[0], ids[2]],
            ))
            .await
            .unwrap();

        let job = db.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.total, 2);
        assert_eq!(job.progress, 0);

        let docs = db.documents(job_id).await.unwrap();
        let order: Vec<Uuid> = docs.iter().map(|d| d.document_id).collect();
        assert_eq!(order, vec![ids[2], ids[0]]);
        assert!(docs.iter().all(|d| d.state == DocumentState::Pending));
    }

    #[tokio::test]
    async fn test_update_progress_clamps_and_rejects_terminal() {
        let (db, store, ids) = seeded().await;
        let job_id = db
            .create(CreateJobRequest::index(store.id, ids.clone()))
            .await
            .unwrap();

        let job = db
            .update_progress(job_id, ProgressUpdate::advance(10))
            .await
            .unwrap();
        assert_eq!(job.progress, 3);

        db.update_progress(job_id, ProgressUpdate::status(JobStatus::Succeeded))
            .await
            .unwrap();
        let again = db
            .update_progress(job_id, ProgressUpdate::status(JobStatus::Running))
            .await;
        assert!(matches!(again, Err(Error::Conflict(_))));

        let progress_only = db.update_progress(job_id, ProgressUpdate::advance(0)).await;
        assert!(matches!(progress_only, Err(Error::Conflict(_))));
        assert_eq!(db.get(job_id).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_update_progress_checks_version() {
        let (db, store, ids) = seeded().await;
        let job_id = db
            .create(CreateJobRequest::index(store.id, ids))
            .await
            .unwrap();
        let job = db.get(job_id).await.unwrap();

        db.update_progress(job_id, ProgressUpdate::advance(1).expecting(job.version))
            .await
            .unwrap();
        let stale = db
            .update_progress(job_id, ProgressUpdate::advance(1).expecting(job.version))
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));
        assert_eq!(db.get(job_id).await.unwrap().progress, 1);
    }

    #[tokio::test]
    async fn test_update_progress_rejects_negative_and_requeue() {
        let (db, store, ids) = seeded().await;
        let job_id = db
            .create(CreateJobRequest::index(store.id, ids))
            .await
            .unwrap();

        let negative = db.update_progress(job_id, ProgressUpdate::advance(-1)).await;
        assert!(matches!(negative, Err(Error::InvalidInput(_))));

        let requeue = db
            .update_progress(job_id, ProgressUpdate::status(JobStatus::Queued))
            .await;
        assert!(matches!(requeue, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_event_cursor() {
        let (db, store, ids) = seeded().await;
        let job_id = db
            .create(CreateJobRequest::index(store.id, ids))
            .await
            .unwrap();

        let first = db
            .append_event(job_id, EventLevel::Info, EventMessage::JobStarted, None)
            .await
            .unwrap();
        let second = db
            .append_event(job_id, EventLevel::Info, EventMessage::GeminiStoreReady, None)
            .await
            .unwrap();
        assert!(second > first);

        let tail = db.list_events(job_id, first, 500).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, EventMessage::GeminiStoreReady);

        let unknown = db
            .append_event(Uuid::new_v4(), EventLevel::Info, EventMessage::JobStarted, None)
            .await;
        assert!(matches!(unknown, Err(Error::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_freed_on_drop() {
        let db = MemoryDatabase::new();
        let job_id = Uuid::new_v4();

        let lease = db.try_lock(job_id).await.unwrap().unwrap();
        assert!(db.try_lock(job_id).await.unwrap().is_none());
        drop(lease);

        let lease = db.try_lock(job_id).await.unwrap().unwrap();
        lease.release().await.unwrap();
        assert!(db.try_lock(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_attach_documents_is_idempotent() {
        let (db, store, ids) = seeded().await;
        db.attach_documents(store.id, &[ids[1], ids[0]]).await.unwrap();
        db.attach_documents(store.id, &[ids[0], ids[2]]).await.unwrap();

        let attached = db.store_document_ids(store.id).await.unwrap();
        assert_eq!(attached, vec![ids[1], ids[0], ids[2]]);

        let missing = db.attach_documents(Uuid::new_v4(), &ids).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_store_rejects_duplicate_name() {
        let (db, _, _) = seeded().await;
        let dup = db
            .create_store(
                CreateFileStoreRequest {
                    name: "Board pack".to_string(),
                    description: None,
                    chunking_config: None,
                },
                "fileSearchStores/other",
            )
            .await;
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }
}
