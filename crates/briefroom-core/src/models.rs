//! Domain models for ingestion jobs, their documents, and file stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Succeeded and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether `self -> next` respects the monotonic status machine.
    ///
    /// Staying in the same non-terminal status is allowed; going back to
    /// `queued` or leaving a terminal status is not.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (JobStatus::Queued, _) => true,
            (JobStatus::Running, JobStatus::Queued) => false,
            (JobStatus::Running, _) => true,
            _ => false,
        }
    }

    /// Statuses a job may currently hold for an update to `next` to apply.
    /// `None` keeps the status, so only non-terminal statuses qualify.
    pub fn accepting(next: Option<JobStatus>) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|current| current.can_transition_to(next.unwrap_or(*current)))
            .collect()
    }
}

/// Kind of ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Index a batch of documents attached to a file store.
    IndexFileStore,
    /// Re-index a single document into its file store.
    ReindexDocument,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::IndexFileStore => "index_file_store",
            JobType::ReindexDocument => "reindex_document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "index_file_store" => Some(JobType::IndexFileStore),
            "reindex_document" => Some(JobType::ReindexDocument),
            _ => None,
        }
    }
}

/// An ingestion job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub file_store_id: Uuid,
    /// Number of documents that reached a terminal state.
    pub progress: i32,
    pub total: i32,
    pub error: Option<String>,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    /// Optimistic concurrency token, bumped on every update.
    pub version: i64,
    /// Set once the target search store has been confirmed for this job.
    pub store_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            progress: self.progress,
            total: self.total,
            error: self.error.clone(),
        }
    }
}

/// The snapshot returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: i32,
    pub total: i32,
    pub error: Option<String>,
}

/// Request to create an ingestion job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    pub file_store_id: Uuid,
    pub document_ids: Vec<Uuid>,
    pub payload: Option<JsonValue>,
}

impl CreateJobRequest {
    pub fn index(file_store_id: Uuid, document_ids: Vec<Uuid>) -> Self {
        Self {
            job_type: JobType::IndexFileStore,
            file_store_id,
            document_ids,
            payload: None,
        }
    }

    /// Document ids with duplicates removed, first occurrence wins.
    pub fn unique_document_ids(&self) -> Vec<Uuid> {
        let mut seen = std::collections::HashSet::new();
        self.document_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Atomic update of a job's counters and status.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub delta: i32,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
    pub result: Option<JsonValue>,
    /// When set, the update only applies if the row still has this version.
    pub expected_version: Option<i64>,
}

impl ProgressUpdate {
    pub fn advance(delta: i32) -> Self {
        Self {
            delta,
            ..Default::default()
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Severity of a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(EventLevel::Info),
            "warn" => Some(EventLevel::Warn),
            "error" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

/// Fixed vocabulary of event messages. UI and automation match on these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMessage {
    JobStarted,
    GeminiStoreReady,
    DownloadingFromStorage,
    UploadingToGeminiFilesApi,
    ImportingIntoFileSearchStore,
    PollingOperation,
    IndexedOk,
    IndexedFailed,
    JobSucceeded,
    JobFailed,
    JobCancelled,
}

impl EventMessage {
    pub const ALL: [EventMessage; 11] = [
        EventMessage::JobStarted,
        EventMessage::GeminiStoreReady,
        EventMessage::DownloadingFromStorage,
        EventMessage::UploadingToGeminiFilesApi,
        EventMessage::ImportingIntoFileSearchStore,
        EventMessage::PollingOperation,
        EventMessage::IndexedOk,
        EventMessage::IndexedFailed,
        EventMessage::JobSucceeded,
        EventMessage::JobFailed,
        EventMessage::JobCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventMessage::JobStarted => "job_started",
            EventMessage::GeminiStoreReady => "gemini_store_ready",
            EventMessage::DownloadingFromStorage => "downloading_from_storage",
            EventMessage::UploadingToGeminiFilesApi => "uploading_to_gemini_files_api",
            EventMessage::ImportingIntoFileSearchStore => "importing_into_file_search_store",
            EventMessage::PollingOperation => "polling_operation",
            EventMessage::IndexedOk => "indexed_ok",
            EventMessage::IndexedFailed => "indexed_failed",
            EventMessage::JobSucceeded => "job_succeeded",
            EventMessage::JobFailed => "job_failed",
            EventMessage::JobCancelled => "job_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for EventMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only job event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Monotonic sequence id, used as the polling cursor.
    pub id: i64,
    pub job_id: Uuid,
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub message: EventMessage,
    pub data: Option<JsonValue>,
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Where a document's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum DocumentSource {
    /// Relative path inside the object-storage bucket.
    Storage { path: String },
    /// Publicly reachable URL.
    ExternalUrl { url: String },
}

impl DocumentSource {
    /// Short description for logs and error messages.
    pub fn describe(&self) -> &str {
        match self {
            DocumentSource::Storage { path } => path,
            DocumentSource::ExternalUrl { url } => url,
        }
    }
}

/// A document known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub title: String,
    pub source: DocumentSource,
    pub mime_type: Option<String>,
    pub original_filename: Option<String>,
}

impl StoredDocument {
    /// Name shown in the file-search service.
    pub fn display_name(&self) -> String {
        if !self.title.trim().is_empty() {
            self.title.clone()
        } else {
            self.original_filename
                .clone()
                .unwrap_or_else(|| "document".to_string())
        }
    }

    /// MIME type sent on upload, guessed from the filename when missing.
    pub fn effective_mime_type(&self) -> String {
        if let Some(mime) = self.mime_type.as_deref().filter(|m| !m.is_empty()) {
            return mime.to_string();
        }
        let name = self
            .original_filename
            .as_deref()
            .unwrap_or(self.source.describe())
            .to_ascii_lowercase();
        if name.ends_with(".pdf") {
            "application/pdf".to_string()
        } else if name.ends_with(".md") || name.ends_with(".markdown") {
            "text/markdown".to_string()
        } else {
            "application/octet-stream".to_string()
        }
    }
}

/// Per-document indexing state inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Downloading,
    Uploading,
    Importing,
    PollingOperation,
    Indexed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Downloading => "downloading",
            DocumentState::Uploading => "uploading",
            DocumentState::Importing => "importing",
            DocumentState::PollingOperation => "polling_operation",
            DocumentState::Indexed => "indexed",
            DocumentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentState::Pending),
            "downloading" => Some(DocumentState::Downloading),
            "uploading" => Some(DocumentState::Uploading),
            "importing" => Some(DocumentState::Importing),
            "polling_operation" => Some(DocumentState::PollingOperation),
            "indexed" => Some(DocumentState::Indexed),
            "failed" => Some(DocumentState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Indexed | DocumentState::Failed)
    }

    /// A slice stopped while the document was between external calls.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            DocumentState::Downloading | DocumentState::Uploading | DocumentState::Importing
        )
    }
}

/// A document queued inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDocument {
    pub job_id: Uuid,
    pub document_id: Uuid,
    /// Queue order within the job.
    pub position: i32,
    pub state: DocumentState,
    pub source: DocumentSource,
    pub display_name: String,
    pub mime_type: String,
    /// Uploaded file handle, once known.
    pub file_name: Option<String>,
    /// Long-running import operation handle, once known.
    pub operation: Option<String>,
    pub poll_attempts: i32,
    pub error: Option<String>,
}

/// Partial update of a target document. `None` fields are left unchanged.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub state: DocumentState,
    pub file_name: Option<String>,
    pub operation: Option<String>,
    pub poll_attempts: Option<i32>,
    pub error: Option<String>,
}

impl DocumentUpdate {
    pub fn state(state: DocumentState) -> Self {
        Self {
            state,
            file_name: None,
            operation: None,
            poll_attempts: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::state(DocumentState::Failed)
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_poll_attempts(mut self, attempts: i32) -> Self {
        self.poll_attempts = Some(attempts);
        self
    }
}

// =============================================================================
// FILE STORES
// =============================================================================

/// A group of documents mirrored into one external search store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStore {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// External resource name, e.g. `fileSearchStores/abc123`.
    pub search_store_name: String,
    pub chunking_config: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// Request to register a file store in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileStoreRequest {
    pub name: String,
    pub description: Option<String>,
    pub chunking_config: Option<JsonValue>,
}

/// Result of polling a long-running import operation once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub done: bool,
    pub error: Option<String>,
}

impl OperationStatus {
    pub fn pending() -> Self {
        Self {
            done: false,
            error: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            done: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_strings_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("completed"), None);
    }

    #[test]
    fn test_job_status_transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_statuses_accepting_an_update() {
        assert_eq!(
            JobStatus::accepting(None),
            vec![JobStatus::Queued, JobStatus::Running]
        );
        assert_eq!(
            JobStatus::accepting(Some(JobStatus::Succeeded)),
            vec![JobStatus::Queued, JobStatus::Running]
        );
        assert_eq!(
            JobStatus::accepting(Some(JobStatus::Queued)),
            vec![JobStatus::Queued]
        );
    }

    #[test]
    fn test_job_status_serde_lowercase() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }

    #[test]
    fn test_event_message_vocabulary_is_exact() {
        let strings: Vec<&str> = EventMessage::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(
            strings,
            vec![
                "job_started",
                "gemini_store_ready",
                "downloading_from_storage",
                "uploading_to_gemini_files_api",
                "importing_into_file_search_store",
                "polling_operation",
                "indexed_ok",
                "indexed_failed",
                "job_succeeded",
                "job_failed",
                "job_cancelled",
            ]
        );
        for message in EventMessage::ALL {
            assert_eq!(EventMessage::parse(message.as_str()), Some(message));
            let json = serde_json::to_string(&message).unwrap();
            assert_eq!(json, format!("\"{}\"", message.as_str()));
        }
    }

    #[test]
    fn test_document_state_terminal_and_interrupted() {
        assert!(DocumentState::Indexed.is_terminal());
        assert!(DocumentState::Failed.is_terminal());
        assert!(!DocumentState::PollingOperation.is_terminal());
        assert!(DocumentState::Uploading.is_interrupted());
        assert!(!DocumentState::PollingOperation.is_interrupted());
        assert!(!DocumentState::Pending.is_interrupted());
        assert_eq!(
            DocumentState::parse("polling_operation"),
            Some(DocumentState::PollingOperation)
        );
    }

    #[test]
    fn test_unique_document_ids_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let req = CreateJobRequest::index(Uuid::new_v4(), vec![a, b, a, b, a]);
        assert_eq!(req.unique_document_ids(), vec![a, b]);
    }

    #[test]
    fn test_stored_document_display_name_fallbacks() {
        let mut doc = StoredDocument {
            id: Uuid::new_v4(),
            title: "Quarterly report".to_string(),
            source: DocumentSource::Storage {
                path: "abc/report.pdf".to_string(),
            },
            mime_type: None,
            original_filename: Some("report.pdf".to_string()),
        };
        assert_eq!(doc.display_name(), "Quarterly report");
        assert_eq!(doc.effective_mime_type(), "application/pdf");

        doc.title = "  ".to_string();
        assert_eq!(doc.display_name(), "report.pdf");

        doc.original_filename = None;
        assert_eq!(doc.display_name(), "document");
    }

    #[test]
    fn test_document_source_serde_tagged() {
        let source = DocumentSource::ExternalUrl {
            url: "https://example.com/a.md".to_string(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["source_type"], "external_url");
        assert_eq!(json["url"], "https://example.com/a.md");
    }
}
