//! Mock clients for deterministic testing.
//!
//! Latency is simulated with `tokio::time::sleep`, so tests running with a
//! paused clock can drive time-boxing without waiting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use briefroom_clients::mock::{MockDocumentStore, MockFileSearchClient};
//!
//! let search = MockFileSearchClient::new()
//!     .with_latency_ms(2_000)
//!     .with_polls_until_done(2)
//!     .fail_upload_for("broken.pdf");
//! let storage = MockDocumentStore::new().with_missing("gone/file.pdf");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use briefroom_core::{
    DocumentSource, DocumentStore, Error, FileSearchClient, FileStore, OperationStatus, Result,
};

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_call(log: &CallLog, operation: &str, input: &str) {
    lock(log).push(MockCall {
        operation: operation.to_string(),
        input: input.to_string(),
    });
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

// =============================================================================
// FILE SEARCH
// =============================================================================

#[derive(Debug, Clone, Default)]
struct SearchConfig {
    latency: Duration,
    poll_latency: Duration,
    polls_until_done: u32,
    fail_create_store: bool,
    fail_ensure_store: bool,
    fail_upload: HashSet<String>,
    fail_import: HashSet<String>,
    fail_operation: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct SearchState {
    next_id: u64,
    /// Uploaded file name -> display name.
    files: HashMap<String, String>,
    /// Operation name -> (display name, polls so far).
    operations: HashMap<String, (String, u32)>,
}

/// Mock file-search service.
#[derive(Clone, Default)]
pub struct MockFileSearchClient {
    config: Arc<SearchConfig>,
    state: Arc<Mutex<SearchState>>,
    call_log: CallLog,
}

impl MockFileSearchClient {
    /// Create a mock whose operations finish on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency of every call except `poll`.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency = Duration::from_millis(latency_ms);
        self
    }

    /// Simulated latency of `poll`.
    pub fn with_poll_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).poll_latency = Duration::from_millis(latency_ms);
        self
    }

    /// Number of polls before an operation reports done. `0` and `1` both
    /// finish on the first poll.
    pub fn with_polls_until_done(mut self, polls: u32) -> Self {
        Arc::make_mut(&mut self.config).polls_until_done = polls;
        self
    }

    pub fn fail_create_store(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_create_store = true;
        self
    }

    pub fn fail_ensure_store(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_ensure_store = true;
        self
    }

    /// Fail uploads of the document with this display name.
    pub fn fail_upload_for(mut self, display_name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .fail_upload
            .insert(display_name.into());
        self
    }

    /// Fail the import call for the document with this display name.
    pub fn fail_import_for(mut self, display_name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .fail_import
            .insert(display_name.into());
        self
    }

    /// Finish the document's import operation with an error.
    pub fn fail_operation_for(
        mut self,
        display_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .fail_operation
            .insert(display_name.into(), error.into());
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Number of calls of one operation (`upload`, `import`, `poll`, ...).
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Number of calls of one operation for one input.
    pub fn call_count_for(&self, operation: &str, input: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.operation == operation && c.input == input)
            .count()
    }

    fn next_name(&self, prefix: &str) -> String {
        let mut state = lock(&self.state);
        state.next_id += 1;
        format!("{}/mock-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl FileSearchClient for MockFileSearchClient {
    async fn create_store(&self, display_name: &str) -> Result<String> {
        log_call(&self.call_log, "create_store", display_name);
        simulate_latency(self.config.latency).await;
        if self.config.fail_create_store {
            return Err(Error::FileSearch("create_store failed: 500".to_string()));
        }
        Ok(self.next_name("fileSearchStores"))
    }

    async fn ensure_store(&self, store: &FileStore) -> Result<()> {
        log_call(&self.call_log, "ensure_store", &store.search_store_name);
        simulate_latency(self.config.latency).await;
        if self.config.fail_ensure_store {
            return Err(Error::FileSearch("ensure_store failed: 503".to_string()));
        }
        Ok(())
    }

    async fn upload(&self, content: Vec<u8>, _mime_type: &str, display_name: &str) -> Result<String> {
        log_call(&self.call_log, "upload", display_name);
        simulate_latency(self.config.latency).await;
        if self.config.fail_upload.contains(display_name) {
            return Err(Error::FileSearch(format!(
                "upload finalize failed: 400 rejected {} bytes",
                content.len()
            )));
        }
        let name = self.next_name("files");
        lock(&self.state)
            .files
            .insert(name.clone(), display_name.to_string());
        Ok(name)
    }

    async fn import(
        &self,
        file_name: &str,
        store_name: &str,
        _chunking_config: Option<&JsonValue>,
    ) -> Result<String> {
        log_call(&self.call_log, "import", file_name);
        simulate_latency(self.config.latency).await;

        let display_name = lock(&self.state)
            .files
            .get(file_name)
            .cloned()
            .ok_or_else(|| Error::FileSearch(format!("importFile failed: 404 {}", file_name)))?;
        if self.config.fail_import.contains(&display_name) {
            return Err(Error::FileSearch(format!(
                "importFile failed: 400 {} into {}",
                file_name, store_name
            )));
        }

        let name = self.next_name(&format!("{}/operations", store_name));
        lock(&self.state)
            .operations
            .insert(name.clone(), (display_name, 0));
        Ok(name)
    }

    async fn poll(&self, operation: &str) -> Result<OperationStatus> {
        log_call(&self.call_log, "poll", operation);
        simulate_latency(self.config.poll_latency).await;

        let mut state = lock(&self.state);
        let (display_name, polls) = state
            .operations
            .get_mut(operation)
            .ok_or_else(|| Error::FileSearch(format!("operations.get failed: 404 {}", operation)))?;
        *polls += 1;
        if *polls < self.config.polls_until_done {
            return Ok(OperationStatus::pending());
        }
        Ok(match self.config.fail_operation.get(display_name.as_str()) {
            Some(error) => OperationStatus::failed(error.clone()),
            None => OperationStatus::succeeded(),
        })
    }
}

// =============================================================================
// DOCUMENT STORE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct StoreConfig {
    latency: Duration,
    missing: HashSet<String>,
    failing: HashSet<String>,
}

/// Mock document byte source. Every location resolves to a small PDF-like
/// payload unless marked missing or failing.
#[derive(Clone, Default)]
pub struct MockDocumentStore {
    config: Arc<StoreConfig>,
    call_log: CallLog,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated latency of every download.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency = Duration::from_millis(latency_ms);
        self
    }

    /// Report this path or URL as missing (`NotFound`).
    pub fn with_missing(mut self, location: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .missing
            .insert(location.into());
        self
    }

    /// Fail downloads of this path or URL with a storage error.
    pub fn with_failing(mut self, location: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .failing
            .insert(location.into());
        self
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Number of downloads of one location.
    pub fn fetch_count(&self, location: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.input == location)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn fetch(&self, source: &DocumentSource) -> Result<Vec<u8>> {
        let location = source.describe();
        log_call(&self.call_log, "fetch", location);
        simulate_latency(self.config.latency).await;

        if self.config.missing.contains(location) {
            return Err(Error::NotFound(format!("object {}", location)));
        }
        if self.config.failing.contains(location) {
            return Err(Error::Storage(format!(
                "Download of {} failed: 500",
                location
            )));
        }
        Ok(format!("%PDF-1.7 mock content of {}", location).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operation_finishes_after_configured_polls() {
        let client = MockFileSearchClient::new().with_polls_until_done(3);
        let file = client.upload(vec![1, 2, 3], "application/pdf", "a.pdf").await.unwrap();
        let op = client.import(&file, "fileSearchStores/s", None).await.unwrap();

        assert!(!client.poll(&op).await.unwrap().done);
        assert!(!client.poll(&op).await.unwrap().done);
        assert_eq!(client.poll(&op).await.unwrap(), OperationStatus::succeeded());
        assert_eq!(client.call_count("poll"), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_by_display_name() {
        let client = MockFileSearchClient::new()
            .fail_upload_for("bad upload")
            .fail_operation_for("bad op", "unsupported file");

        assert!(client.upload(vec![], "text/plain", "bad upload").await.is_err());

        let file = client.upload(vec![], "text/plain", "bad op").await.unwrap();
        let op = client.import(&file, "fileSearchStores/s", None).await.unwrap();
        assert_eq!(
            client.poll(&op).await.unwrap(),
            OperationStatus::failed("unsupported file")
        );
    }

    #[tokio::test]
    async fn test_document_store_missing_and_failing() {
        let store = MockDocumentStore::new()
            .with_missing("gone.pdf")
            .with_failing("flaky.pdf");

        let ok = store
            .fetch(&DocumentSource::Storage {
                path: "fine.pdf".to_string(),
            })
            .await
            .unwrap();
        assert!(!ok.is_empty());

        let missing = store
            .fetch(&DocumentSource::Storage {
                path: "gone.pdf".to_string(),
            })
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let failing = store
            .fetch(&DocumentSource::ExternalUrl {
                url: "flaky.pdf".to_string(),
            })
            .await;
        assert!(matches!(failing, Err(Error::Storage(_))));
        assert_eq!(store.fetch_count("fine.pdf"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_clock() {
        let store = MockDocumentStore::new().with_latency_ms(5_000);
        let start = tokio::time::Instant::now();
        store
            .fetch(&DocumentSource::Storage {
                path: "a.pdf".to_string(),
            })
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
