//! File-search service client (Gemini File Search REST API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use briefroom_core::{defaults, Error, FileSearchClient, FileStore, OperationStatus, Result};

/// Response header carrying the session URL of a resumable upload.
pub const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Longest response body excerpt kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

/// Configuration for the file-search client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// REST base, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub base_url: String,
    /// Upload base, e.g. `https://generativelanguage.googleapis.com/upload/v1beta`.
    pub upload_base_url: String,
    /// API key, sent as `key` query parameter and `x-goog-api-key` header.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::GEMINI_BASE_URL.to_string(),
            upload_base_url: defaults::GEMINI_UPLOAD_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_seconds: defaults::GEMINI_TIMEOUT_SECS,
        }
    }
}

impl GeminiConfig {
    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GEMINI_API_KEY` | required |
    /// | `GEMINI_BASE_URL` | `https://generativelanguage.googleapis.com/v1beta` |
    /// | `GEMINI_UPLOAD_BASE_URL` | `https://generativelanguage.googleapis.com/upload/v1beta` |
    /// | `GEMINI_TIMEOUT` | `120` |
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map(|k| k.trim().to_string())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(Error::Config("Missing GEMINI_API_KEY env var".to_string()));
        }

        Ok(Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| defaults::GEMINI_BASE_URL.to_string()),
            upload_base_url: std::env::var("GEMINI_UPLOAD_BASE_URL")
                .unwrap_or_else(|_| defaults::GEMINI_UPLOAD_BASE_URL.to_string()),
            api_key,
            timeout_seconds: std::env::var("GEMINI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::GEMINI_TIMEOUT_SECS),
        })
    }

    /// Config pointing both bases at one server. Used against local fakes.
    pub fn with_base(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            upload_base_url: format!("{}/upload", base.trim_end_matches('/')),
            base_url: base,
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

/// HTTP implementation of [`FileSearchClient`].
pub struct GeminiFileSearchClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiFileSearchClient {
    /// Create a new client with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("File-search API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "clients",
            component = "file_search",
            base_url = %config.base_url,
            timeout_secs = config.timeout_seconds,
            "Initializing file-search client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn upload_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.upload_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Attach the API key both ways.
    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.query(&[("key", self.config.api_key.as_str())])
            .header("x-goog-api-key", &self.config.api_key)
    }

    async fn send(&self, req: RequestBuilder, op: &str) -> Result<Response> {
        self.authed(req)
            .send()
            .await
            .map_err(|e| Error::FileSearch(format!("{} request failed: {}", op, e)))
    }

    /// Decode a JSON body, turning non-success statuses into errors.
    async fn json_or_error(resp: Response, op: &str) -> Result<JsonValue> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::status_error(resp, op).await);
        }
        resp.json::<JsonValue>()
            .await
            .map_err(|e| Error::FileSearch(format!("{} returned invalid JSON: {}", op, e)))
    }

    async fn status_error(resp: Response, op: &str) -> Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        warn!(
            subsystem = "clients",
            component = "file_search",
            op,
            status = status.as_u16(),
            "File-search call failed"
        );
        Error::FileSearch(format!("{} failed: {} {}", op, status.as_u16(), excerpt))
    }

    fn required_str(body: &JsonValue, field: &str, op: &str) -> Result<String> {
        body.get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::FileSearch(format!("{} response missing {}: {}", op, field, body)))
    }
}

/// Extract a readable message from an operation's `error` object.
fn operation_error(body: &JsonValue) -> Option<String> {
    let error = body.get("error").filter(|e| !e.is_null())?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

#[async_trait]
impl FileSearchClient for GeminiFileSearchClient {
    async fn create_store(&self, display_name: &str) -> Result<String> {
        let req = self
            .client
            .post(self.api_url("fileSearchStores"))
            .json(&json!({ "displayName": display_name }));
        let body = Self::json_or_error(self.send(req, "create_store").await?, "create_store").await?;
        let name = Self::required_str(&body, "name", "create_store")?;
        info!(store = %name, "Created file search store");
        Ok(name)
    }

    async fn ensure_store(&self, store: &FileStore) -> Result<()> {
        let req = self.client.get(self.api_url(&store.search_store_name));
        let resp = self.send(req, "ensure_store").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "Search store {} does not exist",
                store.search_store_name
            )));
        }
        Self::json_or_error(resp, "ensure_store").await?;
        debug!(store = %store.search_store_name, "Search store confirmed");
        Ok(())
    }

    async fn upload(&self, content: Vec<u8>, mime_type: &str, display_name: &str) -> Result<String> {
        let length = content.len();

        let start = self
            .client
            .post(self.upload_url("files"))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", length.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "displayName": display_name } }));
        let start_resp = self.send(start, "upload start").await?;
        if !start_resp.status().is_success() {
            return Err(Self::status_error(start_resp, "upload start").await);
        }
        let session_url = start_resp
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::FileSearch(format!(
                    "Missing {} in resumable upload response",
                    UPLOAD_URL_HEADER
                ))
            })?;

        let finalize = self
            .client
            .post(&session_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(content);
        let body = Self::json_or_error(
            self.send(finalize, "upload finalize").await?,
            "upload finalize",
        )
        .await?;

        let file = body.get("file").unwrap_or(&body);
        let name = Self::required_str(file, "name", "upload finalize")?;
        debug!(file = %name, bytes = length, "Uploaded file");
        Ok(name)
    }

    async fn import(
        &self,
        file_name: &str,
        store_name: &str,
        chunking_config: Option<&JsonValue>,
    ) -> Result<String> {
        let mut body = json!({ "fileName": file_name });
        if let Some(config) = chunking_config.filter(|c| !c.is_null()) {
            body["chunkingConfig"] = config.clone();
        }
        let req = self
            .client
            .post(self.api_url(&format!("{}:importFile", store_name)))
            .json(&body);
        let resp = Self::json_or_error(self.send(req, "importFile").await?, "importFile").await?;
        Self::required_str(&resp, "name", "importFile")
    }

    async fn poll(&self, operation: &str) -> Result<OperationStatus> {
        let req = self.client.get(self.api_url(operation));
        let body = Self::json_or_error(self.send(req, "operations.get").await?, "operations.get")
            .await?;

        let done = body.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
        Ok(match (done, operation_error(&body)) {
            (_, Some(error)) => OperationStatus::failed(error),
            (true, None) => OperationStatus::succeeded(),
            (false, None) => OperationStatus::pending(),
        })
    }
}
