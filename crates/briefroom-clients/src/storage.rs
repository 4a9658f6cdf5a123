//! Document byte source: object storage bucket plus plain external URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};

use briefroom_core::{defaults, DocumentSource, DocumentStore, Error, Result};

/// Configuration for the object storage client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    /// Service role key, sent as bearer token and `apikey` header.
    pub service_key: String,
    /// Bucket holding document bytes.
    pub bucket: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl StorageConfig {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_key: service_key.into(),
            bucket: defaults::STORAGE_BUCKET.to_string(),
            timeout_seconds: defaults::STORAGE_TIMEOUT_SECS,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SUPABASE_URL` | required |
    /// | `SUPABASE_SERVICE_ROLE_KEY` | required |
    /// | `SUPABASE_STORAGE_BUCKET` | `documents` |
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SUPABASE_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .unwrap_or_default();
        if base_url.is_empty() {
            return Err(Error::Config("Missing SUPABASE_URL env var".to_string()));
        }
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map(|k| k.trim().to_string())
            .unwrap_or_default();
        if service_key.is_empty() {
            return Err(Error::Config(
                "Missing SUPABASE_SERVICE_ROLE_KEY env var".to_string(),
            ));
        }
        let bucket = std::env::var("SUPABASE_STORAGE_BUCKET")
            .map(|b| b.trim().to_string())
            .ok()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| defaults::STORAGE_BUCKET.to_string());

        Ok(Self::new(base_url, service_key).with_bucket(bucket))
    }
}

/// HTTP implementation of [`DocumentStore`].
pub struct SupabaseDocumentStore {
    client: Client,
    config: StorageConfig,
}

impl SupabaseDocumentStore {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "clients",
            component = "storage",
            base_url = %config.base_url,
            bucket = %config.bucket,
            "Initializing object storage client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(StorageConfig::from_env()?)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn read_body(resp: Response, what: &str) -> Result<Vec<u8>> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(300).collect();
            return Err(Error::Storage(format!(
                "Download of {} failed: {} {}",
                what,
                status.as_u16(),
                excerpt
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("Reading {} failed: {}", what, e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DocumentStore for SupabaseDocumentStore {
    async fn fetch(&self, source: &DocumentSource) -> Result<Vec<u8>> {
        let (req, what) = match source {
            DocumentSource::Storage { path } => {
                if path.trim().is_empty() {
                    return Err(Error::Storage("Document missing storage_path".to_string()));
                }
                let req = self
                    .client
                    .get(self.object_url(path))
                    .bearer_auth(&self.config.service_key)
                    .header("apikey", &self.config.service_key);
                (req, format!("object {}", path))
            }
            DocumentSource::ExternalUrl { url } => {
                if url.trim().is_empty() {
                    return Err(Error::Storage("Document missing external_url".to_string()));
                }
                (self.client.get(url), format!("url {}", url))
            }
        };

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Download of {} failed: {}", what, e)))?;
        let bytes = Self::read_body(resp, &what).await?;
        debug!(source = %source.describe(), bytes = bytes.len(), "Downloaded document");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let store =
            SupabaseDocumentStore::new(StorageConfig::new("https://abc.supabase.co/", "key"))
                .unwrap();
        assert_eq!(
            store.object_url("doc-1/report.pdf"),
            "https://abc.supabase.co/storage/v1/object/documents/doc-1/report.pdf"
        );
    }

    #[test]
    fn test_custom_bucket() {
        let config = StorageConfig::new("http://localhost", "key").with_bucket("briefs");
        let store = SupabaseDocumentStore::new(config).unwrap();
        assert!(store.object_url("a.md").contains("/object/briefs/a.md"));
    }

    #[tokio::test]
    async fn test_empty_locations_are_rejected() {
        let store =
            SupabaseDocumentStore::new(StorageConfig::new("http://localhost", "key")).unwrap();
        let result = store
            .fetch(&DocumentSource::Storage {
                path: String::new(),
            })
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));

        let result = store
            .fetch(&DocumentSource::ExternalUrl { url: " ".to_string() })
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
