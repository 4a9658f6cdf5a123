//! File store catalog.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use briefroom_core::{
    CreateFileStoreRequest, DocumentSource, Error, FileStore, Result, StoreCatalog,
    StoredDocument,
};

/// SQLSTATE for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Build a document source from the `documents` row columns.
///
/// Returns `None` when the row does not carry the location its source type needs.
pub(crate) fn source_from_columns(
    source_type: &str,
    storage_path: Option<String>,
    external_url: Option<String>,
) -> Option<DocumentSource> {
    match source_type {
        "storage" => storage_path
            .filter(|p| !p.is_empty())
            .map(|path| DocumentSource::Storage { path }),
        "external_url" => external_url
            .filter(|u| !u.is_empty())
            .map(|url| DocumentSource::ExternalUrl { url }),
        _ => None,
    }
}

/// Parse a `documents` row. Rows without a usable location are skipped.
pub(crate) fn parse_document_row(row: PgRow) -> Option<StoredDocument> {
    let source_type: String = row.get("source_type");
    let source = source_from_columns(
        &source_type,
        row.get("storage_path"),
        row.get("external_url"),
    )?;
    Some(StoredDocument {
        id: row.get("id"),
        title: row.get("title"),
        source,
        mime_type: row.get("mime_type"),
        original_filename: row.get("original_filename"),
    })
}

/// PostgreSQL implementation of [`StoreCatalog`].
#[derive(Clone)]
pub struct PgStoreCatalog {
    pool: Pool<Postgres>,
}

impl PgStoreCatalog {
    /// Create a new catalog over the given pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_store_row(row: PgRow) -> FileStore {
        FileStore {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            search_store_name: row.get("gemini_store_name"),
            chunking_config: row.get("chunking_config"),
            created_at: row.get("created_at"),
        }
    }

    /// Insert a document row. Documents are normally written by the upload
    /// path of the admin UI; this exists for seeding and tests.
    pub async fn register_document(&self, doc: &StoredDocument) -> Result<()> {
        let (source_type, storage_path, external_url) = match &doc.source {
            DocumentSource::Storage { path } => ("storage", Some(path.as_str()), None),
            DocumentSource::ExternalUrl { url } => ("external_url", None, Some(url.as_str())),
        };

        sqlx::query(
            "INSERT INTO documents (id, source_type, mime_type, original_filename, title,
                                    storage_path, external_url)
             VALUES ($1, $2::document_source_type, $3, $4, $5, $6, $7)",
        )
        .bind(doc.id)
        .bind(source_type)
        .bind(&doc.mime_type)
        .bind(&doc.original_filename)
        .bind(&doc.title)
        .bind(storage_path)
        .bind(external_url)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl StoreCatalog for PgStoreCatalog {
    async fn get_store(&self, store_id: Uuid) -> Result<Option<FileStore>> {
        let row = sqlx::query(
            "SELECT id, name, description, gemini_store_name, chunking_config, created_at
             FROM file_stores WHERE id = $1",
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_store_row))
    }

    async fn store_document_ids(&self, store_id: Uuid) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT document_id FROM file_store_documents
             WHERE file_store_id = $1
             ORDER BY added_at ASC, document_id ASC",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn create_store(
        &self,
        request: CreateFileStoreRequest,
        search_store_name: &str,
    ) -> Result<FileStore> {
        if request.name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".to_string()));
        }

        let row = sqlx::query(
            "INSERT INTO file_stores (id, name, description, gemini_store_name, chunking_config)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, name, description, gemini_store_name, chunking_config, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(search_store_name)
        .bind(&request.chunking_config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let unique = e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code == UNIQUE_VIOLATION)
                .unwrap_or(false);
            if unique {
                Error::Conflict(format!("A file store named {} already exists", request.name))
            } else {
                Error::Database(e)
            }
        })?;

        let store = Self::parse_store_row(row);
        info!(
            subsystem = "database",
            component = "catalog",
            op = "create_store",
            store_id = %store.id,
            search_store = %store.search_store_name,
            "Registered file store"
        );
        Ok(store)
    }

    async fn attach_documents(&self, store_id: Uuid, document_ids: &[Uuid]) -> Result<()> {
        if self.get_store(store_id).await?.is_none() {
            return Err(Error::NotFound(format!("File store {}", store_id)));
        }

        let known: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM documents WHERE id = ANY($1)")
                .bind(document_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        let unknown: Vec<String> = document_ids
            .iter()
            .filter(|id| !known.contains(id))
            .map(|id| id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Unknown documents: {}",
                unknown.join(", ")
            )));
        }

        // One row per call keeps added_at ordering equal to request order.
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for document_id in document_ids {
            sqlx::query(
                "INSERT INTO file_store_documents (file_store_id, document_id, added_at)
                 VALUES ($1, $2, clock_timestamp())
                 ON CONFLICT (file_store_id, document_id) DO NOTHING",
            )
            .bind(store_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            %store_id,
            count = document_ids.len(),
            "Attached documents to file store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_columns_storage() {
        let source = source_from_columns("storage", Some("abc/report.pdf".to_string()), None);
        assert_eq!(
            source,
            Some(DocumentSource::Storage {
                path: "abc/report.pdf".to_string()
            })
        );
    }

    #[test]
    fn test_source_from_columns_external() {
        let source = source_from_columns(
            "external_url",
            None,
            Some("https://example.com/a.pdf".to_string()),
        );
        assert!(matches!(source, Some(DocumentSource::ExternalUrl { .. })));
    }

    #[test]
    fn test_source_from_columns_missing_location() {
        assert_eq!(source_from_columns("storage", None, None), None);
        assert_eq!(source_from_columns("storage", Some(String::new()), None), None);
        assert_eq!(
            source_from_columns("external_url", Some("x".to_string()), None),
            None
        );
        assert_eq!(source_from_columns("ftp", Some("x".to_string()), None), None);
    }
}
