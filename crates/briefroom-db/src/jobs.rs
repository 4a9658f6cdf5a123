//! PostgreSQL job ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use briefroom_core::{
    CreateJobRequest, DocumentState, DocumentUpdate, Error, EventLevel, EventMessage,
    IngestionJob, JobEvent, JobLedger, JobStatus, JobType, ProgressUpdate, Result, RunLease,
    StoredDocument, TargetDocument,
};

use crate::catalog::{parse_document_row, source_from_columns};

const JOB_COLUMNS: &str = "id, job_type::text AS job_type, status::text AS status, file_store_id, \
     progress, total, error, payload, result, version, \
     (store_ready_at IS NOT NULL) AS store_ready, created_at, updated_at";

/// SQLSTATE for foreign key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL implementation of [`JobLedger`].
#[derive(Clone)]
pub struct PgJobLedger {
    pool: Pool<Postgres>,
}

impl PgJobLedger {
    /// Create a new ledger over the given pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: PgRow) -> Result<IngestionJob> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(IngestionJob {
            id: row.get("id"),
            job_type: JobType::parse(&job_type)
                .ok_or_else(|| Error::Internal(format!("Unknown job type: {}", job_type)))?,
            status: JobStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("Unknown job status: {}", status)))?,
            file_store_id: row.get("file_store_id"),
            progress: row.get("progress"),
            total: row.get("total"),
            error: row.get("error"),
            payload: row.get("payload"),
            result: row.get("result"),
            version: row.get("version"),
            store_ready: row.get("store_ready"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_event_row(row: PgRow) -> Result<JobEvent> {
        let level: String = row.get("level");
        let message: String = row.get("message");
        Ok(JobEvent {
            id: row.get("id"),
            job_id: row.get("job_id"),
            ts: row.get("ts"),
            level: EventLevel::parse(&level)
                .ok_or_else(|| Error::Internal(format!("Unknown event level: {}", level)))?,
            message: EventMessage::parse(&message)
                .ok_or_else(|| Error::Internal(format!("Unknown event message: {}", message)))?,
            data: row.get("data"),
        })
    }

    fn parse_target_row(row: PgRow) -> Result<TargetDocument> {
        let state: String = row.get("state");
        let source_type: String = row.get("source_type");
        let document_id: Uuid = row.get("document_id");
        let source = source_from_columns(
            &source_type,
            row.get("storage_path"),
            row.get("external_url"),
        )
        .ok_or_else(|| unreadable_source(document_id, &source_type))?;
        let title: String = row.get("title");
        let original_filename: Option<String> = row.get("original_filename");
        let mime_type: Option<String> = row.get("mime_type");
        let doc = StoredDocument {
            id: document_id,
            title,
            source,
            mime_type,
            original_filename,
        };

        Ok(TargetDocument {
            job_id: row.get("job_id"),
            document_id: doc.id,
            position: row.get("position"),
            state: DocumentState::parse(&state)
                .ok_or_else(|| Error::Internal(format!("Unknown document state: {}", state)))?,
            display_name: doc.display_name(),
            mime_type: doc.effective_mime_type(),
            source: doc.source,
            file_name: row.get("file_name"),
            operation: row.get("operation_name"),
            poll_attempts: row.get("poll_attempts"),
            error: row.get("error"),
        })
    }

    /// Why an update matched no row: missing job, terminal job, or stale version.
    async fn explain_rejected_update(&self, job_id: Uuid, update: &ProgressUpdate) -> Error {
        match self.get(job_id).await {
            Ok(current)
                if !current
                    .status
                    .can_transition_to(update.status.unwrap_or(current.status)) =>
            {
                rejected_transition(job_id, current.status, update.status)
            }
            Ok(current) => Error::Conflict(format!(
                "Job {} was modified concurrently (expected version {:?}, found {})",
                job_id, update.expected_version, current.version
            )),
            Err(e) => e,
        }
    }
}

/// Error for a document row whose source columns do not match its type.
pub(crate) fn unreadable_source(document_id: Uuid, source_type: &str) -> Error {
    Error::Internal(format!(
        "Document {} has an unreadable {} source",
        document_id, source_type
    ))
}

/// Conflict for an update that would break the status machine.
pub(crate) fn rejected_transition(
    job_id: Uuid,
    current: JobStatus,
    next: Option<JobStatus>,
) -> Error {
    if current.is_terminal() {
        return Error::Conflict(format!("Job {} is already {}", job_id, current.as_str()));
    }
    Error::Conflict(format!(
        "Job {} cannot move from {} to {}",
        job_id,
        current.as_str(),
        next.unwrap_or(current).as_str()
    ))
}

/// Map an advisory-lock key from a job id.
pub(crate) fn advisory_key(job_id: Uuid) -> i64 {
    let (hi, lo) = job_id.as_u64_pair();
    (hi ^ lo) as i64
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == FOREIGN_KEY_VIOLATION)
        .unwrap_or(false)
}

/// Run lease backed by a transaction-scoped advisory lock.
///
/// Committing releases the lock; dropping the transaction rolls it back, which
/// releases it as well.
pub struct PgRunLease {
    job_id: Uuid,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RunLease for PgRunLease {
    fn job_id(&self) -> Uuid {
        self.job_id
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let PgRunLease { job_id, tx } = *self;
        tx.commit().await.map_err(Error::Database)?;
        debug!(%job_id, "Released run lock");
        Ok(())
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
    async fn create(&self, request: CreateJobRequest) -> Result<Uuid> {
        let document_ids = request.unique_document_ids();
        if document_ids.is_empty() {
            return Err(Error::InvalidInput(
                "document_ids must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let store_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM file_stores WHERE id = $1)")
                .bind(request.file_store_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;
        if !store_exists {
            return Err(Error::InvalidInput(format!(
                "Unknown file store: {}",
                request.file_store_id
            )));
        }

        let rows = sqlx::query(
            "SELECT id, source_type::text AS source_type, mime_type, original_filename, title,
                    storage_path, external_url
             FROM documents WHERE id = ANY($1)",
        )
        .bind(&document_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let found: HashMap<Uuid, _> = rows
            .into_iter()
            .filter_map(parse_document_row)
            .map(|doc| (doc.id, doc))
            .collect();
        let missing: Vec<String> = document_ids
            .iter()
            .filter(|id| !found.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Unknown or unreadable documents: {}",
                missing.join(", ")
            )));
        }

        let job_id = Uuid::now_v7();
        let total = document_ids.len() as i32;

        sqlx::query(
            "INSERT INTO ingestion_jobs (id, job_type, status, file_store_id, total, payload)
             VALUES ($1, $2::job_type, 'queued'::job_status, $3, $4, $5)",
        )
        .bind(job_id)
        .bind(request.job_type.as_str())
        .bind(request.file_store_id)
        .bind(total)
        .bind(&request.payload)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let positions: Vec<i32> = (0..total).collect();
        sqlx::query(
            "INSERT INTO ingestion_job_documents (job_id, document_id, position)
             SELECT $1, t.document_id, t.position
             FROM UNNEST($2::uuid[], $3::int[]) AS t(document_id, position)",
        )
        .bind(job_id)
        .bind(&document_ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "ledger",
            op = "create",
            %job_id,
            total,
            "Created ingestion job"
        );
        Ok(job_id)
    }

    async fn get(&self, job_id: Uuid) -> Result<IngestionJob> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(Error::JobNotFound(job_id)),
        }
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

        // Rows whose status cannot move to the requested one never match.
        let accepting: Vec<&str> = JobStatus::accepting(update.status)
            .iter()
            .map(|s| s.as_str())
            .collect();
        let row = sqlx::query(&format!(
            "UPDATE ingestion_jobs
             SET progress = LEAST(progress + $2, total),
                 status = COALESCE($3::job_status, status),
                 error = COALESCE($4, error),
                 result = COALESCE($5, result),
                 version = version + 1
             WHERE id = $1
               AND status::text = ANY($7::text[])
               AND ($6::bigint IS NULL OR version = $6)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(update.delta)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.error)
        .bind(&update.result)
        .bind(update.expected_version)
        .bind(&accepting)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.explain_rejected_update(job_id, &update).await),
        }
    }

    async fn mark_store_ready(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET store_ready_at = COALESCE(store_ready_at, now()) WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        level: EventLevel,
        message: EventMessage,
        data: Option<JsonValue>,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO ingestion_job_events (job_id, level, message, data)
             VALUES ($1, $2::job_event_level, $3, $4)
             RETURNING id",
        )
        .bind(job_id)
        .bind(level.as_str())
        .bind(message.as_str())
        .bind(&data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::JobNotFound(job_id)
            } else {
                Error::Database(e)
            }
        })
    }

    async fn list_events(&self, job_id: Uuid, after_id: i64, limit: i64) -> Result<Vec<JobEvent>> {
        let rows = sqlx::query(
            "SELECT id, job_id, ts, level::text AS level, message, data
             FROM ingestion_job_events
             WHERE job_id = $1 AND id > $2
             ORDER BY id ASC
             LIMIT $3",
        )
        .bind(job_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_event_row).collect()
    }

    async fn documents(&self, job_id: Uuid) -> Result<Vec<TargetDocument>> {
        let rows = sqlx::query(
            "SELECT jd.job_id, jd.document_id, jd.position, jd.state::text AS state,
                    jd.file_name, jd.operation_name, jd.poll_attempts, jd.error,
                    d.source_type::text AS source_type, d.storage_path, d.external_url,
                    d.title, d.original_filename, d.mime_type
             FROM ingestion_job_documents jd
             JOIN documents d ON d.id = jd.document_id
             WHERE jd.job_id = $1
             ORDER BY jd.position ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_target_row).collect()
    }

    async fn update_document(
        &self,
        job_id: Uuid,
        document_id: Uuid,
        update: DocumentUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ingestion_job_documents
             SET state = $3::job_document_state,
                 file_name = COALESCE($4, file_name),
                 operation_name = COALESCE($5, operation_name),
                 poll_attempts = COALESCE($6, poll_attempts),
                 error = COALESCE($7, error),
                 updated_at = now()
             WHERE job_id = $1 AND document_id = $2",
        )
        .bind(job_id)
        .bind(document_id)
        .bind(update.state.as_str())
        .bind(&update.file_name)
        .bind(&update.operation)
        .bind(update.poll_attempts)
        .bind(&update.error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Document {} in job {}",
                document_id, job_id
            )));
        }
        Ok(())
    }

    async fn try_lock(&self, job_id: Uuid) -> Result<Option<Box<dyn RunLease>>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(advisory_key(job_id))
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;

        if !locked {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, %job_id, "Failed to roll back lock attempt");
            }
            return Ok(None);
        }

        debug!(%job_id, "Acquired run lock");
        Ok(Some(Box::new(PgRunLease { job_id, tx })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_key_is_stable() {
        let id = Uuid::parse_str("0190f1a2-3b4c-7d5e-8f60-718293a4b5c6").unwrap();
        assert_eq!(advisory_key(id), advisory_key(id));
    }

    #[test]
    fn test_advisory_key_differs_between_jobs() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert_ne!(advisory_key(a), advisory_key(b));
    }

    #[test]
    fn test_job_columns_expose_store_ready_flag() {
        assert!(JOB_COLUMNS.contains("AS store_ready"));
        assert!(JOB_COLUMNS.contains("status::text AS status"));
    }

    #[test]
    fn test_target_without_source_is_internal_error() {
        let document_id = Uuid::nil();
        let err = source_from_columns("storage", None, Some("https://example.com/a.pdf".into()))
            .ok_or_else(|| unreadable_source(document_id, "storage"))
            .unwrap_err();
        assert!(matches!(&err, Error::Internal(msg) if msg.contains("unreadable storage source")));
    }

    #[test]
    fn test_rejected_transition_names_the_status() {
        let job_id = Uuid::nil();
        let terminal = rejected_transition(job_id, JobStatus::Failed, None);
        assert!(matches!(&terminal, Error::Conflict(msg) if msg.ends_with("is already failed")));

        let backwards = rejected_transition(job_id, JobStatus::Running, Some(JobStatus::Queued));
        assert!(
            matches!(&backwards, Error::Conflict(msg) if msg.ends_with("from running to queued"))
        );
    }
}
