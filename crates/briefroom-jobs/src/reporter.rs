//! Read-only view of job status and the event log.

use std::sync::Arc;

use uuid::Uuid;

use briefroom_core::{defaults, IngestionJob, JobEvent, JobLedger, JobStatusView, Result};

/// Status and event queries. Never writes.
#[derive(Clone)]
pub struct StatusReporter {
    ledger: Arc<dyn JobLedger>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<dyn JobLedger>) -> Self {
        Self { ledger }
    }

    /// `{status, progress, total, error}` of a job.
    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusView> {
        Ok(self.ledger.get(job_id).await?.status_view())
    }

    /// The full job row.
    pub async fn job(&self, job_id: Uuid) -> Result<IngestionJob> {
        self.ledger.get(job_id).await
    }

    /// Events after the cursor, at most the default page size.
    pub async fn events(&self, job_id: Uuid, after_id: i64) -> Result<Vec<JobEvent>> {
        self.events_page(job_id, after_id, defaults::EVENT_PAGE_LIMIT)
            .await
    }

    /// Events after the cursor. `limit` is clamped to `1..=EVENT_PAGE_LIMIT_MAX`.
    pub async fn events_page(
        &self,
        job_id: Uuid,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<JobEvent>> {
        // Unknown jobs are an error, not an empty tail.
        self.ledger.get(job_id).await?;
        let limit = limit.clamp(1, defaults::EVENT_PAGE_LIMIT_MAX);
        self.ledger
            .list_events(job_id, after_id.max(0), limit)
            .await
    }
}
