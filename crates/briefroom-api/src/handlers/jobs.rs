//! Ingestion job lifecycle: create, run, cancel, inspect.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use briefroom_core::defaults;
use briefroom_jobs::RunConfig;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub file_store_id: Uuid,
    /// Explicit documents; all attached documents when absent or empty.
    #[serde(default)]
    pub document_ids: Option<Vec<Uuid>>,
}

pub async fn create_ingestion_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = match body.document_ids {
        Some(ids) if !ids.is_empty() => state.scheduler.create_job(body.file_store_id, ids).await?,
        _ => state.scheduler.create_store_job(body.file_store_id).await?,
    };
    let job = state.reporter.job(job_id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Per-call overrides of the slice limits.
#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    pub time_budget_s: Option<u64>,
    /// `0` means unlimited.
    pub batch_size: Option<usize>,
}

impl RunBody {
    fn apply(&self, base: &RunConfig) -> Result<RunConfig, ApiError> {
        let mut config = base.clone();
        if let Some(secs) = self.time_budget_s {
            if secs == 0 {
                return Err(ApiError::BadRequest(
                    "time_budget_s must be at least 1".to_string(),
                ));
            }
            if secs > defaults::MAX_RUN_TIME_BUDGET_SECS {
                return Err(ApiError::BadRequest(format!(
                    "time_budget_s must be at most {}",
                    defaults::MAX_RUN_TIME_BUDGET_SECS
                )));
            }
            config = config.with_time_budget_secs(secs);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        Ok(config)
    }
}

/// Run one time-boxed slice. The body is optional.
pub async fn run_ingestion_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let overrides: RunBody = if body.iter().all(u8::is_ascii_whitespace) {
        RunBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid run body: {}", e)))?
    };
    let config = overrides.apply(state.scheduler.config())?;

    let job = state.scheduler.run_job_with(job_id, &config).await?;
    Ok(Json(job))
}

pub async fn cancel_ingestion_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.scheduler.cancel_job(job_id).await?;
    Ok(Json(job))
}

pub async fn get_ingestion_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.reporter.job(job_id).await?;
    Ok(Json(job))
}

pub async fn get_ingestion_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.reporter.status(job_id).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after_id: i64,
    pub limit: Option<i64>,
}

/// Event tail after `after_id`. `next_after_id` is the cursor for the next call.
pub async fn get_ingestion_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(defaults::EVENT_PAGE_LIMIT);
    let events = state
        .reporter
        .events_page(job_id, query.after_id, limit)
        .await?;
    let next_after_id = events.last().map(|e| e.id).unwrap_or(query.after_id.max(0));

    Ok(Json(serde_json::json!({
        "events": events,
        "next_after_id": next_after_id,
    })))
}
