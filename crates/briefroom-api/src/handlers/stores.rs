//! File store administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use briefroom_core::CreateFileStoreRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// Provision the external search store, then register it in the catalog.
pub async fn create_file_store(
    State(state): State<AppState>,
    Json(req): Json<CreateFileStoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let search_store_name = state.search.create_store(&name).await?;
    let store = state
        .catalog
        .create_store(req, &search_store_name)
        .await?;

    info!(
        subsystem = "api",
        op = "create_file_store",
        store_id = %store.id,
        gemini_store_name = %store.search_store_name,
        "Created file store"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": store.id,
            "name": store.name,
            "gemini_store_name": store.search_store_name,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AttachDocumentsBody {
    #[serde(default)]
    pub document_ids: Vec<Uuid>,
    #[serde(default)]
    pub create_ingestion_job: bool,
}

/// Attach documents to a store, optionally queueing a job over all of its
/// attached documents.
pub async fn attach_documents(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(body): Json<AttachDocumentsBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.document_ids.is_empty() {
        return Err(ApiError::BadRequest("Missing document_ids".to_string()));
    }

    state
        .catalog
        .attach_documents(store_id, &body.document_ids)
        .await?;

    let job_id = if body.create_ingestion_job {
        Some(state.scheduler.create_store_job(store_id).await?)
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "ok": true,
        "job_id": job_id,
    })))
}
