//! # briefroom-api
//!
//! Admin HTTP surface for the ingestion job lifecycle.
//!
//! Every `/v1/admin` route requires `Authorization: Bearer <ADMIN_TOKEN>`.
//! `/health` is open.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use state::AppState;

use handlers::{jobs, stores};

/// Build the router with all routes. Tracing and CORS layers are added by the
/// binary.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/v1/admin/file-stores", post(stores::create_file_store))
        .route(
            "/v1/admin/file-stores/:id/documents",
            post(stores::attach_documents),
        )
        .route("/v1/admin/ingestion-jobs", post(jobs::create_ingestion_job))
        .route("/v1/admin/ingestion-jobs/:id", get(jobs::get_ingestion_job))
        .route(
            "/v1/admin/ingestion-jobs/:id/run",
            post(jobs::run_ingestion_job),
        )
        .route(
            "/v1/admin/ingestion-jobs/:id/cancel",
            post(jobs::cancel_ingestion_job),
        )
        .route(
            "/v1/admin/ingestion-jobs/:id/status",
            get(jobs::get_ingestion_job_status),
        )
        .route(
            "/v1/admin/ingestion-jobs/:id/events",
            get(jobs::get_ingestion_job_events),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(admin)
        .with_state(state)
}
