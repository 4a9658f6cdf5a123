//! briefroom-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use briefroom_api::{router, AppState};
use briefroom_clients::{GeminiFileSearchClient, SupabaseDocumentStore};
use briefroom_core::defaults;
use briefroom_db::{log_pool_metrics, Database, PoolConfig};
use briefroom_jobs::RunConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - env filter (default: "briefroom=info,tower_http=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "briefroom_api=info,briefroom_jobs=info,briefroom_db=info,briefroom_clients=info,tower_http=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer();
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let admin_token = std::env::var("ADMIN_TOKEN").unwrap_or_default();
    if admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN is not set; admin routes will answer 500");
    }
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(defaults::SERVER_PORT);

    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    db.migrate().await?;
    log_pool_metrics(db.pool());
    info!("Database ready");

    let search = GeminiFileSearchClient::from_env()?;
    let storage = SupabaseDocumentStore::from_env()?;
    let run_config = RunConfig::from_env();
    info!(
        time_budget_secs = run_config.time_budget.as_secs(),
        batch_size = ?run_config.max_documents_per_run,
        poll_interval_ms = run_config.poll_interval.as_millis() as u64,
        "Run configuration loaded"
    );

    let state = AppState::new(
        Arc::new(db.jobs.clone()),
        Arc::new(db.catalog.clone()),
        Arc::new(storage),
        Arc::new(search),
        run_config,
        admin_token,
    );

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]),
        );

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
