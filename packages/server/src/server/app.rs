//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::{LiveLogHub, ProcessingScheduler, ServerDeps};
use crate::server::routes::{crawl, health_handler, live_log_handler};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub deps: ServerDeps,
    pub scheduler: Arc<ProcessingScheduler>,
    pub live_log: LiveLogHub,
    /// Absent when running on the in-memory store.
    pub db_pool: Option<PgPool>,
}

/// Build the Axum application router
pub fn build_app(app_state: AxumAppState) -> Router {
    // CORS configuration - the admin panel is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let api = Router::new()
        .route("/init", post(crawl::init_handler))
        .route("/jobs", get(crawl::list_active_jobs_handler))
        .route("/jobs/:job_id", get(crawl::job_status_handler))
        .route("/jobs/:job_id/process", post(crawl::process_batch_handler))
        .route("/jobs/:job_id/pause", post(crawl::pause_handler))
        .route("/jobs/:job_id/resume", post(crawl::resume_handler))
        .route("/jobs/:job_id/auto-mode", post(crawl::toggle_auto_mode_handler))
        .route("/works/:work_id/gaps/scan", post(crawl::scan_gaps_handler))
        .route("/works/:work_id/gaps/fix", post(crawl::fix_range_handler))
        .route(
            "/works/:work_id/units/:ordinal/retry",
            post(crawl::retry_unit_handler),
        )
        .route("/keys", get(crawl::key_status_handler))
        .route("/keys/reload", post(crawl::reload_keys_handler))
        .route("/scheduler/wake", post(crawl::wake_handler))
        .route("/telegram/test", post(crawl::test_telegram_handler))
        .route("/logs", get(live_log_handler));

    Router::new()
        .nest("/api/crawl", api)
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
