//! tally-triage library - operator surface for the triage queue
//!
//! Read side: job and error listings. Write side: one operation, the
//! correction PATCH.

use axum::Router;
use sqlx::SqlitePool;

pub mod api;
pub mod error;
pub mod pagination;

pub use error::{ApiError, ApiResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, patch};
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/ingestion-jobs", get(api::list_ingestion_jobs))
        .route("/api/ingestion-jobs/:job_id", get(api::get_ingestion_job))
        .route(
            "/api/ingestion-jobs/:job_id/errors",
            get(api::list_job_errors),
        )
        .route(
            "/api/ingestion-errors/:error_id",
            patch(api::correct_ingestion_error),
        )
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
