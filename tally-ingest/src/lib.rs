//! tally-ingest library interface
//!
//! Exposes the pipeline and API for integration testing.

pub mod api;
pub mod config_loader;
pub mod embed;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod registry;
pub mod report_config;
pub mod staging;
pub mod triage;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config_loader::ConfigLoader;
use crate::embed::Embedder;
use crate::registry::ValidationRegistry;
use tally_common::config::TomlConfig;

/// Application state shared across handlers and job runners
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Service settings
    pub settings: Arc<TomlConfig>,
    /// Directory where uploaded files are spooled
    pub spool_dir: PathBuf,
    /// Immutable report-type → compiled config map
    pub configs: Arc<ConfigLoader>,
    /// In-process validation checks, built once at startup
    pub validations: Arc<ValidationRegistry>,
    /// Injected embedding function; absent disables embedding
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Cancellation tokens for running jobs
    pub cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        settings: TomlConfig,
        spool_dir: PathBuf,
        configs: ConfigLoader,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            db,
            settings: Arc::new(settings),
            spool_dir,
            configs: Arc::new(configs),
            validations: Arc::new(ValidationRegistry::builtin()),
            embedder,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::post;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/ingest/:report_type", post(api::upload_report))
        .route("/api/ingestion-jobs/:job_id/cancel", post(api::cancel_job))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
