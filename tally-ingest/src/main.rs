//! tally-ingest - Report ingestion service
//!
//! Receives delimited report uploads, runs the config-driven
//! transformation/validation pipeline, and loads canonical items in
//! atomic per-job batches. Failed rows land in the triage queue served
//! by tally-triage.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use tally_common::config::{self, TomlConfig};
use tally_ingest::config_loader::ConfigLoader;
use tally_ingest::embed::{Embedder, HttpEmbedder};
use tally_ingest::registry::TransformRegistry;
use tally_ingest::AppState;

#[derive(Parser)]
#[command(name = "tally-ingest", version)]
struct Args {
    /// Root data folder (overrides TALLY_ROOT and the config file)
    #[arg(long)]
    root_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting tally-ingest (Report Ingestion) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref());
    config::ensure_root_folder(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    let settings = TomlConfig::load(&root_folder)?;

    let spool_dir = settings.spool_dir(&root_folder);
    std::fs::create_dir_all(&spool_dir)?;

    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = tally_common::db::init_database(&db_path).await?;

    // Registries are built once; configs compile against them here, so a
    // bad config stops the service before it serves anything
    let transforms = TransformRegistry::builtin();
    let config_dir = settings.report_config_dir(&root_folder);
    let configs = ConfigLoader::load(&config_dir, &transforms)?;
    info!(
        "Loaded {} ingestion config(s): {:?}",
        configs.len(),
        configs.report_types()
    );

    let embedder: Option<Arc<dyn Embedder>> = match &settings.embedding {
        Some(embedding_config) => {
            info!("Embedding endpoint: {}", embedding_config.url);
            Some(Arc::new(HttpEmbedder::new(embedding_config)?))
        }
        None => {
            info!("No embedding endpoint configured; items will carry no vectors");
            None
        }
    };

    let bind = settings.ingest_bind.clone();
    let state = AppState::new(pool, settings, spool_dir, configs, embedder);
    let app = tally_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("tally-ingest listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
