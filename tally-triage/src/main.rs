//! tally-triage - Triage queue operator service
//!
//! Serves the operator-facing triage API: job listings, per-job error
//! listings, and the correction endpoint that lets a human repair a
//! failed row.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tally_common::config::{self, TomlConfig};
use tally_triage::AppState;

#[derive(Parser)]
#[command(name = "tally-triage", version)]
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
        "Starting tally-triage (Triage Queue) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref());
    config::ensure_root_folder(&root_folder)?;

    let settings = TomlConfig::load(&root_folder)?;

    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = tally_common::db::init_database(&db_path).await?;

    let state = AppState::new(pool);
    let app = tally_triage::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.triage_bind).await?;
    info!("tally-triage listening on http://{}", settings.triage_bind);
    info!("Health check: http://{}/health", settings.triage_bind);

    axum::serve(listener, app).await?;

    Ok(())
}
