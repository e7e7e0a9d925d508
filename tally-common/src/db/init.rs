//! Database initialization
//!
//! Creates the database on first run and brings the schema up idempotently;
//! both services call this at startup and may race without harm.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Current schema version, stamped into `schema_version` after init
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc creates the database file if it doesn't exist
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Referential integrity between ingestion_errors and ingestion_jobs
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while one job's staging transaction writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema_version_table(&pool).await?;
    create_items_table(&pool).await?;
    create_ingestion_jobs_table(&pool).await?;
    create_ingestion_errors_table(&pool).await?;

    stamp_schema_version(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn stamp_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)",
    )
    .bind(CURRENT_SCHEMA_VERSION)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Canonical item store; one row per `(item_type, business_key)`
async fn create_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            guid TEXT PRIMARY KEY,
            item_type TEXT NOT NULL,
            business_key TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            custom_properties TEXT NOT NULL DEFAULT '{}',
            embedding TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (item_type, business_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_scope ON items (scope)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ingestion_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            guid TEXT PRIMARY KEY,
            report_type TEXT NOT NULL,
            source_filename TEXT NOT NULL,
            source_uri TEXT NOT NULL,
            submitted_by TEXT,
            status TEXT NOT NULL DEFAULT 'UPLOADED',
            error_details TEXT,
            total_rows INTEGER NOT NULL DEFAULT 0,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            initial_error_count INTEGER NOT NULL DEFAULT 0,
            resolved_rows_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_created_at ON ingestion_jobs (created_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ingestion_errors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_errors (
            guid TEXT PRIMARY KEY,
            job_guid TEXT NOT NULL REFERENCES ingestion_jobs (guid) ON DELETE CASCADE,
            original_row TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'new',
            corrected_data TEXT,
            resolved_by TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_errors_job ON ingestion_errors (job_guid)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
