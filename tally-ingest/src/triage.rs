//! Triage row persistence
//!
//! Failed rows are written through this separate, non-transactional path:
//! they are not part of the staging transaction and survive a failed
//! batch, so an operator can always see why rows failed even when the
//! job itself did not commit.

use chrono::Utc;
use sqlx::SqlitePool;
use tally_common::db::TriageStatus;
use tracing::{error, info};
use uuid::Uuid;

/// A row that failed processing, with its original raw values preserved
#[derive(Debug, Clone)]
pub struct TriageRow {
    /// Header → raw string map, exactly as the row arrived
    pub original_record: serde_json::Value,
    pub reason: String,
}

/// Insert triage rows for a job, one at a time. Individual insert
/// failures are logged and skipped; the job carries on regardless.
/// Returns the number of rows actually written.
pub async fn record_triage_rows(pool: &SqlitePool, job_guid: &str, rows: &[TriageRow]) -> usize {
    if rows.is_empty() {
        return 0;
    }

    info!(job_id = %job_guid, count = rows.len(), "Recording triage rows");

    let mut written = 0;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO ingestion_errors
                (guid, job_guid, original_row, reason, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(job_guid)
        .bind(row.original_record.to_string())
        .bind(&row.reason)
        .bind(TriageStatus::New)
        .bind(Utc::now())
        .execute(pool)
        .await;

        match result {
            Ok(_) => written += 1,
            Err(e) => {
                error!(job_id = %job_guid, error = %e, "Failed to insert triage row");
            }
        }
    }

    written
}
