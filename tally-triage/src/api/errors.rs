//! Triage row listing and correction
//!
//! Corrections store the operator-supplied field values next to the
//! preserved original row and advance the row to `pending_revalidation`;
//! the parent job's resolved-row counter moves in the same transaction.
//! Corrected data is not replayed through transform/validation here; a
//! later replay step owns that.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use tally_common::db::{IngestionError, TriageStatus};

/// GET /api/ingestion-jobs/:job_id/errors
///
/// Unresolved and pending rows for one job, in chronological order.
pub async fn list_job_errors(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Vec<IngestionError>>> {
    let job_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ingestion_jobs WHERE guid = ?)")
            .bind(&job_id)
            .fetch_one(&state.db)
            .await?;
    if !job_exists {
        return Err(ApiError::NotFound(format!("ingestion job {}", job_id)));
    }

    let rows = sqlx::query_as::<_, IngestionError>(
        r#"
        SELECT * FROM ingestion_errors
        WHERE job_guid = ? AND status IN ('new', 'pending_revalidation')
        ORDER BY created_at, guid
        "#,
    )
    .bind(&job_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

/// PATCH request body for a correction
#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    /// Corrected values keyed by JSON field names, not raw headers
    pub corrected_data: serde_json::Value,
}

/// PATCH /api/ingestion-errors/:error_id
///
/// Stores the correction, moves the row to `pending_revalidation`, stamps
/// resolver identity and time, and increments the parent job's
/// `resolved_rows_count`, all in one transaction. Returns the updated
/// record.
pub async fn correct_ingestion_error(
    State(state): State<AppState>,
    Path(error_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CorrectionRequest>,
) -> ApiResult<Json<IngestionError>> {
    if !request.corrected_data.is_object() {
        return Err(ApiError::BadRequest(
            "corrected_data must be a JSON object".to_string(),
        ));
    }

    // Identity comes from the auth layer in front of this service
    let resolved_by = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("operator")
        .to_string();

    let existing = sqlx::query_as::<_, IngestionError>(
        "SELECT * FROM ingestion_errors WHERE guid = ?",
    )
    .bind(&error_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("ingestion error {}", error_id)))?;

    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE ingestion_errors
        SET corrected_data = ?, status = ?, resolved_by = ?, resolved_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(request.corrected_data.to_string())
    .bind(TriageStatus::PendingRevalidation)
    .bind(&resolved_by)
    .bind(now)
    .bind(&error_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE ingestion_jobs SET resolved_rows_count = resolved_rows_count + 1, updated_at = ? WHERE guid = ?",
    )
    .bind(now)
    .bind(&existing.job_guid)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let updated = sqlx::query_as::<_, IngestionError>(
        "SELECT * FROM ingestion_errors WHERE guid = ?",
    )
    .bind(&error_id)
    .fetch_one(&state.db)
    .await?;

    info!(
        error_id = %error_id,
        job_id = %existing.job_guid,
        resolved_by = %resolved_by,
        "Ingestion error corrected"
    );
    Ok(Json(updated))
}
