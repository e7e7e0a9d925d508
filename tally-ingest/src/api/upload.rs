//! Report upload and job submission
//!
//! `POST /api/ingest/:report_type` receives the raw file body (the
//! object-storage transport in front of this service is not our concern),
//! spools it under the root folder, creates the job record, and spawns
//! the background processing task. The created job is returned
//! synchronously with 202 Accepted.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::jobs::{self, NewJob};
use crate::pipeline::runner;
use crate::AppState;
use tally_common::db::IngestionJob;

/// Query parameters for upload
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Original filename as uploaded by the user
    pub filename: Option<String>,
}

/// POST /api/ingest/:report_type
pub async fn upload_report(
    State(state): State<AppState>,
    Path(report_type): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IngestionJob>)> {
    if state.configs.get(&report_type).is_none() {
        return Err(ApiError::BadRequest(format!(
            "no ingestion configuration for report type '{}'",
            report_type
        )));
    }

    if body.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    // Identity comes from the auth layer in front of this service
    let submitted_by = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let filename = query
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "upload.csv".to_string());

    // Spool the stream before creating the job so a job record always
    // points at a readable file
    let spool_key = format!("{}-{}", Uuid::new_v4(), sanitize_filename(&filename));
    let spool_path = state.spool_dir.join(&spool_key);
    tokio::fs::write(&spool_path, &body).await?;

    let job = jobs::create_job(
        &state.db,
        NewJob {
            report_type: report_type.clone(),
            source_filename: filename,
            source_uri: spool_key,
            submitted_by,
        },
    )
    .await?;

    info!(
        job_id = %job.guid,
        report_type = %report_type,
        bytes = body.len(),
        "Upload accepted, queueing for processing"
    );

    let state_clone = state.clone();
    let job_guid = job.guid.clone();
    let source_uri = job.source_uri.clone();
    tokio::spawn(async move {
        runner::run_job(state_clone, job_guid, report_type, source_uri).await;
    });

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /api/ingestion-jobs/:job_id/cancel
///
/// Signals the job's cancellation token; the runner fails the job
/// terminally. Unknown or already-finished jobs report 404.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tokens = state.cancellation_tokens.read().await;
    match tokens.get(&job_id) {
        Some(token) => {
            token.cancel();
            info!(job_id = %job_id, "Job cancellation requested");
            Ok(Json(serde_json::json!({ "job_id": job_id, "cancelled": true })))
        }
        None => Err(ApiError::NotFound(format!("no running job {}", job_id))),
    }
}

/// Keep spool keys flat: path separators and parent markers are defanged
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect::<String>()
        .replace("..", "_")
}
