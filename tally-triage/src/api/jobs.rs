//! Ingestion job listing for the operator dashboard

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::pagination::{calculate_pagination, PAGE_SIZE};
use crate::AppState;
use tally_common::db::IngestionJob;

/// Query parameters for job listing
#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

/// Job listing response
#[derive(Debug, Serialize)]
pub struct JobsListResponse {
    pub total_jobs: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub jobs: Vec<IngestionJob>,
}

/// GET /api/ingestion-jobs
///
/// Paginated job listing, newest first.
pub async fn list_ingestion_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<JobsListResponse>> {
    let total_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestion_jobs")
        .fetch_one(&state.db)
        .await?;

    let pagination = calculate_pagination(total_jobs, query.page);

    let jobs = sqlx::query_as::<_, IngestionJob>(
        "SELECT * FROM ingestion_jobs ORDER BY created_at DESC, guid LIMIT ? OFFSET ?",
    )
    .bind(PAGE_SIZE)
    .bind(pagination.offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(JobsListResponse {
        total_jobs,
        page: pagination.page,
        page_size: PAGE_SIZE,
        total_pages: pagination.total_pages,
        jobs,
    }))
}

/// GET /api/ingestion-jobs/:job_id
pub async fn get_ingestion_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<IngestionJob>> {
    let job = sqlx::query_as::<_, IngestionJob>("SELECT * FROM ingestion_jobs WHERE guid = ?")
        .bind(&job_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ingestion job {}", job_id)))?;

    Ok(Json(job))
}
