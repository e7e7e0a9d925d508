//! Ingestion job records and the monotonic status state machine
//!
//! `UPLOADED → PROCESSING → {FAILED | COMPLETE | COMPLETE_WITH_ISSUES}`.
//! All writes guard on the expected current status so a terminal job is
//! never reopened, even under concurrent updates.

use chrono::Utc;
use sqlx::SqlitePool;
use tally_common::db::{IngestionJob, JobStatus};
use tally_common::{Error, Result};
use tracing::info;
use uuid::Uuid;

/// Parameters for a newly submitted job
pub struct NewJob {
    pub report_type: String,
    pub source_filename: String,
    pub source_uri: String,
    pub submitted_by: Option<String>,
}

/// Create the job record in `UPLOADED` state and return it
pub async fn create_job(pool: &SqlitePool, new: NewJob) -> Result<IngestionJob> {
    let guid = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO ingestion_jobs
            (guid, report_type, source_filename, source_uri, submitted_by,
             status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&guid)
    .bind(&new.report_type)
    .bind(&new.source_filename)
    .bind(&new.source_uri)
    .bind(&new.submitted_by)
    .bind(JobStatus::Uploaded)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    info!(job_id = %guid, report_type = %new.report_type, "Ingestion job created");
    fetch_job(pool, &guid).await
}

pub async fn fetch_job(pool: &SqlitePool, guid: &str) -> Result<IngestionJob> {
    sqlx::query_as::<_, IngestionJob>("SELECT * FROM ingestion_jobs WHERE guid = ?")
        .bind(guid)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ingestion job {}", guid)))
}

/// Move a job to a non-terminal `next` status.
///
/// Returns an error when the transition is not allowed or the row changed
/// under us; callers treat that as "do not touch this job again".
pub async fn transition(pool: &SqlitePool, guid: &str, next: JobStatus) -> Result<()> {
    let current = fetch_job(pool, guid).await?.status;
    if !current.can_transition_to(next) {
        return Err(Error::InvalidInput(format!(
            "job {} cannot move from {} to {}",
            guid, current, next
        )));
    }

    let result = sqlx::query(
        "UPDATE ingestion_jobs SET status = ?, updated_at = ? WHERE guid = ? AND status = ?",
    )
    .bind(next)
    .bind(Utc::now())
    .bind(guid)
    .bind(current)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Internal(format!(
            "job {} status changed concurrently",
            guid
        )));
    }

    info!(job_id = %guid, status = %next, "Job status updated");
    Ok(())
}

/// Row counters recorded at terminal transition
#[derive(Debug, Clone, Copy, Default)]
pub struct JobCounters {
    pub total_rows: i64,
    pub processed_rows: i64,
    pub initial_error_count: i64,
}

/// Move a job to a terminal status, recording counters, `completed_at`,
/// and a free-text summary or failure detail.
pub async fn finalize(
    pool: &SqlitePool,
    guid: &str,
    status: JobStatus,
    details: Option<String>,
    counters: JobCounters,
) -> Result<()> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "finalize requires a terminal status, got {}",
            status
        )));
    }

    let current = fetch_job(pool, guid).await?.status;
    if !current.can_transition_to(status) {
        return Err(Error::InvalidInput(format!(
            "job {} cannot move from {} to {}",
            guid, current, status
        )));
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE ingestion_jobs
        SET status = ?, error_details = ?, total_rows = ?, processed_rows = ?,
            initial_error_count = ?, updated_at = ?, completed_at = ?
        WHERE guid = ? AND status = ?
        "#,
    )
    .bind(status)
    .bind(&details)
    .bind(counters.total_rows)
    .bind(counters.processed_rows)
    .bind(counters.initial_error_count)
    .bind(now)
    .bind(now)
    .bind(guid)
    .bind(current)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Internal(format!(
            "job {} status changed concurrently",
            guid
        )));
    }

    info!(
        job_id = %guid,
        status = %status,
        total_rows = counters.total_rows,
        processed_rows = counters.processed_rows,
        initial_error_count = counters.initial_error_count,
        "Job finalized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = tally_common::db::init_database(&dir.path().join("t.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn new_job() -> NewJob {
        NewJob {
            report_type: "claims".to_string(),
            source_filename: "claims.csv".to_string(),
            source_uri: "spool/abc.csv".to_string(),
            submitted_by: Some("u-1".to_string()),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let (_dir, pool) = setup().await;
        let job = create_job(&pool, new_job()).await.unwrap();

        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.report_type, "claims");
        assert_eq!(job.total_rows, 0);
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn lifecycle_transitions_and_finalize() {
        let (_dir, pool) = setup().await;
        let job = create_job(&pool, new_job()).await.unwrap();

        transition(&pool, &job.guid, JobStatus::Processing).await.unwrap();

        finalize(
            &pool,
            &job.guid,
            JobStatus::CompleteWithIssues,
            Some("2 rows sent for triage".to_string()),
            JobCounters { total_rows: 10, processed_rows: 8, initial_error_count: 2 },
        )
        .await
        .unwrap();

        let job = fetch_job(&pool, &job.guid).await.unwrap();
        assert_eq!(job.status, JobStatus::CompleteWithIssues);
        assert_eq!(job.total_rows, 10);
        assert_eq!(job.processed_rows, 8);
        assert_eq!(job.initial_error_count, 2);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_reopened() {
        let (_dir, pool) = setup().await;
        let job = create_job(&pool, new_job()).await.unwrap();

        transition(&pool, &job.guid, JobStatus::Processing).await.unwrap();
        finalize(&pool, &job.guid, JobStatus::Complete, None, JobCounters::default())
            .await
            .unwrap();

        assert!(transition(&pool, &job.guid, JobStatus::Processing).await.is_err());
        assert!(
            finalize(&pool, &job.guid, JobStatus::Failed, None, JobCounters::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn uploaded_jobs_cannot_skip_to_complete() {
        let (_dir, pool) = setup().await;
        let job = create_job(&pool, new_job()).await.unwrap();

        assert!(
            finalize(&pool, &job.guid, JobStatus::Complete, None, JobCounters::default())
                .await
                .is_err()
        );
        // But a job that never started can still fail terminally
        finalize(&pool, &job.guid, JobStatus::Failed, Some("no config".to_string()), JobCounters::default())
            .await
            .unwrap();
    }
}
