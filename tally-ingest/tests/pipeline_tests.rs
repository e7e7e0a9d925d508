//! End-to-end pipeline tests
//!
//! Each test builds a self-contained root folder (database, report
//! configs, spool) and drives a job through the runner exactly as the
//! upload handler would.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use tally_common::config::TomlConfig;
use tally_common::db::{init_database, IngestionJob, JobStatus};
use tally_ingest::config_loader::ConfigLoader;
use tally_ingest::embed::Embedder;
use tally_ingest::jobs::{self, NewJob};
use tally_ingest::pipeline::runner;
use tally_ingest::registry::TransformRegistry;
use tally_ingest::AppState;

const ROSTER_CONFIG: &str = r#"
    report_type = "roster"
    item_type = "policyholder"
    scope_field = "status"
    business_key = ["id"]

    [[column_mappings]]
    csv_header = "id"
    json_field = "id"
    [column_mappings.validation]
    required = true

    [[column_mappings]]
    csv_header = "status"
    json_field = "status"
    [column_mappings.validation]
    enum = ["ACTIVE", "INACTIVE"]

    [[column_mappings]]
    csv_header = "email"
    json_field = "email"
"#;

struct Harness {
    _root: tempfile::TempDir,
    state: AppState,
}

async fn harness(configs: &[(&str, &str)], embedder: Option<Arc<dyn Embedder>>) -> Harness {
    let root = tempfile::tempdir().unwrap();

    let config_dir = root.path().join("report-configs");
    std::fs::create_dir_all(&config_dir).unwrap();
    for (name, content) in configs {
        std::fs::write(config_dir.join(name), content).unwrap();
    }

    let spool_dir = root.path().join("spool");
    std::fs::create_dir_all(&spool_dir).unwrap();

    let pool = init_database(&root.path().join("tally.db")).await.unwrap();

    let transforms = TransformRegistry::builtin();
    let loader = ConfigLoader::load(&config_dir, &transforms).unwrap();

    let state = AppState::new(pool, TomlConfig::default(), spool_dir, loader, embedder);
    Harness { _root: root, state }
}

/// Spool a file, create the job, and run it to a terminal status
async fn run_file(harness: &Harness, report_type: &str, csv: &str) -> IngestionJob {
    let spool_key = format!("{}.csv", Uuid::new_v4());
    std::fs::write(harness.state.spool_dir.join(&spool_key), csv).unwrap();

    let job = jobs::create_job(
        &harness.state.db,
        NewJob {
            report_type: report_type.to_string(),
            source_filename: "upload.csv".to_string(),
            source_uri: spool_key.clone(),
            submitted_by: Some("tester".to_string()),
        },
    )
    .await
    .unwrap();

    runner::run_job(
        harness.state.clone(),
        job.guid.clone(),
        report_type.to_string(),
        spool_key,
    )
    .await;

    jobs::fetch_job(&harness.state.db, &job.guid).await.unwrap()
}

async fn count(pool: &sqlx::SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

struct FixedEmbedder(usize);

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.25; self.0])
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }
}

#[tokio::test]
async fn end_to_end_roster_scenario() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    let csv = "id,status,email\n\
               1,ACTIVE,a@x.com\n\
               ,ACTIVE,b@x.com\n\
               2,PENDING,c@x.com\n\
               ,,\n";
    let job = run_file(&h, "roster", csv).await;

    assert_eq!(job.status, JobStatus::CompleteWithIssues);
    assert_eq!(job.total_rows, 4);
    assert_eq!(job.processed_rows, 1);
    assert_eq!(job.initial_error_count, 2);

    // total_rows == successful + triaged + blank
    let blank_rows = job.total_rows - job.processed_rows - job.initial_error_count;
    assert_eq!(blank_rows, 1);

    let items = count(&h.state.db, "SELECT COUNT(*) FROM items").await;
    assert_eq!(items, 1);

    let (business_key, scope): (String, String) =
        sqlx::query_as("SELECT business_key, scope FROM items")
            .fetch_one(&h.state.db)
            .await
            .unwrap();
    assert_eq!(business_key, "1");
    assert_eq!(scope, "ACTIVE");

    let reasons: Vec<(String,)> =
        sqlx::query_as("SELECT reason FROM ingestion_errors ORDER BY reason")
            .fetch_all(&h.state.db)
            .await
            .unwrap();
    assert_eq!(reasons.len(), 2);
    assert!(reasons.iter().any(|(r,)| r.contains("'id'")));
    assert!(reasons.iter().any(|(r,)| r.contains("'status'")));
}

#[tokio::test]
async fn clean_file_completes_without_issues() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    let job = run_file(&h, "roster", "id,status,email\n1,ACTIVE,a@x.com\n2,INACTIVE,b@x.com\n").await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.processed_rows, 2);
    assert_eq!(job.initial_error_count, 0);
    assert!(job.completed_at.is_some());
    let summary = job.error_details.unwrap();
    assert!(summary.contains("2 items"));
}

#[tokio::test]
async fn merge_excess_fields_repairs_unescaped_delimiters() {
    let config = r#"
        report_type = "claims"
        item_type = "claim"
        scope_field = "line"
        business_key = ["id"]

        [[column_mappings]]
        csv_header = "id"
        json_field = "id"
        [column_mappings.validation]
        required = true

        [[column_mappings]]
        csv_header = "description"
        json_field = "description"
        merge_excess_fields = true

        [[column_mappings]]
        csv_header = "line"
        json_field = "line"
    "#;
    let h = harness(&[("claims.toml", config)], None).await;

    // Row is headers+2 wide; the three fields after the merge column
    // rejoin into one
    let csv = "id,description,line\n\
               C-1,hit pole, then fence, then mailbox,auto\n";
    let job = run_file(&h, "claims", csv).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.processed_rows, 1);

    let (props,): (String,) = sqlx::query_as("SELECT custom_properties FROM items")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    let props: serde_json::Value = serde_json::from_str(&props).unwrap();
    assert_eq!(props["description"], "hit pole, then fence, then mailbox");
    assert_eq!(props["line"], "auto");
}

#[tokio::test]
async fn unrepairable_width_goes_to_triage_not_discard() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    // No merge column configured: the wide row is triaged, the short row too
    let csv = "id,status,email\n1,ACTIVE,a@x.com,extra\n2,ACTIVE\n";
    let job = run_file(&h, "roster", csv).await;

    assert_eq!(job.status, JobStatus::CompleteWithIssues);
    assert_eq!(job.initial_error_count, 2);
    assert_eq!(job.processed_rows, 0);

    let reasons: Vec<(String,)> = sqlx::query_as("SELECT reason FROM ingestion_errors")
        .fetch_all(&h.state.db)
        .await
        .unwrap();
    assert!(reasons.iter().all(|(r,)| r.contains("fields, but header has 3")));
}

#[tokio::test]
async fn row_missing_two_key_fields_triages_exactly_once() {
    let config = r#"
        report_type = "composite"
        item_type = "record"
        scope_field = "scope"
        business_key = ["a", "b", "c"]

        [[column_mappings]]
        csv_header = "scope"
        json_field = "scope"

        [[column_mappings]]
        csv_header = "a"
        json_field = "a"

        [[column_mappings]]
        csv_header = "b"
        json_field = "b"
        [[column_mappings.attempts]]
        transforms = ["to_integer"]

        [[column_mappings]]
        csv_header = "c"
        json_field = "c"
        [[column_mappings.attempts]]
        transforms = ["to_integer"]
    "#;
    let h = harness(&[("composite.toml", config)], None).await;

    // b and c both empty → both Null; only the first missing field reports
    let job = run_file(&h, "composite", "scope,a,b,c\nauto,x,,\n").await;

    assert_eq!(job.initial_error_count, 1);
    let (reason,): (String,) = sqlx::query_as("SELECT reason FROM ingestion_errors")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    assert!(reason.contains("business key field 'b'"));
    assert!(!reason.contains("'c'"));
}

const EMBED_CONFIG: &str = r#"
    report_type = "notes"
    item_type = "note"
    scope_field = "scope"
    business_key = ["id"]

    [embed_content]
    source_columns = ["body"]

    [[column_mappings]]
    csv_header = "id"
    json_field = "id"
    [column_mappings.validation]
    required = true

    [[column_mappings]]
    csv_header = "scope"
    json_field = "scope"

    [[column_mappings]]
    csv_header = "body"
    json_field = "body"
"#;

#[tokio::test]
async fn oversized_embedding_is_nulled_row_still_succeeds() {
    let oversized = tally_common::db::EMBEDDING_DIMS + 16;
    let h = harness(
        &[("notes.toml", EMBED_CONFIG)],
        Some(Arc::new(FixedEmbedder(oversized))),
    )
    .await;

    let job = run_file(&h, "notes", "id,scope,body\nN-1,ops,water damage in unit 4\n").await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.processed_rows, 1);

    let (embedding,): (Option<String>,) = sqlx::query_as("SELECT embedding FROM items")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    assert!(embedding.is_none());
}

#[tokio::test]
async fn fitting_embedding_is_stored() {
    let h = harness(
        &[("notes.toml", EMBED_CONFIG)],
        Some(Arc::new(FixedEmbedder(8))),
    )
    .await;

    let job = run_file(&h, "notes", "id,scope,body\nN-1,ops,roof leak\n").await;
    assert_eq!(job.status, JobStatus::Complete);

    let (embedding,): (Option<String>,) = sqlx::query_as("SELECT embedding FROM items")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    let vector: Vec<f32> = serde_json::from_str(&embedding.unwrap()).unwrap();
    assert_eq!(vector.len(), 8);
}

#[tokio::test]
async fn embedder_failure_triages_the_row() {
    let h = harness(&[("notes.toml", EMBED_CONFIG)], Some(Arc::new(FailingEmbedder))).await;

    let job = run_file(&h, "notes", "id,scope,body\nN-1,ops,roof leak\nN-2,ops,\n").await;

    // N-1 needs an embedding and fails; N-2 has empty embed text and skips
    // the embedder entirely
    assert_eq!(job.status, JobStatus::CompleteWithIssues);
    assert_eq!(job.processed_rows, 1);
    assert_eq!(job.initial_error_count, 1);

    let (reason,): (String,) = sqlx::query_as("SELECT reason FROM ingestion_errors")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    assert!(reason.contains("failed to generate embedding"));
}

#[tokio::test]
async fn cross_reference_validates_against_persisted_items() {
    let claims = r#"
        report_type = "claims"
        item_type = "claim"
        scope_field = "line"
        business_key = ["id"]

        [[column_mappings]]
        csv_header = "id"
        json_field = "id"
        [column_mappings.validation]
        required = true

        [[column_mappings]]
        csv_header = "line"
        json_field = "line"

        [[column_mappings]]
        csv_header = "policy"
        json_field = "policy"
        [column_mappings.validation]
        exists_in_items = "policy"
    "#;
    let h = harness(&[("claims.toml", claims)], None).await;

    // Seed the referenced policy item
    let now = chrono::Utc::now();
    sqlx::query(
        "INSERT INTO items (guid, item_type, business_key, status, custom_properties, created_at, updated_at)
         VALUES ('g1', 'policy', 'POL-1', 'active', '{}', ?, ?)",
    )
    .bind(now)
    .bind(now)
    .execute(&h.state.db)
    .await
    .unwrap();

    let csv = "id,line,policy\nC-1,auto,POL-1\nC-2,auto,POL-404\n";
    let job = run_file(&h, "claims", csv).await;

    assert_eq!(job.status, JobStatus::CompleteWithIssues);
    assert_eq!(job.processed_rows, 1);
    assert_eq!(job.initial_error_count, 1);

    let (reason,): (String,) = sqlx::query_as("SELECT reason FROM ingestion_errors")
        .fetch_one(&h.state.db)
        .await
        .unwrap();
    assert!(reason.contains("POL-404"));
}

#[tokio::test]
async fn staging_failure_fails_job_but_triage_rows_survive() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    // Sabotage the canonical table so the staging transaction fails
    sqlx::query("DROP TABLE items").execute(&h.state.db).await.unwrap();

    let csv = "id,status,email\n1,ACTIVE,a@x.com\n2,PENDING,b@x.com\n";
    let job = run_file(&h, "roster", csv).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_rows, 0);
    assert_eq!(job.initial_error_count, 1);
    assert!(job.error_details.unwrap().contains("Error saving processed data"));

    // The enum failure was written through the separate path and persists
    let errors = count(&h.state.db, "SELECT COUNT(*) FROM ingestion_errors").await;
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn missing_required_header_fails_the_job() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    let job = run_file(&h, "roster", "id,email\n1,a@x.com\n").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_details.unwrap().contains("missing required header 'status'"));
    assert_eq!(count(&h.state.db, "SELECT COUNT(*) FROM items").await, 0);
}

#[tokio::test]
async fn unknown_report_type_fails_the_job() {
    let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;

    let job = run_file(&h, "unmapped", "id\n1\n").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_details
        .unwrap()
        .contains("No ingestion configuration found"));
}

mod api {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    async fn wait_for_terminal(state: &AppState, guid: &str) -> IngestionJob {
        for _ in 0..200 {
            let job = jobs::fetch_job(&state.db, guid).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("job {} never reached a terminal status", guid);
    }

    #[tokio::test]
    async fn upload_returns_job_and_processes_in_background() {
        let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;
        let app = tally_ingest::build_router(h.state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest/roster?filename=roster.csv")
            .header("x-user-id", "u-42")
            .body(Body::from("id,status,email\n1,ACTIVE,a@x.com\n"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job["status"], "UPLOADED");
        assert_eq!(job["source_filename"], "roster.csv");
        assert_eq!(job["submitted_by"], "u-42");

        let finished = wait_for_terminal(&h.state, job["guid"].as_str().unwrap()).await;
        assert_eq!(finished.status, JobStatus::Complete);
        assert_eq!(finished.processed_rows, 1);
    }

    #[tokio::test]
    async fn upload_for_unknown_report_type_is_rejected() {
        let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;
        let app = tally_ingest::build_router(h.state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest/unmapped")
            .body(Body::from("id\n1\n"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_of_unknown_job_is_not_found() {
        let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;
        let app = tally_ingest::build_router(h.state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingestion-jobs/no-such-job/cancel")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_module_identity() {
        let h = harness(&[("roster.toml", ROSTER_CONFIG)], None).await;
        let app = tally_ingest::build_router(h.state.clone());

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["module"], "tally-ingest");
    }
}
