//! Supervised per-job processing task
//!
//! Each upload spawns one `run_job` task with a hard deadline and a
//! cancellation token registered in `AppState`, so a job's terminal state
//! is always reachable: normal completion, internal failure, deadline,
//! and operator cancellation all land in a terminal status with counters.

use crate::config_loader::CompiledConfig;
use crate::jobs::{self, JobCounters};
use crate::pipeline::{intake, processor, RowFailure};
use crate::staging::{self, StagedItem};
use crate::triage::{self, TriageRow};
use crate::AppState;
use anyhow::{anyhow, bail};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tally_common::db::JobStatus;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Entry point for the background processing task of one job.
///
/// Never returns an error: every outcome is recorded on the job row.
pub async fn run_job(state: AppState, job_guid: String, report_type: String, source_uri: String) {
    let deadline = Duration::from_secs(state.settings.job_deadline_minutes * 60);

    let cancel = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(job_guid.clone(), cancel.clone());

    info!(job_id = %job_guid, report_type = %report_type, "Starting asynchronous processing job");

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("job cancelled by operator")),
        result = tokio::time::timeout(
            deadline,
            execute_job(&state, &job_guid, &report_type, &source_uri, &cancel),
        ) => {
            match result {
                Ok(inner) => inner,
                Err(_) => Err(anyhow!(
                    "processing deadline of {} minutes exceeded",
                    state.settings.job_deadline_minutes
                )),
            }
        }
    };

    if let Err(e) = outcome {
        error!(job_id = %job_guid, error = %e, "Processing job aborted");
        // The staging transaction, if in flight, rolled back when the task
        // was cut short; only the terminal status remains to record
        fail_job(&state, &job_guid, e.to_string(), JobCounters::default()).await;
    }

    state.cancellation_tokens.write().await.remove(&job_guid);
}

/// Process one spooled file end to end.
///
/// Handled failures finalize the job themselves and return `Ok`; an `Err`
/// means the job has not reached a terminal status and the caller must
/// fail it.
async fn execute_job(
    state: &AppState,
    job_guid: &str,
    report_type: &str,
    source_uri: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    // A job update failure before processing starts aborts the run
    // without attempting the file at all
    if let Err(e) = jobs::transition(&state.db, job_guid, JobStatus::Processing).await {
        error!(job_id = %job_guid, error = %e, "Failed to update job status to PROCESSING, aborting");
        return Ok(());
    }

    let config = match state.configs.get(report_type) {
        Some(config) => config,
        None => {
            fail_job(
                state,
                job_guid,
                format!("No ingestion configuration found for report type: {}", report_type),
                JobCounters::default(),
            )
            .await;
            return Ok(());
        }
    };

    let spool_path = state.spool_dir.join(source_uri);
    let bytes = match tokio::fs::read(&spool_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            fail_job(
                state,
                job_guid,
                format!("Failed to read file from storage: {}", e),
                JobCounters::default(),
            )
            .await;
            return Ok(());
        }
    };

    let parsed = match intake::read_file(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            fail_job(state, job_guid, e.to_string(), JobCounters::default()).await;
            return Ok(());
        }
    };

    if let Err(e) = intake::check_headers(&config, &parsed.header_index) {
        fail_job(state, job_guid, e.to_string(), JobCounters::default()).await;
        return Ok(());
    }

    let merge_index = intake::merge_column_index(&config, &parsed.header_index);
    let num_headers = parsed.headers.len();
    let total_rows = parsed.records.len();

    let mut staged: Vec<StagedItem> = Vec::new();
    let mut triage_rows: Vec<TriageRow> = Vec::new();
    let mut blank_rows = 0usize;

    // Row processing is sequential within a job: cross-reference
    // validation reads and embedder calls serialize per row
    for record in parsed.records {
        if cancel.is_cancelled() {
            bail!("job cancelled during row processing");
        }

        let record = intake::repair_row(record, num_headers, merge_index);

        if record.len() != num_headers {
            triage_rows.push(TriageRow {
                original_record: intake::original_record_map(&record, &parsed.headers),
                reason: RowFailure::Shape { found: record.len(), expected: num_headers }
                    .to_string(),
            });
            continue;
        }

        if intake::is_row_blank(&record) {
            blank_rows += 1;
            continue;
        }

        match classify_row(state, &config, &parsed.header_index, &record).await {
            Ok(item) => staged.push(item),
            Err(failure) => triage_rows.push(TriageRow {
                original_record: intake::original_record_map(&record, &parsed.headers),
                reason: failure.to_string(),
            }),
        }
    }

    // Triage rows take the separate, non-transactional path: they survive
    // even if the staging transaction below fails
    triage::record_triage_rows(&state.db, job_guid, &triage_rows).await;

    let mut upserted: u64 = 0;
    if !staged.is_empty() {
        match staging::load_items(&state.db, &staged).await {
            Ok(count) => upserted = count,
            Err(e) => {
                error!(job_id = %job_guid, error = %e, "Failed to save successful items to database");
                fail_job(
                    state,
                    job_guid,
                    "Error saving processed data to database".to_string(),
                    JobCounters {
                        total_rows: total_rows as i64,
                        processed_rows: 0,
                        initial_error_count: triage_rows.len() as i64,
                    },
                )
                .await;
                return Ok(());
            }
        }
    }

    let status = if triage_rows.is_empty() {
        JobStatus::Complete
    } else {
        JobStatus::CompleteWithIssues
    };
    let summary = format!(
        "Processed {} items successfully. {} rows sent for triage. {} blank rows discarded.",
        upserted,
        triage_rows.len(),
        blank_rows
    );

    info!(
        job_id = %job_guid,
        status = %status,
        rows_upserted = upserted,
        rows_for_triage = triage_rows.len(),
        blank_rows_discarded = blank_rows,
        "Processing job completed"
    );

    jobs::finalize(
        &state.db,
        job_guid,
        status,
        Some(summary),
        JobCounters {
            total_rows: total_rows as i64,
            processed_rows: upserted as i64,
            initial_error_count: triage_rows.len() as i64,
        },
    )
    .await?;

    Ok(())
}

/// Classify one repaired, non-blank row into a staged item or a failure
async fn classify_row(
    state: &AppState,
    config: &Arc<CompiledConfig>,
    header_index: &HashMap<String, usize>,
    record: &[String],
) -> Result<StagedItem, RowFailure> {
    let fields =
        processor::process_row(config, &state.validations, &state.db, header_index, record).await?;

    let scope = processor::resolve_scope(config, &fields)?;
    let business_key = processor::resolve_business_key(config, &fields)?;

    let mut embedding = None;
    if let Some(text) = processor::build_embed_text(config, &fields) {
        if let Some(embedder) = &state.embedder {
            match embedder.embed(&text).await {
                Ok(vector) => embedding = Some(vector),
                Err(e) => return Err(RowFailure::Embedding { message: e.to_string() }),
            }
        }
    }

    Ok(StagedItem {
        item_type: config.item_type.clone(),
        scope,
        business_key,
        custom_properties: processor::fields_to_json(&fields),
        embedding,
    })
}

/// Best-effort terminal FAILED transition; a job whose failure cannot
/// even be recorded is only logged
async fn fail_job(state: &AppState, job_guid: &str, details: String, counters: JobCounters) {
    if let Err(e) =
        jobs::finalize(&state.db, job_guid, JobStatus::Failed, Some(details), counters).await
    {
        error!(job_id = %job_guid, error = %e, "Failed to record job failure");
    }
}
