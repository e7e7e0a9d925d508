//! Database models shared by the ingest and triage services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Fixed dimensionality of the item embedding column.
///
/// Vectors wider than this are nulled at staging time, never rejected.
pub const EMBEDDING_DIMS: usize = 384;

/// Lifecycle status of a canonical item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ItemStatus {
    #[serde(rename = "active")]
    #[sqlx(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    #[sqlx(rename = "inactive")]
    Inactive,
    #[serde(rename = "archived")]
    #[sqlx(rename = "archived")]
    Archived,
}

/// Canonical persisted record for one business entity, unique per
/// `(item_type, business_key)`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub guid: String,
    pub item_type: String,
    pub business_key: String,
    /// Partitioning/ownership tag, used for access scoping by collaborators
    pub scope: Option<String>,
    pub status: ItemStatus,
    /// Open JSON payload of all config-mapped fields; merged, not replaced,
    /// on re-ingest
    pub custom_properties: Json<serde_json::Value>,
    /// JSON-encoded embedding vector, or NULL
    pub embedding: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ingestion job status
///
/// Transitions are monotonic: `UPLOADED → PROCESSING → {FAILED | COMPLETE |
/// COMPLETE_WITH_ISSUES}`. Terminal states are never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum JobStatus {
    #[serde(rename = "UPLOADED")]
    #[sqlx(rename = "UPLOADED")]
    Uploaded,
    #[serde(rename = "PROCESSING")]
    #[sqlx(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "FAILED")]
    #[sqlx(rename = "FAILED")]
    Failed,
    #[serde(rename = "COMPLETE")]
    #[sqlx(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "COMPLETE_WITH_ISSUES")]
    #[sqlx(rename = "COMPLETE_WITH_ISSUES")]
    CompleteWithIssues,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Failed => "FAILED",
            JobStatus::Complete => "COMPLETE",
            JobStatus::CompleteWithIssues => "COMPLETE_WITH_ISSUES",
        }
    }

    /// Terminal states record `completed_at` and are never left
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Complete | JobStatus::CompleteWithIssues
        )
    }

    /// Whether a transition to `next` is allowed by the state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Uploaded, JobStatus::Processing) => true,
            // A job that cannot even start processing still fails terminally
            (JobStatus::Uploaded, JobStatus::Failed) => true,
            (JobStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upload-and-process run
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionJob {
    pub guid: String,
    pub report_type: String,
    pub source_filename: String,
    /// Spool key of the uploaded file under the root folder
    pub source_uri: String,
    pub submitted_by: Option<String>,
    pub status: JobStatus,
    /// Free-text summary or failure detail recorded at terminal transition
    pub error_details: Option<String>,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub initial_error_count: i64,
    pub resolved_rows_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Triage lifecycle of a failed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum TriageStatus {
    #[serde(rename = "new")]
    #[sqlx(rename = "new")]
    New,
    #[serde(rename = "pending_revalidation")]
    #[sqlx(rename = "pending_revalidation")]
    PendingRevalidation,
    #[serde(rename = "resolved")]
    #[sqlx(rename = "resolved")]
    Resolved,
    #[serde(rename = "ignored")]
    #[sqlx(rename = "ignored")]
    Ignored,
}

/// A row that failed processing, preserved with its original raw values
/// and a human-correctable lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionError {
    pub guid: String,
    pub job_guid: String,
    /// Header → raw string map, preserved regardless of later correction
    pub original_row: Json<serde_json::Value>,
    pub reason: String,
    pub status: TriageStatus,
    /// Operator-supplied values keyed by JSON field names, not raw headers
    pub corrected_data: Option<Json<serde_json::Value>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
