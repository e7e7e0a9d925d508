//! The per-row ingestion pipeline
//!
//! Each stage is a function from (raw row, config) to (canonical fields |
//! failure reason); `runner` composes them per job. A row fails for at
//! most one reason, reported at the first offending column, and a
//! row-level failure never aborts the job.

pub mod intake;
pub mod processor;
pub mod runner;

use thiserror::Error;

/// Row-scoped failure. The row goes to triage with this reason and
/// processing continues with the next row.
#[derive(Debug, Error)]
pub enum RowFailure {
    /// Ragged row that could not be repaired to header width
    #[error("row has {found} fields, but header has {expected}")]
    Shape { found: usize, expected: usize },

    /// Every transform attempt failed; message is the last attempt's error
    #[error("all transform attempts failed for column '{column}' with value '{value}': {message}")]
    Transform {
        column: String,
        value: String,
        message: String,
    },

    /// A validation rule rejected the transformed value
    #[error("validation failed for column '{column}' with value '{value}': {message}")]
    Validation {
        column: String,
        value: String,
        message: String,
    },

    /// Scope field missing, null, or not a string
    #[error("scope field '{field}' {problem}")]
    Scope { field: String, problem: String },

    /// First missing business key field; later key fields are not evaluated
    #[error("business key field '{field}' is missing or null")]
    BusinessKey { field: String },

    /// The injected embedder failed for this row
    #[error("failed to generate embedding: {message}")]
    Embedding { message: String },
}
