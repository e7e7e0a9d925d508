//! HTTP API handlers for the triage service

pub mod errors;
pub mod health;
pub mod jobs;

pub use errors::{correct_ingestion_error, list_job_errors};
pub use health::health_routes;
pub use jobs::{get_ingestion_job, list_ingestion_jobs};
