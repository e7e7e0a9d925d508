//! HTTP API handlers for the ingest service

pub mod health;
pub mod upload;

pub use health::health_routes;
pub use upload::{cancel_job, upload_report};
