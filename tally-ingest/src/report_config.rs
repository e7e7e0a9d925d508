//! Declarative ingestion configuration for one report type
//!
//! Behavior is data: each TOML file in the report-config directory
//! describes how one report type's columns map, transform, and validate
//! into canonical items. Unknown keys are rejected by strict
//! deserialization, so a typo'd rule name fails at startup.

use serde::Deserialize;
use std::collections::HashSet;
use tally_common::Error;

/// Validation rules for a single column
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: bool,
    /// Override for whether integer/decimal zero satisfies `required`
    #[serde(default)]
    pub allow_zero: Option<bool>,
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    /// Cross-reference: value must exist as a business key of this item type
    #[serde(default)]
    pub exists_in_items: Option<String>,
}

/// One ordered transform chain; the first attempt whose chain fully
/// succeeds wins
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingAttempt {
    /// Transform calls, `"name"` or `"name:arg"`
    #[serde(default)]
    pub transforms: Vec<String>,
}

/// Mapping of one CSV column into one canonical JSON field
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMapping {
    pub csv_header: String,
    pub json_field: String,
    /// Repair target for rows widened by unescaped delimiters; at most
    /// one column per config may set this
    #[serde(default)]
    pub merge_excess_fields: bool,
    #[serde(default)]
    pub attempts: Vec<ProcessingAttempt>,
    #[serde(default)]
    pub validation: ValidationRule,
}

/// Embedding source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedContent {
    pub source_columns: Vec<String>,
}

/// Full ingestion configuration for one report type
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    #[serde(default)]
    pub report_type: String,
    #[serde(default)]
    pub item_type: String,
    /// CSV header whose mapped JSON field supplies the item scope
    #[serde(default)]
    pub scope_field: String,
    /// JSON field names joined in order into the item business key
    #[serde(default)]
    pub business_key: Vec<String>,
    #[serde(default)]
    pub embed_content: Option<EmbedContent>,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
}

impl IngestionConfig {
    /// Check structural consistency. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), Error> {
        if self.report_type.is_empty() {
            return Err(Error::Config(
                "config validation failed: report_type is required".to_string(),
            ));
        }
        if self.item_type.is_empty() {
            return Err(Error::Config(
                "config validation failed: item_type is required".to_string(),
            ));
        }
        if self.scope_field.is_empty() {
            return Err(Error::Config(
                "config validation failed: scope_field is required".to_string(),
            ));
        }
        if self.business_key.is_empty() {
            return Err(Error::Config(
                "config validation failed: business_key must contain at least one field".to_string(),
            ));
        }
        if self.column_mappings.is_empty() {
            return Err(Error::Config(
                "config validation failed: at least one column mapping is required".to_string(),
            ));
        }

        let defined_headers: HashSet<&str> = self
            .column_mappings
            .iter()
            .map(|m| m.csv_header.as_str())
            .collect();
        if !defined_headers.contains(self.scope_field.as_str()) {
            return Err(Error::Config(format!(
                "config validation failed: scope_field '{}' does not match any defined CSV header",
                self.scope_field
            )));
        }

        let merge_columns = self
            .column_mappings
            .iter()
            .filter(|m| m.merge_excess_fields)
            .count();
        if merge_columns > 1 {
            return Err(Error::Config(
                "config validation failed: at most one column may set merge_excess_fields"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
