//! Per-row transform, validation, and identity resolution
//!
//! Applies each column mapping in declaration order, building the
//! canonical field map, then derives the row's scope and business key
//! from the processed fields.

use crate::config_loader::{CompiledColumn, CompiledConfig};
use crate::pipeline::RowFailure;
use crate::registry::{check_exists_in_items, FieldValue, ValidationRegistry};
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Canonical field map keyed by JSON field name
pub type FieldMap = HashMap<String, FieldValue>;

/// Apply every column mapping to one repaired, non-blank row.
///
/// Attempts are tried in order and the first fully-succeeding transform
/// chain wins; if all attempts fail the row fails with the last attempt's
/// error. The transformed value is then checked against the column's
/// validation rule. The first offending column fails the whole row.
pub async fn process_row(
    config: &CompiledConfig,
    validations: &ValidationRegistry,
    pool: &SqlitePool,
    header_index: &HashMap<String, usize>,
    record: &[String],
) -> Result<FieldMap, RowFailure> {
    let mut fields = FieldMap::with_capacity(config.columns.len());

    for column in &config.columns {
        // Header presence is checked once per file before any row runs
        let raw = header_index
            .get(&column.csv_header)
            .and_then(|&i| record.get(i))
            .cloned()
            .unwrap_or_default();

        let value = transform_column(column, &raw)?;

        validations
            .apply(&value, &column.rule)
            .map_err(|e| RowFailure::Validation {
                column: column.csv_header.clone(),
                value: value.render().unwrap_or_default(),
                message: e.to_string(),
            })?;

        if column.rule.exists_in_items.is_some() && !elides_rules(&value, &column.rule) {
            check_exists_in_items(pool, &value, &column.rule)
                .await
                .map_err(|e| RowFailure::Validation {
                    column: column.csv_header.clone(),
                    value: value.render().unwrap_or_default(),
                    message: e.to_string(),
                })?;
        }

        fields.insert(column.json_field.clone(), value);
    }

    Ok(fields)
}

/// An empty string on an optional column skips every rule
fn elides_rules(value: &FieldValue, rule: &crate::registry::CompiledRule) -> bool {
    matches!(value, FieldValue::Text(s) if s.is_empty() && !rule.required)
}

fn transform_column(column: &CompiledColumn, raw: &str) -> Result<FieldValue, RowFailure> {
    if column.attempts.is_empty() {
        // No attempts declared: the raw value passes through
        return Ok(FieldValue::Text(raw.to_string()));
    }

    let mut last_error = None;
    for chain in &column.attempts {
        match apply_chain(raw, chain) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }

    Err(RowFailure::Transform {
        column: column.csv_header.clone(),
        value: raw.to_string(),
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no transform attempts declared".to_string()),
    })
}

fn apply_chain(
    raw: &str,
    chain: &[crate::config_loader::CompiledTransform],
) -> Result<FieldValue, crate::registry::TransformError> {
    let mut value = FieldValue::Text(raw.to_string());
    for transform in chain {
        value = transform.apply(value).map_err(|e| {
            crate::registry::TransformError(format!("transform '{}' failed: {}", transform.name, e))
        })?;
    }
    Ok(value)
}

/// Read the row's scope from the configured scope field
pub fn resolve_scope(config: &CompiledConfig, fields: &FieldMap) -> Result<String, RowFailure> {
    match fields.get(&config.scope_json_field) {
        None | Some(FieldValue::Null) => Err(RowFailure::Scope {
            field: config.scope_json_field.clone(),
            problem: "is missing or null".to_string(),
        }),
        Some(FieldValue::Text(s)) => Ok(s.clone()),
        Some(_) => Err(RowFailure::Scope {
            field: config.scope_json_field.clone(),
            problem: "is not a string".to_string(),
        }),
    }
}

/// Join the configured key fields' rendered values with `-`, in declared
/// order. The first missing or null key field fails the row immediately;
/// later key fields are not evaluated, so a row missing several key
/// fields produces exactly one triage entry.
pub fn resolve_business_key(config: &CompiledConfig, fields: &FieldMap) -> Result<String, RowFailure> {
    let mut parts = Vec::with_capacity(config.business_key.len());
    for field in &config.business_key {
        let rendered = fields.get(field).and_then(|v| v.render());
        match rendered {
            Some(part) => parts.push(part),
            None => return Err(RowFailure::BusinessKey { field: field.clone() }),
        }
    }
    Ok(parts.join("-"))
}

/// Space-joined rendering of the configured embedding source fields;
/// `None` when the config declares no embedding or the text is empty
pub fn build_embed_text(config: &CompiledConfig, fields: &FieldMap) -> Option<String> {
    if config.embed_source_columns.is_empty() {
        return None;
    }

    let text = config
        .embed_source_columns
        .iter()
        .filter_map(|column| fields.get(column).and_then(|v| v.render()))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Serialize the field map into the item's `custom_properties` payload
pub fn fields_to_json(fields: &FieldMap) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(fields.len());
    for (field, value) in fields {
        map.insert(field.clone(), value.to_json());
    }
    serde_json::Value::Object(map)
}
