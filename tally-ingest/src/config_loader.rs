//! Ingestion config discovery, validation, and compilation
//!
//! Scans the report-config directory tree for TOML files, validates each
//! config, and compiles it against the transform registry: transform
//! names are resolved to functions, regex patterns are compiled and
//! anchored, and the scope field's JSON name is resolved. Every
//! configuration mistake surfaces here, at startup, not mid-file on row
//! 40,000.

use crate::registry::{CompiledRule, TransformFn, TransformRegistry};
use crate::report_config::{ColumnMapping, IngestionConfig, ValidationRule};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tally_common::{Error, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

/// A transform call resolved against the registry at load time
#[derive(Debug, Clone)]
pub struct CompiledTransform {
    pub name: String,
    pub arg: Option<String>,
    pub func: TransformFn,
}

impl CompiledTransform {
    pub fn apply(
        &self,
        value: crate::registry::FieldValue,
    ) -> std::result::Result<crate::registry::FieldValue, crate::registry::TransformError> {
        (self.func)(value, self.arg.as_deref())
    }
}

/// A column mapping with its transforms resolved and rule compiled
#[derive(Debug, Clone)]
pub struct CompiledColumn {
    pub csv_header: String,
    pub json_field: String,
    pub merge_excess_fields: bool,
    /// Ordered attempts, each an ordered transform chain
    pub attempts: Vec<Vec<CompiledTransform>>,
    pub rule: CompiledRule,
}

/// A fully validated and compiled ingestion configuration
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub report_type: String,
    pub item_type: String,
    /// CSV header naming the scope column
    pub scope_field: String,
    /// JSON field the scope column maps to, resolved at load time
    pub scope_json_field: String,
    pub business_key: Vec<String>,
    /// JSON fields concatenated into embedding text; empty disables embedding
    pub embed_source_columns: Vec<String>,
    pub columns: Vec<CompiledColumn>,
}

/// Immutable name→config map built once at startup
#[derive(Debug)]
pub struct ConfigLoader {
    configs: HashMap<String, Arc<CompiledConfig>>,
}

impl ConfigLoader {
    /// Recursively scan `config_dir` for `.toml` files, parse, validate,
    /// and compile each one. Fails the whole startup on the first broken
    /// config or duplicate report type.
    pub fn load(config_dir: &Path, transforms: &TransformRegistry) -> Result<Self> {
        let mut configs: HashMap<String, Arc<CompiledConfig>> = HashMap::new();

        if !config_dir.exists() {
            warn!(
                "Report config directory {} does not exist; no report types will be served",
                config_dir.display()
            );
            return Ok(Self { configs });
        }

        for entry in WalkDir::new(config_dir) {
            let entry = entry.map_err(|e| {
                Error::Config(format!(
                    "error walking config directory {}: {}",
                    config_dir.display(),
                    e
                ))
            })?;

            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            info!("Loading ingestion config: {}", entry.path().display());

            let content = std::fs::read_to_string(entry.path())?;
            let config: IngestionConfig = toml::from_str(&content).map_err(|e| {
                Error::Config(format!(
                    "failed to parse {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;

            config.validate().map_err(|e| {
                Error::Config(format!("{} in {}", e, entry.path().display()))
            })?;

            if configs.contains_key(&config.report_type) {
                return Err(Error::Config(format!(
                    "duplicate report_type '{}' found in {}",
                    config.report_type,
                    entry.path().display()
                )));
            }

            let compiled = compile(config, transforms).map_err(|e| {
                Error::Config(format!("{} in {}", e, entry.path().display()))
            })?;
            configs.insert(compiled.report_type.clone(), Arc::new(compiled));
        }

        if configs.is_empty() {
            warn!(
                "No ingestion configs were loaded from {}",
                config_dir.display()
            );
        }

        Ok(Self { configs })
    }

    /// Retrieve a compiled configuration by report type
    pub fn get(&self, report_type: &str) -> Option<Arc<CompiledConfig>> {
        self.configs.get(report_type).cloned()
    }

    pub fn report_types(&self) -> Vec<&str> {
        self.configs.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Resolve every name the config references; unknown transform names and
/// invalid regex patterns are configuration errors here, never at row time
fn compile(config: IngestionConfig, transforms: &TransformRegistry) -> Result<CompiledConfig> {
    let scope_json_field = config
        .column_mappings
        .iter()
        .find(|m| m.csv_header == config.scope_field)
        .map(|m| m.json_field.clone())
        // validate() guarantees the mapping exists
        .ok_or_else(|| {
            Error::Config(format!(
                "no column mapping found for scope_field '{}'",
                config.scope_field
            ))
        })?;

    let mut columns = Vec::with_capacity(config.column_mappings.len());
    for mapping in &config.column_mappings {
        columns.push(compile_column(mapping, transforms)?);
    }

    Ok(CompiledConfig {
        report_type: config.report_type,
        item_type: config.item_type,
        scope_field: config.scope_field,
        scope_json_field,
        business_key: config.business_key,
        embed_source_columns: config
            .embed_content
            .map(|e| e.source_columns)
            .unwrap_or_default(),
        columns,
    })
}

fn compile_column(mapping: &ColumnMapping, transforms: &TransformRegistry) -> Result<CompiledColumn> {
    let mut attempts = Vec::with_capacity(mapping.attempts.len());
    for attempt in &mapping.attempts {
        let mut chain = Vec::with_capacity(attempt.transforms.len());
        for call in &attempt.transforms {
            chain.push(compile_transform_call(call, &mapping.csv_header, transforms)?);
        }
        attempts.push(chain);
    }

    Ok(CompiledColumn {
        csv_header: mapping.csv_header.clone(),
        json_field: mapping.json_field.clone(),
        merge_excess_fields: mapping.merge_excess_fields,
        attempts,
        rule: compile_rule(&mapping.validation, &mapping.csv_header)?,
    })
}

fn compile_transform_call(
    call: &str,
    column: &str,
    transforms: &TransformRegistry,
) -> Result<CompiledTransform> {
    let (name, arg) = match call.split_once(':') {
        Some((name, arg)) => (name, Some(arg.to_string())),
        None => (call, None),
    };

    let func = transforms.get(name).ok_or_else(|| {
        Error::Config(format!(
            "unknown transform '{}' referenced by column '{}'",
            name, column
        ))
    })?;

    Ok(CompiledTransform { name: name.to_string(), arg, func })
}

fn compile_rule(rule: &ValidationRule, column: &str) -> Result<CompiledRule> {
    let regex = match &rule.regex {
        Some(pattern) => {
            // Anchor for full-string matching
            let anchored = format!("^(?:{})$", pattern);
            Some(regex::Regex::new(&anchored).map_err(|e| {
                Error::Config(format!(
                    "invalid regex pattern '{}' on column '{}': {}",
                    pattern, column, e
                ))
            })?)
        }
        None => None,
    };

    Ok(CompiledRule {
        required: rule.required,
        allow_zero: rule.allow_zero,
        enum_values: rule.enum_values.clone(),
        regex,
        exists_in_items: rule.exists_in_items.clone(),
    })
}
