//! Transform and validation registries
//!
//! Named, pure per-column functions declared by ingestion configs. Both
//! registries are built once at startup and passed by reference into the
//! pipeline; configuration references to unknown names are rejected at
//! load time by the config loader, never at row-processing time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::error;

/// A single processed field value.
///
/// Raw CSV fields enter as `Text`; transforms may narrow them. `Null` is a
/// real value (e.g. `to_integer` of an empty string) and is distinct from
/// integer zero.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// String rendering used for business keys and embedding text.
    /// `Null` has no rendering.
    pub fn render(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Decimal(d) => Some(d.to_string()),
            FieldValue::Timestamp(t) => Some(t.to_rfc3339()),
        }
    }

    /// JSON form persisted into `custom_properties`. Decimals become
    /// strings to preserve precision; timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::Value::Number((*i).into()),
            FieldValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            FieldValue::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
        }
    }
}

/// Error from a single transform application
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Signature of a named transform: value in, value out, optional config
/// argument (the part after `:` in `"to_date:%m/%d/%Y"`)
pub type TransformFn = fn(FieldValue, Option<&str>) -> Result<FieldValue, TransformError>;

/// Registry of named transforms, built once at startup
pub struct TransformRegistry {
    map: HashMap<&'static str, TransformFn>,
}

impl TransformRegistry {
    /// Registry with the built-in transform set
    pub fn builtin() -> Self {
        let mut registry = Self { map: HashMap::new() };
        registry.register("trim_space", transform_trim_space);
        registry.register("to_uppercase", transform_to_uppercase);
        registry.register("to_integer", transform_to_integer);
        registry.register("to_decimal", transform_to_decimal);
        registry.register("to_date", transform_to_date);
        registry
    }

    pub fn register(&mut self, name: &'static str, func: TransformFn) {
        self.map.insert(name, func);
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.map.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}

fn transform_trim_space(input: FieldValue, _arg: Option<&str>) -> Result<FieldValue, TransformError> {
    match input {
        FieldValue::Text(s) => Ok(FieldValue::Text(s.trim().to_string())),
        _ => Err(TransformError("trim_space requires a string input".to_string())),
    }
}

fn transform_to_uppercase(input: FieldValue, _arg: Option<&str>) -> Result<FieldValue, TransformError> {
    match input {
        FieldValue::Text(s) => Ok(FieldValue::Text(s.to_uppercase())),
        _ => Err(TransformError("to_uppercase requires a string input".to_string())),
    }
}

/// Strict base-10 integer parse. Thousands separators are stripped first;
/// an empty string becomes `Null`, not zero.
fn transform_to_integer(input: FieldValue, _arg: Option<&str>) -> Result<FieldValue, TransformError> {
    let s = match input {
        FieldValue::Text(s) => s,
        _ => return Err(TransformError("to_integer requires a string input".to_string())),
    };

    let clean = s.replace(',', "");
    let clean = clean.trim();
    if clean.is_empty() {
        return Ok(FieldValue::Null);
    }

    clean
        .parse::<i64>()
        .map(FieldValue::Integer)
        .map_err(|e| TransformError(format!("could not parse '{}' as integer: {}", s, e)))
}

fn transform_to_decimal(input: FieldValue, _arg: Option<&str>) -> Result<FieldValue, TransformError> {
    let s = match input {
        FieldValue::Text(s) => s,
        _ => return Err(TransformError("to_decimal requires a string input".to_string())),
    };

    Decimal::from_str(&s)
        .map(FieldValue::Decimal)
        .map_err(|e| TransformError(format!("could not parse '{}' as decimal: {}", s, e)))
}

/// Date parse in UTC. The layout comes from the transform argument
/// (chrono strftime syntax); the default is an ISO calendar date.
fn transform_to_date(input: FieldValue, arg: Option<&str>) -> Result<FieldValue, TransformError> {
    let layout = match arg {
        Some(layout) if !layout.is_empty() => layout,
        _ => "%Y-%m-%d",
    };

    let s = match input {
        FieldValue::Text(s) => s,
        _ => return Err(TransformError("to_date requires a string input".to_string())),
    };

    // Layouts with a time component parse as a full datetime; date-only
    // layouts land at midnight UTC
    if let Ok(dt) = NaiveDateTime::parse_from_str(&s, layout) {
        return Ok(FieldValue::Timestamp(dt.and_utc()));
    }
    match NaiveDate::parse_from_str(&s, layout) {
        Ok(date) => {
            let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                TransformError(format!("could not derive midnight for date '{}'", s))
            })?;
            Ok(FieldValue::Timestamp(midnight.and_utc()))
        }
        Err(e) => Err(TransformError(format!(
            "could not parse date '{}' with format '{}' in UTC: {}",
            s, layout, e
        ))),
    }
}

/// A validation rule after load-time compilation: the regex is compiled
/// (anchored for full-string matching) and the rule keys are known-valid.
#[derive(Debug, Clone, Default)]
pub struct CompiledRule {
    pub required: bool,
    /// Whether integer/decimal zero satisfies `required`; defaults to yes
    pub allow_zero: Option<bool>,
    pub enum_values: Vec<String>,
    pub regex: Option<regex::Regex>,
    /// Item type whose business keys the value must already exist among
    pub exists_in_items: Option<String>,
}

/// A validation rule violation, naming the rule that failed
#[derive(Debug, Error)]
#[error("validation rule '{rule}' failed: {message}")]
pub struct RuleViolation {
    pub rule: &'static str,
    pub message: String,
}

impl RuleViolation {
    fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self { rule, message: message.into() }
    }
}

type CheckFn = fn(&FieldValue, &CompiledRule) -> Result<(), RuleViolation>;

/// Registry of in-process validation checks, applied in a fixed declared
/// order so the first offending rule is deterministic.
///
/// The cross-reference check (`exists_in_items`) is the one validator with
/// an external dependency and lives in [`check_exists_in_items`]; the
/// pipeline runs it after the in-process checks pass.
pub struct ValidationRegistry {
    checks: Vec<(&'static str, CheckFn)>,
}

impl ValidationRegistry {
    pub fn builtin() -> Self {
        Self {
            checks: vec![
                ("required", check_required),
                ("enum", check_enum),
                ("regex", check_regex),
            ],
        }
    }

    /// Apply every in-process check against the value.
    ///
    /// An empty string on an optional column elides all rules.
    pub fn apply(&self, value: &FieldValue, rule: &CompiledRule) -> Result<(), RuleViolation> {
        if let FieldValue::Text(s) = value {
            if s.is_empty() && !rule.required {
                return Ok(());
            }
        }
        for (_, check) in &self.checks {
            check(value, rule)?;
        }
        Ok(())
    }
}

fn check_required(value: &FieldValue, rule: &CompiledRule) -> Result<(), RuleViolation> {
    if !rule.required {
        return Ok(());
    }

    let allow_zero = rule.allow_zero.unwrap_or(true);

    match value {
        FieldValue::Null => Err(RuleViolation::new("required", "is a required field")),
        FieldValue::Text(s) if s.trim().is_empty() => {
            Err(RuleViolation::new("required", "is a required field"))
        }
        FieldValue::Integer(0) if !allow_zero => Err(RuleViolation::new(
            "required",
            "is a required field and zero is not an allowed value",
        )),
        FieldValue::Decimal(d) if !allow_zero && d.is_zero() => Err(RuleViolation::new(
            "required",
            "is a required field and zero is not an allowed value",
        )),
        _ => Ok(()),
    }
}

fn check_enum(value: &FieldValue, rule: &CompiledRule) -> Result<(), RuleViolation> {
    if rule.enum_values.is_empty() {
        return Ok(());
    }

    let s = value.as_text().ok_or_else(|| {
        RuleViolation::new("enum", "value must be a string to be checked against an enum")
    })?;

    if rule.enum_values.iter().any(|allowed| allowed == s) {
        Ok(())
    } else {
        Err(RuleViolation::new(
            "enum",
            format!("value '{}' is not in the allowed list: {:?}", s, rule.enum_values),
        ))
    }
}

fn check_regex(value: &FieldValue, rule: &CompiledRule) -> Result<(), RuleViolation> {
    let re = match &rule.regex {
        Some(re) => re,
        None => return Ok(()),
    };

    let s = value.as_text().ok_or_else(|| {
        RuleViolation::new("regex", "value must be a string to be matched against a regex")
    })?;

    if re.is_match(s) {
        Ok(())
    } else {
        Err(RuleViolation::new(
            "regex",
            format!("value '{}' does not match pattern '{}'", s, re.as_str()),
        ))
    }
}

/// Cross-reference check: the value must already exist as a business key
/// of the configured item type. Empty strings are exempt.
///
/// This is the only validator that reads the persisted store. It sees
/// committed state only: rows a sibling job has classified but not yet
/// committed through its staging transaction are invisible here, so
/// concurrent jobs with a reference between them can order either way.
pub async fn check_exists_in_items(
    pool: &SqlitePool,
    value: &FieldValue,
    rule: &CompiledRule,
) -> Result<(), RuleViolation> {
    let item_type = match &rule.exists_in_items {
        Some(item_type) => item_type,
        None => return Ok(()),
    };

    let s = value.as_text().ok_or_else(|| {
        RuleViolation::new("exists_in_items", "can only validate string fields")
    })?;
    if s.is_empty() {
        return Ok(());
    }

    let exists: Result<bool, sqlx::Error> = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM items WHERE item_type = ? AND business_key = ?)",
    )
    .bind(item_type)
    .bind(s)
    .fetch_one(pool)
    .await;

    match exists {
        Ok(true) => Ok(()),
        Ok(false) => Err(RuleViolation::new(
            "exists_in_items",
            format!(
                "value '{}' does not exist as a business key for item type '{}'",
                s, item_type
            ),
        )),
        Err(e) => {
            error!(error = %e, "database error during exists_in_items validation");
            Err(RuleViolation::new(
                "exists_in_items",
                format!("database error checking existence of '{}'", s),
            ))
        }
    }
}
