//! Delimited file intake and row repair
//!
//! Reads the header row into a name→index map, then hands each data row
//! through repair (rejoining fields split by an unescaped delimiter
//! inside a text field) and blank detection before processing.

use crate::config_loader::CompiledConfig;
use csv::ReaderBuilder;
use std::collections::HashMap;
use tally_common::{Error, Result};

/// Delimiter used for parsing and for rejoining merged excess fields
pub const DELIMITER: char = ',';

/// A parsed file: trimmed headers, header→index map, and all data rows
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub header_index: HashMap<String, usize>,
    pub records: Vec<Vec<String>>,
}

/// Read an entire delimited file. Rows are kept at whatever width they
/// arrive with; width handling is the caller's concern via [`repair_row`].
pub fn read_file(bytes: &[u8]) -> Result<ParsedFile> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = reader.records();

    let header_record = match rows.next() {
        Some(record) => record.map_err(|e| {
            Error::InvalidInput(format!("error reading header row: {}", e))
        })?,
        None => return Err(Error::InvalidInput("file has no header row".to_string())),
    };

    let headers: Vec<String> = header_record.iter().map(|h| h.trim().to_string()).collect();
    let header_index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.clone(), i))
        .collect();

    let mut records = Vec::new();
    for record in rows {
        let record = record.map_err(|e| {
            Error::InvalidInput(format!("failed to read delimited records: {}", e))
        })?;
        records.push(record.iter().map(|f| f.to_string()).collect());
    }

    Ok(ParsedFile { headers, header_index, records })
}

/// Check that every header the config maps is present in the file.
/// A missing header fails the whole job before any row is processed.
pub fn check_headers(config: &CompiledConfig, header_index: &HashMap<String, usize>) -> Result<()> {
    for column in &config.columns {
        if !header_index.contains_key(&column.csv_header) {
            return Err(Error::Config(format!(
                "file is missing required header '{}'",
                column.csv_header
            )));
        }
    }
    Ok(())
}

/// Index of the column marked `merge_excess_fields`, if any
pub fn merge_column_index(
    config: &CompiledConfig,
    header_index: &HashMap<String, usize>,
) -> Option<usize> {
    config
        .columns
        .iter()
        .find(|c| c.merge_excess_fields)
        .and_then(|c| header_index.get(&c.csv_header).copied())
}

/// Repair a row that is wider than the header by rejoining the extra
/// fields immediately following the merge column back into one field.
///
/// Rows at or under header width, or files without a merge column, pass
/// through untouched; width mismatches that survive repair are the
/// caller's to triage.
pub fn repair_row(record: Vec<String>, num_headers: usize, merge_index: Option<usize>) -> Vec<String> {
    let merge_index = match merge_index {
        Some(i) if record.len() > num_headers => i,
        _ => return record,
    };

    let num_extra = record.len() - num_headers;
    let end_of_merge = merge_index + num_extra;
    if end_of_merge >= record.len() {
        return record;
    }

    let rejoined = record[merge_index..=end_of_merge].join(&DELIMITER.to_string());

    let mut repaired = Vec::with_capacity(num_headers);
    repaired.extend_from_slice(&record[..merge_index]);
    repaired.push(rejoined);
    repaired.extend_from_slice(&record[end_of_merge + 1..]);
    repaired
}

/// A row all of whose fields are empty or whitespace; discarded and
/// counted separately from triage
pub fn is_row_blank(record: &[String]) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// Header→raw-value map preserving the row exactly as it arrived; this is
/// what triage stores regardless of later correction
pub fn original_record_map(record: &[String], headers: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (i, header) in headers.iter().enumerate() {
        let value = record.get(i).cloned().unwrap_or_default();
        map.insert(header.clone(), serde_json::Value::String(value));
    }
    serde_json::Value::Object(map)
}
