use crate::constants;
use crate::error::{EtlError, Result};
use crate::idempotency::content_checksum;
use crate::types::{RecordSet, Row, SourceFormat};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub records: RecordSet,
    pub format: SourceFormat,
    /// Hex SHA-256 of the file's bytes.
    pub checksum: String,
}

/// Parses CSV and JSON files into flat-ish record sets. Nested JSON values
/// are kept as-is here and flattened by the normalizer.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    retain_outer_key: bool,
}

impl Extractor {
    pub fn new(retain_outer_key: bool) -> Self {
        Self { retain_outer_key }
    }

    pub fn extract(&self, path: &Path) -> Result<Extraction> {
        // Format detection happens before the file is touched
        let format = SourceFormat::from_path(path)?;
        let display_path = path.display().to_string();
        let bytes = fs::read(path)?;
        let checksum = content_checksum(&bytes);

        info!("Extracting {} data from {}", format, display_path);
        let records = match format {
            SourceFormat::Csv => parse_csv(&bytes, &display_path)?,
            SourceFormat::Json => parse_json(&bytes, &display_path, self.retain_outer_key)?,
        };
        debug!(
            "Extracted {} rows / {} columns from {}",
            records.len(),
            records.column_count(),
            display_path
        );

        Ok(Extraction {
            records,
            format,
            checksum,
        })
    }
}

/// Parse CSV bytes into rows keyed by header, coercing cell text to typed values.
pub fn parse_csv(bytes: &[u8], path: &str) -> Result<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| EtlError::parse_failure(path, e))?
        .clone();
    let columns = unique_headers(headers.iter());

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EtlError::parse_failure(path, e))?;
        if record.len() > columns.len() {
            return Err(EtlError::parse_failure(
                path,
                format!(
                    "data row {} has {} fields but the header has {}",
                    line + 1,
                    record.len(),
                    columns.len()
                ),
            ));
        }
        let mut row = Row::new();
        for (i, column) in columns.iter().enumerate() {
            let value = record.get(i).map(coerce_csv_field).unwrap_or(Value::Null);
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }

    Ok(RecordSet::new(columns, rows))
}

fn unique_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for (i, header) in headers.enumerate() {
        let base = if header.trim().is_empty() {
            format!("column_{}", i)
        } else {
            header.to_string()
        };
        let mut name = base.clone();
        let mut n = 1;
        while !seen.insert(name.clone()) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        columns.push(name);
    }
    columns
}

const NA_VALUES: &[&str] = &["", "NA", "N/A", "n/a", "NULL", "null", "NaN", "nan", "None", "#N/A"];

/// Turn a CSV cell into a typed value: null markers, booleans, integers and
/// finite floats are recognised; everything else stays text.
pub fn coerce_csv_field(raw: &str) -> Value {
    let trimmed = raw.trim();
    if NA_VALUES.contains(&trimmed) {
        return Value::Null;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    if looks_numeric(trimmed) {
        if let Ok(f) = trimmed.parse::<f64>() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

// Rust's float parser accepts "inf" and "NaN"; spreadsheet text should not become numbers that way
fn looks_numeric(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Parse a JSON document into rows.
///
/// * array of objects: one row per element
/// * object whose every value is an object: one row per key
/// * any other object: a single row
pub fn parse_json(bytes: &[u8], path: &str, retain_outer_key: bool) -> Result<RecordSet> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| EtlError::parse_failure(path, e))?;

    let rows = match doc {
        Value::Array(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(map) => rows.push(map),
                    other => {
                        return Err(EtlError::unsupported_structure(
                            path,
                            format!("array element {} is {}, expected an object", i, json_kind(&other)),
                        ))
                    }
                }
            }
            rows
        }
        Value::Object(map) => {
            if map.values().all(|v| v.is_object()) {
                map.into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::Object(mut inner) => {
                            if retain_outer_key {
                                inner.insert(constants::OUTER_KEY_COLUMN.to_string(), Value::String(key));
                            }
                            Some(inner)
                        }
                        _ => None,
                    })
                    .collect()
            } else {
                vec![map]
            }
        }
        other => {
            return Err(EtlError::unsupported_structure(
                path,
                format!("top-level {} is not an object or array", json_kind(&other)),
            ))
        }
    };

    Ok(RecordSet::from_rows(rows))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
