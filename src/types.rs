use crate::error::{EtlError, Result};
use crate::temporal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// One record: column name to scalar (or, before flattening, nested) value.
pub type Row = serde_json::Map<String, Value>;

/// Ordered rows sharing one column set. Rows may be sparse; a missing
/// column reads as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

static NULL: Value = Value::Null;

impl RecordSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a set whose column order is the order of first appearance.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn value<'a>(&'a self, row: usize, column: &str) -> &'a Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Every row's value for `column`, nulls included.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |r| r.get(column).unwrap_or(&NULL))
    }

    /// Kind of the first non-null value, `Null` when the column is empty.
    pub fn sampled_kind(&self, column: &str) -> ValueKind {
        self.column_values(column)
            .find(|v| !v.is_null())
            .map(ValueKind::of)
            .unwrap_or(ValueKind::Null)
    }

    /// Replace every value of an existing column.
    pub fn set_column(&mut self, column: &str, values: Vec<Value>) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(column.to_string(), value);
        }
    }

    /// Append a column at the end of the column order.
    pub fn push_column(&mut self, column: &str, values: Vec<Value>) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
        self.set_column(column, values);
    }

    pub fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        for row in &mut self.rows {
            row.remove(column);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        for c in self.columns.iter_mut() {
            if c == from {
                *c = to.to_string();
            }
        }
        for row in &mut self.rows {
            if let Some(v) = row.remove(from) {
                row.insert(to.to_string(), v);
            }
        }
    }

    /// Rows with every column present, missing cells filled with null.
    pub fn dense_rows(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|r| {
                self.columns
                    .iter()
                    .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Row>) {
        (self.columns, self.rows)
    }
}

/// Classification of a single value, independent of any dynamic runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Date,
    Timestamp,
    Text,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ValueKind::Int
                } else {
                    ValueKind::Float
                }
            }
            Value::String(s) => {
                if temporal::is_iso_date(s) {
                    ValueKind::Date
                } else if temporal::parse_timestamp(s).is_some() {
                    ValueKind::Timestamp
                } else {
                    ValueKind::Text
                }
            }
            Value::Array(_) | Value::Object(_) => ValueKind::Text,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Date => "date",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Text => "text",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format detected from a source file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Detect the format from the extension alone; no I/O happens here.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "json" => Ok(SourceFormat::Json),
            "" => Err(EtlError::UnsupportedFormat("(no extension)".to_string())),
            other => Err(EtlError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Json => "json",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Transformation,
    Loading,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Transformation => "transformation",
            Stage::Loading => "loading",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
