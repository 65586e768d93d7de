use crate::constants::{self, MAX_VARCHAR_LENGTH};
use crate::error::{EtlError, Result};
use crate::types::{RecordSet, ValueKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").unwrap());
static VARCHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^varchar\((\d+)\)$").unwrap());

/// SQL column types produced by inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Date,
    Timestamp,
    Varchar(usize),
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "TEXT".to_string(),
        }
    }

    /// Parse a SQL type name as written in table overrides.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if let Some(caps) = VARCHAR.captures(trimmed) {
            let n: usize = caps[1]
                .parse()
                .map_err(|_| EtlError::Config(format!("bad VARCHAR length in '{}'", name)))?;
            return Ok(ColumnType::Varchar(n.max(1)));
        }
        match trimmed.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "INTEGER" | "INT" | "BIGINT" => Ok(ColumnType::Integer),
            "FLOAT" | "DOUBLE PRECISION" | "REAL" | "NUMERIC" => Ok(ColumnType::Float),
            "DATE" => Ok(ColumnType::Date),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            "TEXT" | "VARCHAR" => Ok(ColumnType::Text),
            _ => Err(EtlError::Config(format!("unknown column type '{}'", name))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Ordered column definitions for a target table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMapping {
    columns: Vec<ColumnSchema>,
}

impl SchemaMapping {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn set_type(&mut self, name: &str, column_type: ColumnType) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.column_type = column_type;
        }
    }

    /// This schema plus the audit columns every loaded table carries.
    pub fn with_audit_columns(&self) -> SchemaMapping {
        let mut columns = self.columns.clone();
        if self.get(constants::LOAD_STATUS_COLUMN).is_none() {
            columns.push(ColumnSchema {
                name: constants::LOAD_STATUS_COLUMN.to_string(),
                column_type: ColumnType::Varchar(50),
                nullable: true,
            });
        }
        if self.get(constants::LOAD_TIMESTAMP_COLUMN).is_none() {
            columns.push(ColumnSchema {
                name: constants::LOAD_TIMESTAMP_COLUMN.to_string(),
                column_type: ColumnType::Timestamp,
                nullable: true,
            });
        }
        SchemaMapping { columns }
    }
}

/// Infers a SQL type per column from every value in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaInferrer;

impl SchemaInferrer {
    pub fn infer(&self, records: &RecordSet) -> SchemaMapping {
        let columns = records
            .columns()
            .iter()
            .map(|column| infer_column(records, column))
            .collect();
        SchemaMapping { columns }
    }
}

fn infer_column(records: &RecordSet, column: &str) -> ColumnSchema {
    let mut kinds = BTreeSet::new();
    let mut nullable = false;
    let mut max_len = 0usize;

    for value in records.column_values(column) {
        let kind = ValueKind::of(value);
        match kind {
            ValueKind::Null => nullable = true,
            ValueKind::Text => {
                max_len = max_len.max(text_length(value));
                kinds.insert(kind);
            }
            other => {
                kinds.insert(other);
            }
        }
    }

    let column_type = if kinds.len() == 1 {
        match kinds.iter().next() {
            Some(ValueKind::Bool) => ColumnType::Boolean,
            Some(ValueKind::Int) => ColumnType::Integer,
            Some(ValueKind::Float) => ColumnType::Float,
            Some(ValueKind::Date) => ColumnType::Date,
            Some(ValueKind::Timestamp) => ColumnType::Timestamp,
            Some(ValueKind::Text) if max_len <= MAX_VARCHAR_LENGTH => ColumnType::Varchar(max_len.max(1)),
            _ => ColumnType::Text,
        }
    } else {
        // All-null columns and any disagreement between rows land on TEXT
        ColumnType::Text
    };

    ColumnSchema {
        name: column.to_string(),
        column_type,
        nullable: nullable || kinds.is_empty(),
    }
}

fn text_length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

/// Make a column or table name safe to use as an SQL identifier.
pub fn safe_identifier(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace([' ', '-'], "_");
    let mut safe = NON_WORD.replace_all(&lowered, "").to_string();
    if safe.is_empty() {
        safe = "column".to_string();
    }
    if safe.starts_with(|c: char| c.is_ascii_digit()) {
        safe = format!("_{}", safe);
    }
    if constants::is_reserved_word(&safe) {
        safe = format!("{}_field", safe);
    }
    safe
}

/// Rename every column to a safe, unique identifier. Returns the
/// original-to-safe mapping for columns that changed.
pub fn make_columns_safe(records: &mut RecordSet) -> Vec<(String, String)> {
    let mut used = HashSet::new();
    let mut plan = Vec::new();
    for column in records.columns() {
        let base = safe_identifier(column);
        let mut name = base.clone();
        let mut n = 1;
        while used.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        used.insert(name.clone());
        plan.push((column.clone(), name));
    }

    let mut changed = Vec::new();
    // Rename through temporary names so a swap between two columns cannot clobber either
    for (i, (from, to)) in plan.iter().enumerate() {
        if from != to {
            records.rename_column(from, &format!("\u{0}tmp{}", i));
        }
    }
    for (i, (from, to)) in plan.into_iter().enumerate() {
        if from != to {
            records.rename_column(&format!("\u{0}tmp{}", i), &to);
            changed.push((from, to));
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(rows: Value) -> RecordSet {
        RecordSet::from_rows(
            rows.as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_infers_each_type() {
        let set = records(json!([
            {"id": 1, "price": 2.5, "active": true, "day": "2024-01-05", "at": "2024-01-05T10:00:00", "name": "Ada"},
            {"id": 2, "price": 3.0, "active": false, "day": "2024-01-06", "at": "2024-01-06T11:00:00", "name": "Grace"}
        ]));
        let schema = SchemaInferrer.infer(&set);
        assert_eq!(schema.get("id").unwrap().column_type, ColumnType::Integer);
        assert_eq!(schema.get("price").unwrap().column_type, ColumnType::Float);
        assert_eq!(schema.get("active").unwrap().column_type, ColumnType::Boolean);
        assert_eq!(schema.get("day").unwrap().column_type, ColumnType::Date);
        assert_eq!(schema.get("at").unwrap().column_type, ColumnType::Timestamp);
        assert_eq!(schema.get("name").unwrap().column_type, ColumnType::Varchar(5));
        assert!(!schema.get("name").unwrap().nullable);
    }

    #[test]
    fn test_mixed_kinds_become_text() {
        let set = records(json!([{"code": 1}, {"code": "A7"}, {"n": 1}, {"n": 1.5}]));
        let schema = SchemaInferrer.infer(&set);
        assert_eq!(schema.get("code").unwrap().column_type, ColumnType::Text);
        assert_eq!(schema.get("n").unwrap().column_type, ColumnType::Text);
    }

    #[test]
    fn test_all_null_column_is_nullable_text() {
        let set = records(json!([{"a": null, "b": 1}, {"a": null, "b": null}]));
        let schema = SchemaInferrer.infer(&set);
        let a = schema.get("a").unwrap();
        assert_eq!(a.column_type, ColumnType::Text);
        assert!(a.nullable);
        assert!(schema.get("b").unwrap().nullable);
    }

    #[test]
    fn test_long_strings_are_text() {
        let long = "x".repeat(MAX_VARCHAR_LENGTH + 1);
        let set = records(json!([{"body": long}]));
        assert_eq!(SchemaInferrer.infer(&set).get("body").unwrap().column_type, ColumnType::Text);
    }

    #[test]
    fn test_safe_identifiers() {
        assert_eq!(safe_identifier("select"), "select_field");
        assert_eq!(safe_identifier("1st place"), "_1st_place");
        assert_eq!(safe_identifier("price ($)"), "price_");
        assert_eq!(safe_identifier("%%%"), "column");
        assert_eq!(safe_identifier("user_name"), "user_name");
    }

    #[test]
    fn test_make_columns_safe_renames_and_dedupes() {
        let mut set = records(json!([{"select": 1, "Order": 2, "order": 3}]));
        let changed = make_columns_safe(&mut set);
        assert_eq!(
            set.columns(),
            &["select_field".to_string(), "order_field".to_string(), "order_field_2".to_string()]
        );
        assert_eq!(set.value(0, "order_field_2"), &json!(3));
        assert_eq!(changed.len(), 3);
    }

    #[test]
    fn test_override_type_names() {
        assert_eq!(ColumnType::parse("varchar(20)").unwrap(), ColumnType::Varchar(20));
        assert_eq!(ColumnType::parse("text").unwrap(), ColumnType::Text);
        assert!(ColumnType::parse("geometry").is_err());
    }

    #[test]
    fn test_audit_columns_are_appended_once() {
        let schema = SchemaInferrer.infer(&records(json!([{"a": 1}])));
        let with_audit = schema.with_audit_columns().with_audit_columns();
        let names: Vec<&str> = with_audit.names().collect();
        assert_eq!(names, vec!["a", "load_status", "load_timestamp"]);
    }
}
