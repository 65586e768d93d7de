use crate::types::{RecordSet, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]").unwrap());
static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// Snake-case a column name: separators become underscores, camel-case
/// boundaries get an underscore, then everything is lowercased.
pub fn normalize_name(name: &str) -> String {
    let separated = SEPARATORS.replace_all(name, "_");
    let split = CAMEL_BOUNDARY.replace_all(&separated, "${1}_${2}");
    split.to_lowercase()
}

/// Pick `base`, or `base_2`, `base_3`, ... if already taken.
fn unique_name(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Renames columns and flattens nested values so every cell is a scalar.
///
/// Running the normalizer on its own output changes nothing.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_depth: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

impl Normalizer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn normalize(&self, records: RecordSet) -> RecordSet {
        let mut records = rename_columns(records);

        for _ in 0..self.max_depth {
            let (next, expanded) = flatten_pass(records);
            records = next;
            if expanded == 0 {
                return records;
            }
        }

        // Depth bound reached: whatever is still nested gets stored as JSON text
        let leftover: Vec<String> = records
            .columns()
            .iter()
            .filter(|c| records.column_values(c).any(|v| v.is_object() || v.is_array()))
            .cloned()
            .collect();
        if !leftover.is_empty() {
            warn!(
                "Nesting deeper than {} levels in columns {:?}; storing them as JSON text",
                self.max_depth, leftover
            );
            for column in &leftover {
                let values = records.column_values(column).map(stringify_nested).collect();
                records.set_column(column, values);
            }
        }
        records
    }
}

fn rename_columns(records: RecordSet) -> RecordSet {
    let (columns, rows) = records.into_parts();
    let mut used = HashSet::new();
    let mut mapping = Vec::with_capacity(columns.len());
    for column in columns {
        let renamed = unique_name(&normalize_name(&column), &used);
        used.insert(renamed.clone());
        mapping.push((column, renamed));
    }

    let rows = rows
        .into_iter()
        .map(|mut row| {
            let mut out = Row::new();
            for (old, new) in &mapping {
                if let Some(value) = row.remove(old) {
                    out.insert(new.clone(), value);
                }
            }
            out
        })
        .collect();

    RecordSet::new(mapping.into_iter().map(|(_, new)| new).collect(), rows)
}

enum ColumnPlan {
    Keep(String),
    Expand {
        source: String,
        /// (sub-key in the source object, output column)
        fields: Vec<(String, String)>,
        /// Output column for non-object scalars found in the same column
        scalar: Option<String>,
    },
}

/// Expand every object-valued column one level and serialize lists.
/// Returns the new set and the number of columns expanded.
fn flatten_pass(records: RecordSet) -> (RecordSet, usize) {
    let (columns, rows) = records.into_parts();

    let nested: Vec<bool> = columns
        .iter()
        .map(|c| rows.iter().any(|r| matches!(r.get(c), Some(Value::Object(_)))))
        .collect();

    // Kept names are fixed; expanded names are fitted around them
    let mut used: HashSet<String> = columns
        .iter()
        .zip(&nested)
        .filter(|(_, n)| !**n)
        .map(|(c, _)| c.clone())
        .collect();

    let mut plans = Vec::with_capacity(columns.len());
    let mut expanded = 0;
    for (column, is_nested) in columns.into_iter().zip(nested) {
        if !is_nested {
            plans.push(ColumnPlan::Keep(column));
            continue;
        }
        expanded += 1;

        let mut sub_keys: Vec<String> = Vec::new();
        let mut has_scalar = false;
        for row in &rows {
            match row.get(&column) {
                Some(Value::Object(map)) => {
                    for key in map.keys() {
                        if !sub_keys.contains(key) {
                            sub_keys.push(key.clone());
                        }
                    }
                }
                Some(Value::Null) | None => {}
                Some(_) => has_scalar = true,
            }
        }

        let mut fields = Vec::with_capacity(sub_keys.len());
        for key in sub_keys {
            let name = unique_name(&format!("{}_{}", column, normalize_name(&key)), &used);
            used.insert(name.clone());
            fields.push((key, name));
        }
        let scalar = has_scalar.then(|| {
            let name = unique_name(&format!("{}_value", column), &used);
            used.insert(name.clone());
            name
        });
        plans.push(ColumnPlan::Expand {
            source: column,
            fields,
            scalar,
        });
    }

    let mut out_columns = Vec::new();
    for plan in &plans {
        match plan {
            ColumnPlan::Keep(c) => out_columns.push(c.clone()),
            ColumnPlan::Expand { fields, scalar, .. } => {
                out_columns.extend(fields.iter().map(|(_, name)| name.clone()));
                out_columns.extend(scalar.iter().cloned());
            }
        }
    }

    let out_rows = rows
        .into_iter()
        .map(|mut row| {
            let mut out = Row::new();
            for plan in &plans {
                match plan {
                    ColumnPlan::Keep(c) => {
                        if let Some(value) = row.remove(c) {
                            out.insert(c.clone(), stringify_list(value));
                        }
                    }
                    ColumnPlan::Expand {
                        source,
                        fields,
                        scalar,
                    } => {
                        let value = row.remove(source).unwrap_or(Value::Null);
                        let (mut map, leftover) = match value {
                            Value::Object(map) => (map, Value::Null),
                            other => (Row::new(), other),
                        };
                        for (key, name) in fields {
                            out.insert(name.clone(), map.remove(key).unwrap_or(Value::Null));
                        }
                        if let Some(name) = scalar {
                            out.insert(name.clone(), stringify_list(leftover));
                        }
                    }
                }
            }
            out
        })
        .collect();

    (RecordSet::new(out_columns, out_rows), expanded)
}

fn stringify_list(value: Value) -> Value {
    match value {
        Value::Array(_) => Value::String(value.to_string()),
        other => other,
    }
}

fn stringify_nested(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}
