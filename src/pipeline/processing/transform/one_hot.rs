use super::dates::reason_of;
use super::{matching_columns, OneHotConfig, PassFragment, PassKind, PassParameters};
use crate::error::EtlError;
use crate::pipeline::processing::tagging::FieldTags;
use crate::types::RecordSet;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Category label used in the indicator column name.
fn category_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace each matching low-cardinality column with one boolean column
/// per distinct value, named `{column}_{value}`, in sorted value order.
/// Values that differ only in JSON type (`"1"` and `1`) are distinct
/// categories; the later one's column gets a `_2` suffix.
pub fn one_hot_encode(records: &mut RecordSet, field_tags: &FieldTags, config: &OneHotConfig) -> PassFragment {
    let mut fragment = PassFragment::new(
        PassKind::OneHotEncoding,
        PassParameters {
            max_categories: Some(config.max_categories),
            ..Default::default()
        },
    );

    for column in matching_columns(records, field_tags, &config.applies_to_tags) {
        match encode_column(records, &column, config.max_categories) {
            Ok(indicators) => {
                for (name, values) in indicators {
                    records.push_column(&name, values);
                    fragment.new_columns.push(name);
                }
                records.drop_column(&column);
                debug!("One-hot encoded column {}", column);
                fragment.dropped_columns.push(column.clone());
                fragment.transformed_columns.push(column);
            }
            Err(e) => {
                warn!("{}", e);
                fragment.skip(&column, reason_of(e));
            }
        }
    }

    fragment
}

fn encode_column(
    records: &RecordSet,
    column: &str,
    max_categories: usize,
) -> Result<Vec<(String, Vec<Value>)>, EtlError> {
    let failure = |reason: String| EtlError::ColumnTransformFailure {
        pass: PassKind::OneHotEncoding.to_string(),
        column: column.to_string(),
        reason,
    };

    // (label, serialized value): sorted by label, distinct by JSON value
    let categories: BTreeSet<(String, String)> = records
        .column_values(column)
        .filter(|v| !v.is_null())
        .map(|v| (category_label(v), v.to_string()))
        .collect();

    if categories.is_empty() {
        return Err(failure("column has no values".to_string()));
    }
    if categories.len() > max_categories {
        return Err(failure(format!(
            "{} distinct values exceed max_categories {}",
            categories.len(),
            max_categories
        )));
    }

    let mut indicators = Vec::with_capacity(categories.len());
    let mut names = HashSet::new();
    for (label, serialized) in &categories {
        let base = format!("{}_{}", column, label);
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        if records.has_column(&name) {
            return Err(failure(format!("indicator column {} already exists", name)));
        }
        names.insert(name.clone());
        let values = records
            .column_values(column)
            .map(|v| Value::Bool(!v.is_null() && v.to_string() == *serialized))
            .collect();
        indicators.push((name, values));
    }
    Ok(indicators)
}
