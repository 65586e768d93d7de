use super::{matching_columns, DateStandardizationConfig, PassFragment, PassKind, PassParameters};
use crate::error::EtlError;
use crate::pipeline::processing::tagging::FieldTags;
use crate::temporal::parse_date_like;
use crate::types::RecordSet;
use serde_json::Value;
use tracing::{debug, warn};

/// Rewrite every value of each matching column in the target format.
/// A column with any unparseable value is left untouched.
pub fn standardize_dates(
    records: &mut RecordSet,
    field_tags: &FieldTags,
    config: &DateStandardizationConfig,
) -> PassFragment {
    let mut fragment = PassFragment::new(
        PassKind::DateStandardization,
        PassParameters {
            target_format: Some(config.format.clone()),
            ..Default::default()
        },
    );

    for column in matching_columns(records, field_tags, &config.applies_to_tags) {
        match standardize_column(records, &column, &config.format) {
            Ok(values) => {
                records.set_column(&column, values);
                debug!("Standardized dates in column {}", column);
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

fn standardize_column(records: &RecordSet, column: &str, format: &str) -> Result<Vec<Value>, EtlError> {
    let failure = |reason: String| EtlError::ColumnTransformFailure {
        pass: PassKind::DateStandardization.to_string(),
        column: column.to_string(),
        reason,
    };

    if records.column_values(column).all(Value::is_null) {
        return Err(failure("column has no values".to_string()));
    }

    records
        .column_values(column)
        .map(|value| match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => parse_date_like(s)
                .map(|dt| Value::String(dt.format(format).to_string()))
                .ok_or_else(|| failure(format!("'{}' is not a recognizable date", s))),
            other => Err(failure(format!("{} is not a date string", other))),
        })
        .collect()
}

pub(super) fn reason_of(e: EtlError) -> String {
    match e {
        EtlError::ColumnTransformFailure { reason, .. } => reason,
        other => other.to_string(),
    }
}
