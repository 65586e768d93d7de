use super::dates::reason_of;
use super::{
    matching_columns, ColumnStatistics, NormalizationMethod, NumericNormalizationConfig, PassFragment,
    PassKind, PassParameters,
};
use crate::error::EtlError;
use crate::pipeline::processing::tagging::FieldTags;
use crate::types::RecordSet;
use serde_json::Value;
use tracing::{debug, warn};

/// Rescale every matching all-numeric column, by min-max into the configured
/// range or by z-score with the sample standard deviation.
pub fn normalize_numeric(
    records: &mut RecordSet,
    field_tags: &FieldTags,
    config: &NumericNormalizationConfig,
) -> PassFragment {
    let mut fragment = PassFragment::new(
        PassKind::NumericNormalization,
        PassParameters {
            method: Some(config.method),
            target_range: Some(config.range),
            ..Default::default()
        },
    );

    for column in matching_columns(records, field_tags, &config.applies_to_tags) {
        match normalize_column(records, &column, config) {
            Ok((values, stats)) => {
                records.set_column(&column, values);
                debug!("Normalized column {} ({:?})", column, config.method);
                fragment
                    .parameters
                    .normalization_ranges
                    .insert(column.clone(), stats);
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

fn normalize_column(
    records: &RecordSet,
    column: &str,
    config: &NumericNormalizationConfig,
) -> Result<(Vec<Value>, ColumnStatistics), EtlError> {
    let failure = |reason: &str| EtlError::ColumnTransformFailure {
        pass: PassKind::NumericNormalization.to_string(),
        column: column.to_string(),
        reason: reason.to_string(),
    };

    let cells: Vec<Option<f64>> = records
        .column_values(column)
        .map(|v| match v {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_f64().map(Some).ok_or(()),
            _ => Err(()),
        })
        .collect::<Result<_, ()>>()
        .map_err(|_| failure("column has non-numeric values"))?;

    let present: Vec<f64> = cells.iter().flatten().copied().collect();
    if present.is_empty() {
        return Err(failure("column has no values"));
    }

    match config.method {
        NormalizationMethod::MinMax => {
            let min = present.iter().copied().fold(f64::INFINITY, f64::min);
            let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max == min {
                return Err(failure("constant column cannot be min-max scaled"));
            }
            let [low, high] = config.range;
            let values = apply(&cells, |x| (x - min) / (max - min) * (high - low) + low);
            let stats = ColumnStatistics {
                original_range: Some([min, max]),
                mean: None,
                std: None,
            };
            Ok((values, stats))
        }
        NormalizationMethod::ZScore => {
            if present.len() < 2 {
                return Err(failure("standard deviation is undefined for a single value"));
            }
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let variance = present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std = variance.sqrt();
            if std == 0.0 || !std.is_finite() {
                return Err(failure("standard deviation is zero"));
            }
            let values = apply(&cells, |x| (x - mean) / std);
            let stats = ColumnStatistics {
                original_range: None,
                mean: Some(mean),
                std: Some(std),
            };
            Ok((values, stats))
        }
    }
}

fn apply(cells: &[Option<f64>], f: impl Fn(f64) -> f64) -> Vec<Value> {
    cells
        .iter()
        .map(|cell| match cell {
            Some(x) => Value::from(f(*x)),
            None => Value::Null,
        })
        .collect()
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

    fn quantitative(column: &str) -> FieldTags {
        [(column.to_string(), vec!["quantitative".to_string()])].into_iter().collect()
    }

    fn config(method: NormalizationMethod) -> NumericNormalizationConfig {
        NumericNormalizationConfig {
            applies_to_tags: vec!["quantitative".to_string()],
            method,
            range: [0.0, 1.0],
        }
    }

    #[test]
    fn test_min_max_scales_into_range() {
        let mut set = records(json!([{"amount": 100}, {"amount": 300}, {"amount": 500}]));
        let fragment = normalize_numeric(&mut set, &quantitative("amount"), &config(NormalizationMethod::MinMax));

        assert_eq!(set.value(0, "amount"), &json!(0.0));
        assert_eq!(set.value(1, "amount"), &json!(0.5));
        assert_eq!(set.value(2, "amount"), &json!(1.0));
        let stats = &fragment.parameters.normalization_ranges["amount"];
        assert_eq!(stats.original_range, Some([100.0, 500.0]));
    }

    #[test]
    fn test_min_max_into_custom_range_keeps_nulls() {
        let mut set = records(json!([{"v": 0}, {"v": null}, {"v": 10}]));
        let mut cfg = config(NormalizationMethod::MinMax);
        cfg.range = [-1.0, 1.0];
        normalize_numeric(&mut set, &quantitative("v"), &cfg);
        assert_eq!(set.value(0, "v"), &json!(-1.0));
        assert_eq!(set.value(1, "v"), &Value::Null);
        assert_eq!(set.value(2, "v"), &json!(1.0));
    }

    #[test]
    fn test_constant_column_is_skipped_unchanged() {
        let mut set = records(json!([{"amount": 7}, {"amount": 7}]));
        let fragment = normalize_numeric(&mut set, &quantitative("amount"), &config(NormalizationMethod::MinMax));
        assert!(fragment.transformed_columns.is_empty());
        assert_eq!(fragment.skipped_columns[0].column, "amount");
        assert_eq!(set.value(0, "amount"), &json!(7));

        let fragment = normalize_numeric(&mut set, &quantitative("amount"), &config(NormalizationMethod::ZScore));
        assert_eq!(fragment.skipped_columns.len(), 1);
    }

    #[test]
    fn test_z_score_uses_sample_deviation() {
        let mut set = records(json!([{"x": 1}, {"x": 2}, {"x": 3}]));
        let fragment = normalize_numeric(&mut set, &quantitative("x"), &config(NormalizationMethod::ZScore));
        // mean 2, sample std 1
        assert_eq!(set.value(0, "x"), &json!(-1.0));
        assert_eq!(set.value(1, "x"), &json!(0.0));
        assert_eq!(set.value(2, "x"), &json!(1.0));
        assert_eq!(fragment.parameters.normalization_ranges["x"].std, Some(1.0));
    }

    #[test]
    fn test_non_numeric_column_is_skipped() {
        let mut set = records(json!([{"price": 3}, {"price": "n/a"}]));
        let fragment = normalize_numeric(&mut set, &quantitative("price"), &config(NormalizationMethod::MinMax));
        assert!(fragment.transformed_columns.is_empty());
        assert_eq!(set.value(1, "price"), &json!("n/a"));
    }
}
