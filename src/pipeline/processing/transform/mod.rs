//! Tag-driven transformation passes.
//!
//! Passes run in a fixed order: dates, then one-hot encoding, then numeric
//! normalization. A pass absent from the configuration does not run. A
//! configured pass always records a fragment, even when it touched nothing.

pub mod dates;
pub mod metadata;
pub mod numeric;
pub mod one_hot;

pub use metadata::{ColumnStatistics, PassFragment, PassKind, PassParameters, SkippedColumn, TransformationMetadata};

use crate::error::{EtlError, Result};
use crate::pipeline::processing::tagging::FieldTags;
use crate::types::RecordSet;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_MAX_CATEGORIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DateStandardizationConfig {
    #[serde(default)]
    pub applies_to_tags: Vec<String>,
    #[serde(default = "default_date_format")]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OneHotConfig {
    #[serde(default)]
    pub applies_to_tags: Vec<String>,
    #[serde(default = "default_max_categories")]
    pub max_categories: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationMethod {
    #[default]
    #[serde(rename = "min-max", alias = "min_max", alias = "minmax")]
    MinMax,
    #[serde(rename = "z-score", alias = "z_score", alias = "zscore")]
    ZScore,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NumericNormalizationConfig {
    #[serde(default)]
    pub applies_to_tags: Vec<String>,
    #[serde(default)]
    pub method: NormalizationMethod,
    #[serde(default = "default_range")]
    pub range: [f64; 2],
}

/// The `transformations` section of the rules file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransformationsConfig {
    #[serde(default)]
    pub date_standardization: Option<DateStandardizationConfig>,
    #[serde(default)]
    pub one_hot_encoding: Option<OneHotConfig>,
    #[serde(default)]
    pub numeric_normalization: Option<NumericNormalizationConfig>,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_max_categories() -> usize {
    DEFAULT_MAX_CATEGORIES
}

fn default_range() -> [f64; 2] {
    [0.0, 1.0]
}

impl TransformationsConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(dates) = &self.date_standardization {
            if dates.format.is_empty()
                || StrftimeItems::new(&dates.format).any(|item| matches!(item, Item::Error))
            {
                return Err(EtlError::Config(format!(
                    "date_standardization.format '{}' is not a valid strftime pattern",
                    dates.format
                )));
            }
        }
        if let Some(one_hot) = &self.one_hot_encoding {
            if one_hot.max_categories == 0 {
                return Err(EtlError::Config(
                    "one_hot_encoding.max_categories must be at least 1".to_string(),
                ));
            }
        }
        if let Some(numeric) = &self.numeric_normalization {
            let [low, high] = numeric.range;
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(EtlError::Config(format!(
                    "numeric_normalization.range [{}, {}] must be finite and increasing",
                    low, high
                )));
            }
        }
        Ok(())
    }
}

/// Columns, in record order, carrying at least one of `tags`.
pub(crate) fn matching_columns(records: &RecordSet, field_tags: &FieldTags, tags: &[String]) -> Vec<String> {
    records
        .columns()
        .iter()
        .filter(|column| {
            field_tags
                .get(column.as_str())
                .map(|assigned| assigned.iter().any(|t| tags.contains(t)))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Runs the configured passes over a record set.
#[derive(Debug, Clone)]
pub struct DataTransformer {
    config: TransformationsConfig,
}

impl DataTransformer {
    pub fn new(config: TransformationsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TransformationsConfig {
        &self.config
    }

    pub fn transform(&self, records: RecordSet, field_tags: &FieldTags) -> (RecordSet, TransformationMetadata) {
        let mut records = records;
        let mut metadata = TransformationMetadata::default();

        if let Some(config) = &self.config.date_standardization {
            metadata.record(dates::standardize_dates(&mut records, field_tags, config));
        }
        if let Some(config) = &self.config.one_hot_encoding {
            metadata.record(one_hot::one_hot_encode(&mut records, field_tags, config));
        }
        if let Some(config) = &self.config.numeric_normalization {
            metadata.record(numeric::normalize_numeric(&mut records, field_tags, config));
        }

        (records, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(yaml: &str) -> TransformationsConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults_fill_in() {
        let config = rules(
            "date_standardization: {applies_to_tags: [temporal]}\n\
             one_hot_encoding: {applies_to_tags: [categorical]}\n\
             numeric_normalization: {applies_to_tags: [quantitative]}\n",
        );
        assert_eq!(config.date_standardization.unwrap().format, "%Y-%m-%d");
        assert_eq!(config.one_hot_encoding.unwrap().max_categories, 20);
        let numeric = config.numeric_normalization.unwrap();
        assert_eq!(numeric.method, NormalizationMethod::MinMax);
        assert_eq!(numeric.range, [0.0, 1.0]);
    }

    #[test]
    fn test_method_spellings() {
        let config = rules("numeric_normalization: {applies_to_tags: [q], method: z-score, range: [-1, 1]}\n");
        let numeric = config.numeric_normalization.unwrap();
        assert_eq!(numeric.method, NormalizationMethod::ZScore);
        assert_eq!(numeric.range, [-1.0, 1.0]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let bad_format = rules("date_standardization: {applies_to_tags: [t], format: \"%Q\"}\n");
        assert!(DataTransformer::new(bad_format).is_err());

        let bad_range = rules("numeric_normalization: {applies_to_tags: [q], range: [1, 0]}\n");
        assert!(DataTransformer::new(bad_range).is_err());
    }

    #[test]
    fn test_unconfigured_passes_do_not_run() {
        let transformer = DataTransformer::new(TransformationsConfig::default()).unwrap();
        let records = RecordSet::from_rows(vec![json!({"a": 1}).as_object().cloned().unwrap()]);
        let (out, meta) = transformer.transform(records.clone(), &FieldTags::new());
        assert_eq!(out, records);
        assert!(meta.fragments().is_empty());
    }

    #[test]
    fn test_configured_pass_always_records_a_fragment() {
        let transformer =
            DataTransformer::new(rules("one_hot_encoding: {applies_to_tags: [categorical]}\n")).unwrap();
        let records = RecordSet::from_rows(vec![json!({"a": 1}).as_object().cloned().unwrap()]);
        let (_, meta) = transformer.transform(records, &FieldTags::new());
        assert_eq!(meta.fragments().len(), 1);
        assert!(meta.fragments()[0].transformed_columns.is_empty());
    }
}
