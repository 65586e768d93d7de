use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::NormalizationMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    DateStandardization,
    OneHotEncoding,
    NumericNormalization,
}

impl PassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PassKind::DateStandardization => "date_standardization",
            PassKind::OneHotEncoding => "one_hot_encoding",
            PassKind::NumericNormalization => "numeric_normalization",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedColumn {
    pub column: String,
    pub reason: String,
}

/// Statistics a normalization pass used for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
}

/// Parameters a pass ran with. Only the fields relevant to the pass are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_categories: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<NormalizationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub normalization_ranges: BTreeMap<String, ColumnStatistics>,
}

/// What one pass did to the record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassFragment {
    pub pass: PassKind,
    #[serde(default)]
    pub transformed_columns: Vec<String>,
    #[serde(default)]
    pub new_columns: Vec<String>,
    #[serde(default)]
    pub dropped_columns: Vec<String>,
    #[serde(default)]
    pub skipped_columns: Vec<SkippedColumn>,
    #[serde(default)]
    pub parameters: PassParameters,
}

impl PassFragment {
    pub fn new(pass: PassKind, parameters: PassParameters) -> Self {
        Self {
            pass,
            transformed_columns: Vec::new(),
            new_columns: Vec::new(),
            dropped_columns: Vec::new(),
            skipped_columns: Vec::new(),
            parameters,
        }
    }

    pub fn skip(&mut self, column: &str, reason: impl Into<String>) {
        self.skipped_columns.push(SkippedColumn {
            column: column.to_string(),
            reason: reason.into(),
        });
    }
}

/// Append-only record of every pass applied to one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationMetadata {
    #[serde(default)]
    applied_transformations: Vec<PassFragment>,
    #[serde(default)]
    new_columns: Vec<String>,
    #[serde(default)]
    dropped_columns: Vec<String>,
}

impl TransformationMetadata {
    pub fn record(&mut self, fragment: PassFragment) {
        self.new_columns.extend(fragment.new_columns.iter().cloned());
        self.dropped_columns
            .extend(fragment.dropped_columns.iter().cloned());
        self.applied_transformations.push(fragment);
    }

    pub fn fragments(&self) -> &[PassFragment] {
        &self.applied_transformations
    }

    pub fn fragment(&self, pass: PassKind) -> Option<&PassFragment> {
        self.applied_transformations.iter().find(|f| f.pass == pass)
    }

    pub fn new_columns(&self) -> &[String] {
        &self.new_columns
    }

    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped_columns
    }

    /// One-line form for the transformation log: `pass:col,col;pass:col`.
    pub fn summary(&self) -> String {
        self.applied_transformations
            .iter()
            .map(|f| format!("{}:{}", f.pass, f.transformed_columns.join(",")))
            .collect::<Vec<_>>()
            .join(";")
    }
}
