use crate::error::{EtlError, Result};
use crate::pipeline::processing::schema::ColumnType;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct FieldOverride {
    pub name: String,
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableOverride {
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldOverride>,
}

/// Per-file table and field overrides, keyed by the input file stem:
///
/// ```yaml
/// customers_2024:
///   table_name: customers
///   fields:
///     cust_no: {name: customer_id, type: INTEGER}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TableOverrides {
    entries: BTreeMap<String, TableOverride>,
}

impl TableOverrides {
    /// Load overrides; a missing file means no overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let overrides = Self::from_yaml_str(&content)?;
        info!("Loaded table overrides for {} files from {}", overrides.entries.len(), path.display());
        Ok(overrides)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // A file holding only comments parses as null
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        let overrides: Self = serde_yaml::from_value(value)?;
        overrides.validate()?;
        Ok(overrides)
    }

    fn validate(&self) -> Result<()> {
        for (stem, entry) in &self.entries {
            for (field, field_override) in &entry.fields {
                if let Some(type_name) = &field_override.column_type {
                    ColumnType::parse(type_name).map_err(|e| {
                        EtlError::Config(format!("override {}.{}: {}", stem, field, e))
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn for_stem(&self, stem: &str) -> Option<&TableOverride> {
        self.entries.get(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_overrides() {
        let overrides = TableOverrides::from_yaml_str(
            "customers_2024:\n  table_name: customers\n  fields:\n    cust_no: {name: customer_id, type: INTEGER}\n",
        )
        .unwrap();
        let entry = overrides.for_stem("customers_2024").unwrap();
        assert_eq!(entry.table_name.as_deref(), Some("customers"));
        assert_eq!(entry.fields["cust_no"].name, "customer_id");
        assert!(overrides.for_stem("other").is_none());
    }

    #[test]
    fn test_missing_or_empty_file_means_none() {
        let dir = tempdir().unwrap();
        assert!(TableOverrides::load(&dir.path().join("nope.yaml")).unwrap().for_stem("x").is_none());
        assert!(TableOverrides::from_yaml_str("\n").is_ok());
        assert!(TableOverrides::from_yaml_str("# nothing yet\n").is_ok());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = TableOverrides::from_yaml_str("t:\n  fields:\n    a: {name: b, type: POINT}\n").unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
