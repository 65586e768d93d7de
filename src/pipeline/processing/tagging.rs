use super::transform::TransformationsConfig;
use crate::error::{EtlError, Result};
use crate::types::{RecordSet, ValueKind};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Column name to the tags assigned to it, tags in name order.
pub type FieldTags = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagRule {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Contents of the rules file (YAML or JSON).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default, alias = "tags")]
    pub semantic_tags: BTreeMap<String, TagRule>,
    #[serde(default)]
    pub transformations: TransformationsConfig,
}

/// Kinds accepted by a configured type alias.
pub fn kinds_for_type_name(name: &str) -> Option<&'static [ValueKind]> {
    use ValueKind::*;
    let kinds: &'static [ValueKind] = match name.trim().to_lowercase().as_str() {
        "str" | "string" | "object" | "text" => &[Text, Date, Timestamp],
        "date" => &[Date],
        "timestamp" | "datetime" | "datetime64" => &[Date, Timestamp],
        "int" | "int64" | "integer" => &[Int],
        "float" | "float64" | "double" => &[Float],
        "bool" | "boolean" => &[Bool],
        "number" | "numeric" => &[Int, Float],
        _ => return None,
    };
    Some(kinds)
}

#[derive(Debug, Clone)]
struct CompiledTag {
    keywords: Vec<String>,
    /// `None` means any kind is accepted.
    kinds: Option<BTreeSet<ValueKind>>,
    description: Option<String>,
}

impl CompiledTag {
    fn compile(name: &str, rule: &TagRule) -> Result<Self> {
        let keywords = rule
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let kinds = if rule.data_types.is_empty() {
            None
        } else {
            let mut kinds = BTreeSet::new();
            for type_name in &rule.data_types {
                let expanded = kinds_for_type_name(type_name).ok_or_else(|| {
                    EtlError::Config(format!("tag '{}' names unknown data type '{}'", name, type_name))
                })?;
                kinds.extend(expanded.iter().copied());
            }
            Some(kinds)
        };

        Ok(Self {
            keywords,
            kinds,
            description: rule.description.clone(),
        })
    }

    fn matches(&self, column: &str, kind: ValueKind) -> bool {
        let kind_ok = self.kinds.as_ref().map(|k| k.contains(&kind)).unwrap_or(true);
        kind_ok && self.keywords.iter().any(|k| column.contains(k.as_str()))
    }
}

/// Assigns semantic tags to columns from keyword and value-kind rules.
#[derive(Debug, Clone)]
pub struct TaggingSystem {
    tags: BTreeMap<String, CompiledTag>,
    transformations: TransformationsConfig,
}

impl TaggingSystem {
    /// Load rules from a `.yaml`, `.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("cannot read tag rules {}: {}", path.display(), e))
        })?;
        let rules: RulesFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => {
                return Err(EtlError::Config(format!(
                    "tag rules must be YAML or JSON: {}",
                    path.display()
                )))
            }
        };
        let system = Self::from_rules(rules)?;
        info!(
            "Loaded semantic tags [{}] from {}",
            system.tag_names().collect::<Vec<_>>().join(", "),
            path.display()
        );
        Ok(system)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::from_rules(serde_yaml::from_str(content)?)
    }

    pub fn from_rules(rules: RulesFile) -> Result<Self> {
        rules.transformations.validate()?;
        let tags = rules
            .semantic_tags
            .iter()
            .map(|(name, rule)| Ok((name.clone(), CompiledTag::compile(name, rule)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            tags,
            transformations: rules.transformations,
        })
    }

    pub fn transformations(&self) -> &TransformationsConfig {
        &self.transformations
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Tags for one column given the kind of its sampled value.
    pub fn tag_column(&self, column: &str, kind: ValueKind) -> Vec<String> {
        let lowered = column.to_lowercase();
        self.tags
            .iter()
            .filter(|(_, tag)| tag.matches(&lowered, kind))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Tag every column of a record set. Columns with no tag are absent.
    pub fn tag_fields(&self, records: &RecordSet) -> FieldTags {
        let mut assigned = FieldTags::new();
        for column in records.columns() {
            let kind = records.sampled_kind(column);
            let tags = self.tag_column(column, kind);
            if !tags.is_empty() {
                debug!("Column {} ({}) tagged {:?}", column, kind, tags);
                assigned.insert(column.clone(), tags);
            }
        }
        assigned
    }

    /// Descriptions of the tags that were actually assigned.
    pub fn descriptions_for(&self, assigned: &FieldTags) -> BTreeMap<String, String> {
        assigned
            .values()
            .flatten()
            .filter_map(|name| {
                self.tags
                    .get(name)
                    .and_then(|t| t.description.clone())
                    .map(|d| (name.clone(), d))
            })
            .collect()
    }
}

/// `col:tag,tag;col:tag` form used in the transformation log.
pub fn format_field_tags(assigned: &FieldTags) -> String {
    assigned
        .iter()
        .map(|(column, tags)| format!("{}:{}", column, tags.join(",")))
        .collect::<Vec<_>>()
        .join(";")
}
