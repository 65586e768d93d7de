use crate::error::{EtlError, Result};
use crate::idempotency::content_checksum;
use crate::pipeline::archive::unique_destination;
use crate::pipeline::processing::extract::Extractor;
use crate::pipeline::processing::normalize::Normalizer;
use crate::pipeline::processing::tagging::FieldTags;
use crate::pipeline::processing::transform::TransformationMetadata;
use crate::types::{RecordSet, Row, SourceFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub source_format: SourceFormat,
    pub row_count: usize,
    pub column_count: usize,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_tags: Option<FieldTags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_descriptions: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformations: Option<TransformationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_timestamp: Option<DateTime<Utc>>,
}

/// The intermediate file handed from one stage to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub metadata: PayloadMetadata,
    pub data: Vec<Row>,
}

impl Payload {
    pub fn from_records(
        records: &RecordSet,
        filename: impl Into<String>,
        source_format: SourceFormat,
        source_checksum: Option<String>,
    ) -> Self {
        Self {
            metadata: PayloadMetadata {
                filename: filename.into(),
                timestamp: Utc::now(),
                source_format,
                row_count: records.len(),
                column_count: records.column_count(),
                columns: records.columns().to_vec(),
                source_checksum,
                field_tags: None,
                tag_descriptions: None,
                transformations: None,
                transformation_timestamp: None,
            },
            data: records.dense_rows(),
        }
    }

    /// Replace the data with `records`, keeping and updating the metadata.
    pub fn replace_records(&mut self, records: &RecordSet) {
        self.metadata.row_count = records.len();
        self.metadata.column_count = records.column_count();
        self.metadata.columns = records.columns().to_vec();
        self.data = records.dense_rows();
    }

    /// Stem of the source file this payload came from. Output file names
    /// may carry a collision suffix; this never does.
    pub fn source_stem(&self) -> String {
        file_stem_of(Path::new(&self.metadata.filename))
    }

    pub fn record_set(&self) -> RecordSet {
        if self.metadata.columns.is_empty() {
            RecordSet::from_rows(self.data.clone())
        } else {
            RecordSet::new(self.metadata.columns.clone(), self.data.clone())
        }
    }

    /// Write `<dir>/<stem>.json` through a hidden temporary file in the same
    /// directory, so readers never see a partial file. An existing payload of
    /// the same name is never replaced; the new one gets a unique name.
    pub fn write_atomic(&self, dir: &Path, stem: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = unique_destination(dir, &format!("{}.json", stem));
        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        let content = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(path)
    }
}

/// Reads stage input files into payloads.
///
/// Files in the `{metadata, data}` envelope are taken as-is. Anything else
/// (a CSV, or bare JSON dropped straight into a later stage) is extracted
/// and normalized the way the extraction stage would have done it.
#[derive(Debug, Clone, Default)]
pub struct PayloadReader {
    extractor: Extractor,
    normalizer: Normalizer,
}

impl PayloadReader {
    pub fn new(extractor: Extractor, normalizer: Normalizer) -> Self {
        Self { extractor, normalizer }
    }

    pub fn read(&self, path: &Path) -> Result<Payload> {
        let filename = file_name_of(path);
        let format = SourceFormat::from_path(path)?;

        if format == SourceFormat::Json {
            let bytes = fs::read(path)?;
            let doc: Value = serde_json::from_slice(&bytes)
                .map_err(|e| EtlError::parse_failure(path.display().to_string(), e))?;
            if is_envelope(&doc) {
                let mut payload: Payload = serde_json::from_value(doc).map_err(|e| {
                    EtlError::parse_failure(path.display().to_string(), format!("malformed payload: {}", e))
                })?;
                if payload.metadata.source_checksum.is_none() {
                    payload.metadata.source_checksum = Some(content_checksum(&bytes));
                }
                return Ok(payload);
            }
        }

        debug!("{} is not a stage payload; extracting it directly", path.display());
        let extraction = self.extractor.extract(path)?;
        let records = self.normalizer.normalize(extraction.records);
        Ok(Payload::from_records(
            &records,
            filename,
            extraction.format,
            Some(extraction.checksum),
        ))
    }
}

fn is_envelope(doc: &Value) -> bool {
    doc.as_object()
        .map(|o| o.get("metadata").map(Value::is_object).unwrap_or(false) && o.contains_key("data"))
        .unwrap_or(false)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}
