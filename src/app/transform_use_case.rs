use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::pipeline::payload::PayloadReader;
use crate::pipeline::processing::tagging::format_field_tags;
use crate::pipeline::processing::{DataTransformer, TaggingSystem};
use crate::pipeline::runner::{FileProcessor, PipelineItem};
use crate::pipeline::stage_log::StageLogEntry;
use crate::types::Stage;

/// Processed payload in, tagged and transformed payload out in the
/// enriched directory.
pub struct TransformUseCase {
    tagging: Arc<TaggingSystem>,
    transformer: DataTransformer,
    reader: PayloadReader,
    output_dir: PathBuf,
}

impl TransformUseCase {
    pub fn new(tagging: Arc<TaggingSystem>, reader: PayloadReader, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let transformer = DataTransformer::new(tagging.transformations().clone())?;
        Ok(Self {
            tagging,
            transformer,
            reader,
            output_dir: output_dir.into(),
        })
    }
}

#[async_trait]
impl FileProcessor for TransformUseCase {
    fn stage(&self) -> Stage {
        Stage::Transformation
    }

    async fn process(&self, item: &PipelineItem) -> Result<StageLogEntry> {
        let mut payload = self.reader.read(&item.path)?;
        let records = payload.record_set();
        let input_rows = records.len();
        let input_columns = records.column_count();

        let field_tags = self.tagging.tag_fields(&records);
        let (transformed, transformations) = self.transformer.transform(records, &field_tags);

        let summary = transformations.summary();
        payload.replace_records(&transformed);
        payload.metadata.tag_descriptions = Some(self.tagging.descriptions_for(&field_tags));
        payload.metadata.field_tags = Some(field_tags.clone());
        payload.metadata.transformations = Some(transformations);
        payload.metadata.transformation_timestamp = Some(Utc::now());

        let output = payload.write_atomic(&self.output_dir, &payload.source_stem())?;
        fs::remove_file(&item.path)?;
        info!(
            "Transformed {} ({} columns tagged) into {}",
            item.filename(),
            field_tags.len(),
            output.display()
        );

        Ok(StageLogEntry::success(item.filename())
            .with("source_format", payload.metadata.source_format)
            .with("row_count", input_rows)
            .with("column_count", input_columns)
            .with("applied_tags", format_field_tags(&field_tags))
            .with("applied_transformations", summary)
            .with("output_path", output.display()))
    }

    fn failure_entry(&self, item: &PipelineItem, error: &EtlError) -> StageLogEntry {
        StageLogEntry::error(item.filename(), error)
            .with("source_format", "unknown")
            .with("row_count", 0)
            .with("column_count", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::payload::Payload;
    use crate::types::{RecordSet, SourceFormat};
    use serde_json::json;
    use tempfile::tempdir;

    const RULES: &str = r#"
semantic_tags:
  temporal:
    keywords: [date]
    data_types: [str]
  categorical:
    keywords: [region]
    data_types: [str]
  quantitative:
    keywords: [amount]
    data_types: [number]
transformations:
  date_standardization:
    applies_to_tags: [temporal]
    format: "%Y-%m-%d"
  one_hot_encoding:
    applies_to_tags: [categorical]
    max_categories: 5
  numeric_normalization:
    applies_to_tags: [quantitative]
    method: min-max
"#;

    #[tokio::test]
    async fn test_processed_payload_is_enriched() {
        let dir = tempdir().unwrap();
        let processed = dir.path().join("processed");
        let enriched = dir.path().join("enriched");

        let records = RecordSet::from_rows(vec![
            json!({"order_date": "01/05/2024", "region": "west", "amount": 100}).as_object().cloned().unwrap(),
            json!({"order_date": "2024-02-10", "region": "east", "amount": 300}).as_object().cloned().unwrap(),
            json!({"order_date": "2024-03-01", "region": "west", "amount": 500}).as_object().cloned().unwrap(),
        ]);
        let input = Payload::from_records(&records, "orders.csv", SourceFormat::Csv, Some("sum".into()))
            .write_atomic(&processed, "orders")
            .unwrap();

        let tagging = Arc::new(TaggingSystem::from_yaml_str(RULES).unwrap());
        let uc = TransformUseCase::new(tagging, PayloadReader::default(), &enriched).unwrap();
        let entry = uc
            .process(&PipelineItem::new(input.clone(), Stage::Transformation, 1))
            .await
            .unwrap();

        assert!(!input.exists());
        assert_eq!(entry.field("row_count"), Some("3"));
        assert_eq!(
            entry.field("applied_tags"),
            Some("amount:quantitative;order_date:temporal;region:categorical")
        );

        let out = PayloadReader::default().read(&enriched.join("orders.json")).unwrap();
        let set = out.record_set();
        assert_eq!(set.value(0, "order_date"), &json!("2024-01-05"));
        assert_eq!(set.value(1, "amount"), &json!(0.5));
        assert_eq!(set.value(1, "region_east"), &json!(true));
        assert!(!set.has_column("region"));
        assert_eq!(out.metadata.source_checksum.as_deref(), Some("sum"));
        let meta = out.metadata.transformations.unwrap();
        assert_eq!(meta.fragments().len(), 3);
        assert_eq!(meta.dropped_columns(), &["region".to_string()]);
        assert!(out.metadata.transformation_timestamp.is_some());
    }
}
