use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::pipeline::payload::{file_stem_of, Payload};
use crate::pipeline::processing::{Extractor, Normalizer};
use crate::pipeline::runner::{FileProcessor, PipelineItem};
use crate::pipeline::stage_log::StageLogEntry;
use crate::types::{SourceFormat, Stage};

/// Raw file in, normalized payload out in the processed directory.
pub struct ExtractUseCase {
    extractor: Extractor,
    normalizer: Normalizer,
    output_dir: PathBuf,
}

impl ExtractUseCase {
    pub fn new(extractor: Extractor, normalizer: Normalizer, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            normalizer,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl FileProcessor for ExtractUseCase {
    fn stage(&self) -> Stage {
        Stage::Extraction
    }

    async fn process(&self, item: &PipelineItem) -> Result<StageLogEntry> {
        let extraction = self.extractor.extract(&item.path)?;
        let records = self.normalizer.normalize(extraction.records);

        let payload = Payload::from_records(
            &records,
            item.filename(),
            extraction.format,
            Some(extraction.checksum),
        );
        let output = payload.write_atomic(&self.output_dir, &file_stem_of(&item.path))?;

        // The output is in place; the raw file is consumed
        fs::remove_file(&item.path)?;
        info!(
            "Extracted {} rows from {} into {}",
            records.len(),
            item.filename(),
            output.display()
        );

        Ok(StageLogEntry::success(item.filename())
            .with("source_format", extraction.format)
            .with("row_count", records.len())
            .with("column_count", records.column_count())
            .with("output_path", output.display()))
    }

    fn failure_entry(&self, item: &PipelineItem, error: &EtlError) -> StageLogEntry {
        let format = SourceFormat::from_path(&item.path)
            .map(|f| f.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        StageLogEntry::error(item.filename(), error)
            .with("source_format", format)
            .with("row_count", 0)
            .with("column_count", 0)
    }
}
