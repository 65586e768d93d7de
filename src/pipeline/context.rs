use crate::config::Config;
use crate::constants;
use crate::error::Result;
use crate::pipeline::runner::{FileProcessor, StageRunner};
use crate::pipeline::stage_log::StageLogger;
use crate::types::Stage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The stage directories under one data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw(&self) -> PathBuf {
        self.root.join(constants::RAW_DIR)
    }

    pub fn processed(&self) -> PathBuf {
        self.root.join(constants::PROCESSED_DIR)
    }

    pub fn enriched(&self) -> PathBuf {
        self.root.join(constants::ENRICHED_DIR)
    }

    pub fn archived(&self) -> PathBuf {
        self.root.join(constants::ARCHIVED_DIR)
    }

    /// Directory a stage consumes from.
    pub fn input_for(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Extraction => self.raw(),
            Stage::Transformation => self.processed(),
            Stage::Loading => self.enriched(),
        }
    }

    /// Directory a stage's successful output lands in.
    pub fn output_for(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Extraction => self.processed(),
            Stage::Transformation => self.enriched(),
            Stage::Loading => self.archived(),
        }
    }

    pub fn ensure_all(&self) -> Result<()> {
        for dir in [self.raw(), self.processed(), self.enriched(), self.archived()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Process-wide settings and paths, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: Config,
    pub layout: DataLayout,
}

impl PipelineContext {
    pub fn new(config: Config) -> Self {
        let layout = DataLayout::new(&config.data_root);
        Self { config, layout }
    }

    pub fn stage_logger(&self, stage: Stage) -> StageLogger {
        StageLogger::for_stage(&self.config.logs_dir, stage)
    }

    pub fn runner(&self, processor: Arc<dyn FileProcessor>) -> StageRunner {
        let stage = processor.stage();
        StageRunner::new(
            self.layout.input_for(stage),
            processor,
            Arc::new(self.stage_logger(stage)),
            self.config.watcher.clone(),
        )
    }
}
