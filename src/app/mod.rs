pub mod extract_use_case;
pub mod load_use_case;
pub mod overrides;
pub mod ports;
pub mod transform_use_case;

pub use extract_use_case::ExtractUseCase;
pub use load_use_case::LoadUseCase;
pub use transform_use_case::TransformUseCase;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::infra;
use crate::pipeline::archive::Archiver;
use crate::pipeline::payload::PayloadReader;
use crate::pipeline::processing::{Extractor, Normalizer, TaggingSystem};
use crate::pipeline::runner::FileProcessor;
use crate::pipeline::PipelineContext;
use crate::types::Stage;
use overrides::TableOverrides;

/// Build the processor for `stage` from the process configuration.
/// Rule files and store connections are opened here, once.
pub fn build_processor(ctx: &PipelineContext, stage: Stage) -> Result<Arc<dyn FileProcessor>> {
    let config = &ctx.config;
    let extractor = Extractor::new(config.extraction.retain_outer_key);
    let normalizer = Normalizer::new(config.extraction.max_flatten_depth);
    let reader = PayloadReader::new(extractor.clone(), normalizer.clone());

    let processor: Arc<dyn FileProcessor> = match stage {
        Stage::Extraction => Arc::new(ExtractUseCase::new(extractor, normalizer, ctx.layout.output_for(stage))),
        Stage::Transformation => {
            let tagging = Arc::new(TaggingSystem::load(&config.tags_path)?);
            Arc::new(TransformUseCase::new(tagging, reader, ctx.layout.output_for(stage))?)
        }
        Stage::Loading => Arc::new(LoadUseCase::new(
            infra::build_table_store(&config.store)?,
            infra::build_load_ledger(&config.store)?,
            Archiver::new(ctx.layout.archived()),
            TableOverrides::load(&config.overrides_path)?,
            reader,
            Duration::from_secs(config.store.timeout_secs.max(1)),
        )),
    };
    Ok(processor)
}
