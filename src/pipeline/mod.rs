// File pipeline: stage directories, the runner loop, and the per-file processing steps

pub mod archive;
pub mod context;
pub mod payload;
pub mod processing;
pub mod runner;
pub mod stage_log;
pub mod watcher;

pub use context::{DataLayout, PipelineContext};
pub use payload::Payload;
pub use runner::{FileProcessor, PipelineItem, RunSummary, StageRunner};
pub use stage_log::{StageLogEntry, StageLogger};
