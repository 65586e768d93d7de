// Record processing: parsing, column normalization, tagging, transformation and schema inference

pub mod extract;
pub mod normalize;
pub mod schema;
pub mod tagging;
pub mod transform;

pub use extract::{Extraction, Extractor};
pub use normalize::Normalizer;
pub use schema::{ColumnType, SchemaInferrer, SchemaMapping};
pub use tagging::{FieldTags, TaggingSystem};
pub use transform::{DataTransformer, TransformationMetadata};
