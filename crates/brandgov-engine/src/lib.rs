pub mod audit;
pub mod color_mapper;
pub mod compressor;
pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod router;

#[cfg(test)]
mod test_support;

use serde_json::{Map, Value};

pub use config::{CorrectionPolicy, PipelineConfig, TwinBudget};
pub use error::{
    CompressionError, ConfigurationError, GenerationFailed, IngestionError, ModelError,
    PipelineError,
};
pub use ingest::IngestionReport;
pub use pipeline::{BrandPipeline, SubmittedJob};
pub use retry::RetryPolicy;

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
