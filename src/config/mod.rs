//! Runtime configuration: the text-understanding service (`ai`) and the pipeline/sources (`pipeline`).

pub mod ai;
pub mod pipeline;

pub use ai::AiConfig;
pub use pipeline::{PipelineConfig, RetryPolicy};
