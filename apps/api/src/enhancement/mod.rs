pub mod export;
pub mod fallback;
pub mod handlers;
pub mod pipeline;
pub mod request;

pub use pipeline::{EnhancementPipeline, PipelineSettings, ReusePolicy, SubmissionSource};
