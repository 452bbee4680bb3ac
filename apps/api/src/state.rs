use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::enhancement::EnhancementPipeline;
use crate::quota::QuotaTracker;
use crate::submission::parser::StructuredParser;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EnhancementPipeline>,
    /// Same cache the pipeline writes through; exposed for administrative invalidation.
    pub cache: ResponseCache,
    pub quota: QuotaTracker,
    /// Consulted by the health route only; parsing itself runs inside the pipeline.
    pub parser: Arc<dyn StructuredParser>,
}
