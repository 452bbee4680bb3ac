pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::cache::handlers as cache_handlers;
use crate::enhancement::handlers as enhancement_handlers;
use crate::quota::handlers as quota_handlers;
use crate::state::AppState;
use crate::submission::handlers as submission_handlers;

/// Multipart framing overhead allowed on top of the document size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Submissions
        .route(
            "/api/v1/submissions",
            get(submission_handlers::handle_list),
        )
        .route(
            "/api/v1/submissions/upload",
            post(submission_handlers::handle_upload)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD_BYTES)),
        )
        .route(
            "/api/v1/submissions/text",
            post(submission_handlers::handle_text),
        )
        .route(
            "/api/v1/submissions/:id",
            get(submission_handlers::handle_get),
        )
        // Transforms
        .route(
            "/api/v1/submissions/:id/transform",
            post(enhancement_handlers::handle_transform),
        )
        .route(
            "/api/v1/submissions/:id/versions",
            get(enhancement_handlers::handle_list_versions),
        )
        // Records
        .route(
            "/api/v1/records/:id",
            get(enhancement_handlers::handle_get_record),
        )
        .route(
            "/api/v1/records/:id/markdown",
            get(enhancement_handlers::handle_export_markdown),
        )
        .route(
            "/api/v1/records/:id/compare",
            get(enhancement_handlers::handle_export_comparison),
        )
        // Usage
        .route("/api/v1/usage", get(quota_handlers::handle_get_usage))
        .route(
            "/api/v1/usage/reset",
            post(quota_handlers::handle_reset_usage),
        )
        // Administration
        .route("/api/v1/cache", delete(cache_handlers::handle_invalidate))
        .with_state(state)
}
