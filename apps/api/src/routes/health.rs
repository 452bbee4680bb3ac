use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Reports service version plus the reachability of optional collaborators.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "enhancer-api",
        "nlp_service_healthy": state.parser.healthy().await,
        "generator_available": state.pipeline.generator_available(),
        "cache_enabled": state.cache.is_enabled(),
        "quota_enabled": state.quota.is_enabled(),
    }))
}
