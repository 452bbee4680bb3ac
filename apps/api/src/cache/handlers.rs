use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct InvalidateQuery {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub enabled: bool,
    pub removed: u64,
}

/// DELETE /api/v1/cache?prefix=
pub async fn handle_invalidate(
    State(state): State<AppState>,
    Query(params): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>, AppError> {
    if params.prefix.contains(char::is_whitespace) {
        return Err(AppError::Validation(
            "prefix must not contain whitespace".to_string(),
        ));
    }
    let removed = state.cache.invalidate(&params.prefix).await;
    info!(
        "Cache invalidation for prefix '{}' removed {removed} entries",
        params.prefix
    );
    Ok(Json(InvalidateResponse {
        enabled: state.cache.is_enabled(),
        removed,
    }))
}
