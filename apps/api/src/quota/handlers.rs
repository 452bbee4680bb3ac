use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::quota::UsageReport;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub message: String,
}

/// GET /api/v1/usage
pub async fn handle_get_usage(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<UsageReport>, AppError> {
    Ok(Json(state.quota.usage(params.user_id, Utc::now()).await))
}

/// POST /api/v1/usage/reset
pub async fn handle_reset_usage(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, AppError> {
    if !state.quota.is_enabled() {
        return Err(AppError::Validation(
            "Usage tracking is not enabled".to_string(),
        ));
    }
    state.quota.reset_all(req.user_id).await;
    info!("Reset daily usage for user {}", req.user_id);
    Ok(Json(ResetResponse {
        message: "Daily usage limits have been reset".to_string(),
    }))
}
