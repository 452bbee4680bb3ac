use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::enhancement::export::RecordExport;
use crate::enhancement::request::TransformRequest;
use crate::errors::AppError;
use crate::models::enhancement::EnhancementRecord;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

/// POST /api/v1/submissions/:id/transform
pub async fn handle_transform(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut req): Json<TransformRequest>,
) -> Result<Json<EnhancementRecord>, AppError> {
    req.submission_id = id;
    let record = state.pipeline.request_transform(req).await?;
    Ok(Json(record))
}

/// GET /api/v1/submissions/:id/versions
pub async fn handle_list_versions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<EnhancementRecord>>, AppError> {
    let versions = state.pipeline.list_versions(id, params.user_id).await?;
    Ok(Json(versions))
}

/// GET /api/v1/records/:id
pub async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<EnhancementRecord>, AppError> {
    let record = state.pipeline.get_record(id, params.user_id).await?;
    Ok(Json(record))
}

/// GET /api/v1/records/:id/markdown
pub async fn handle_export_markdown(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<RecordExport, AppError> {
    state.pipeline.export_markdown(id, params.user_id).await
}

/// GET /api/v1/records/:id/compare
pub async fn handle_export_comparison(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<RecordExport, AppError> {
    state.pipeline.export_comparison(id, params.user_id).await
}
