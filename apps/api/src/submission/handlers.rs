use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::enhancement::SubmissionSource;
use crate::errors::AppError;
use crate::models::submission::Submission;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct TextSubmissionRequest {
    pub user_id: Uuid,
    pub text: String,
}

/// POST /api/v1/submissions/upload
///
/// Multipart form with a `user_id` text field and a `file` part.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let mut user_id: Option<Uuid> = None;
    let mut upload: Option<(Bytes, Option<String>, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("user_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid user_id field: {e}")))?;
                let parsed = Uuid::parse_str(raw.trim())
                    .map_err(|_| AppError::Validation("user_id must be a UUID".to_string()))?;
                user_id = Some(parsed);
            }
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid file field: {e}")))?;
                upload = Some((bytes, file_name, content_type));
            }
            _ => {}
        }
    }

    let user_id =
        user_id.ok_or_else(|| AppError::Validation("user_id field is required".to_string()))?;
    let (bytes, file_name, content_type) =
        upload.ok_or_else(|| AppError::Validation("Please select a file to upload".to_string()))?;

    let submission = state
        .pipeline
        .ingest(
            user_id,
            SubmissionSource::Upload {
                bytes,
                file_name,
                content_type,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// POST /api/v1/submissions/text
pub async fn handle_text(
    State(state): State<AppState>,
    Json(req): Json<TextSubmissionRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let submission = state
        .pipeline
        .ingest(req.user_id, SubmissionSource::Text(req.text))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /api/v1/submissions
pub async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<Submission>>, AppError> {
    Ok(Json(state.pipeline.list_submissions(params.user_id).await?))
}

/// GET /api/v1/submissions/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Submission>, AppError> {
    Ok(Json(state.pipeline.get_submission(id, params.user_id).await?))
}
