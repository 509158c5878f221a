use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::FileResponse,
    services::{self, Upload},
};
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/products/:id/files", get(list_files).post(upload_file))
        .route(
            "/products/:id/files/:file_id",
            get(get_file).put(replace_file).delete(delete_file),
        )
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// Reads the `file` field of a multipart body.
async fn read_upload(mut mp: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation("file", e.to_string()))?
    {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| AppError::validation("file", e.to_string()))?;
            return Ok(Upload { body, content_type });
        }
    }
    Err(AppError::validation("file", "No file was submitted."))
}

#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    Ok(Json(services::list(&state, product_id).await?))
}

#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path((product_id, id)): Path<(i64, i64)>,
) -> Result<Json<FileResponse>, AppError> {
    Ok(Json(services::get(&state, product_id, id).await?))
}

#[instrument(skip(state, mp))]
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(product_id): Path<i64>,
    mp: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), AppError> {
    caller.require_admin()?;
    let upload = read_upload(mp).await?;
    let file = services::attach(&state, &caller, product_id, upload).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

#[instrument(skip(state, mp))]
pub async fn replace_file(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((product_id, id)): Path<(i64, i64)>,
    mp: Multipart,
) -> Result<Json<FileResponse>, AppError> {
    caller.require_admin()?;
    let upload = read_upload(mp).await?;
    Ok(Json(services::replace(&state, &caller, product_id, id, upload).await?))
}

#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((product_id, id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    services::remove(&state, &caller, product_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
