use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse};
use crate::service::{FileUpload, run_detached};
use crate::types::FileKind;

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError {
        status: e.status(),
        message: format!("Failed to read upload: {}", e.body_text()),
    }
}

/// Reads the `file` field of an upload form; other fields are ignored.
async fn read_file_field(multipart: &mut Multipart) -> Result<FileUpload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        return Ok(FileUpload {
            filename,
            content_type,
            data,
        });
    }

    Err(ApiError::bad_request("File field is required"))
}

pub async fn upload_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, kind)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let kind: FileKind = kind.parse().map_err(ApiError::bad_request)?;
    let upload = read_file_field(&mut multipart).await?;
    let service = state.service.clone();

    let file = run_detached(async move {
        service.upload_file(&auth.user, &id, kind, upload).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(file))))
}

pub async fn delete_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, kind, file_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: FileKind = kind.parse().map_err(ApiError::bad_request)?;
    let service = state.service.clone();

    run_detached(async move {
        service
            .delete_file(&auth.user, &id, kind, &file_id)
            .await
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
