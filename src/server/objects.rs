use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::server::AppState;
use crate::server::response::ApiError;
use crate::storage::StorageError;

/// Object downloads. URLs handed out in experiment views point here and,
/// like a public bucket, need no token.
pub fn objects_router() -> Router<Arc<AppState>> {
    Router::new().route("/{*path}", get(download))
}

async fn download(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let handle = match state.objects.open(&path).await {
        Ok(handle) => handle,
        Err(StorageError::NotFound | StorageError::InvalidPath(_)) => {
            return ApiError::not_found("Object not found").into_response();
        }
        Err(e) => {
            warn!(path = %path, "Object storage error: {e}");
            return ApiError::bad_gateway("Object storage failure").into_response();
        }
    };

    let body = Body::from_stream(ReaderStream::new(handle.reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, handle.content_type)
        .header(header::CONTENT_LENGTH, handle.size)
        .header("X-Content-Type-Options", "nosniff")
        // Stored types come from uploaders; never render them inline.
        .header(header::CONTENT_DISPOSITION, "attachment")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
