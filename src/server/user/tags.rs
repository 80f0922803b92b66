use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::CreateTagRequest;
use crate::server::response::{ApiError, ApiResponse};
use crate::service::run_detached;

pub async fn list_tags(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let tags = state.service.list_tags_for_user(&auth.user).await?;

    Ok(Json(ApiResponse::success(tags)))
}

/// Returns the caller's tag with this name, creating it first if needed.
pub async fn create_tag(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    let (tag, created) = run_detached(async move {
        service
            .create_or_get_tag(&auth.user, &req.name, req.category, req.color.as_deref())
            .await
    })
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(ApiResponse::success(tag))))
}
