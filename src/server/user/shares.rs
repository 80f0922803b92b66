use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{ShareRequest, UpdateShareRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::service::run_detached;

pub async fn list_shares(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let shares = state.service.list_shares(&auth.user, &id).await?;

    Ok(Json(ApiResponse::success(shares)))
}

/// Re-sharing with the same user changes the level of the existing share.
pub async fn share_experiment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    let share = run_detached(async move {
        service
            .share_experiment(&auth.user, &id, &req.user, req.permission_level)
            .await
    })
    .await?;

    Ok(Json(ApiResponse::success(share)))
}

pub async fn update_share(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
    Json(req): Json<UpdateShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    let share = run_detached(async move {
        service
            .update_share_permission(&auth.user, &id, &user_id, req.permission_level)
            .await
    })
    .await?;

    Ok(Json(ApiResponse::success(share)))
}

pub async fn revoke_share(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    run_detached(async move { service.revoke_share(&auth.user, &id, &user_id).await }).await?;

    Ok(StatusCode::NO_CONTENT)
}
