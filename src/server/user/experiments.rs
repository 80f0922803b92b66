use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::ListExperimentsParams;
use crate::server::response::{ApiError, ApiResponse};
use crate::service::{NewExperiment, run_detached};

pub async fn list_experiments(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListExperimentsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = params.into_filter()?;

    let experiments = state
        .service
        .list_visible_experiments(&auth.user, &filter)
        .await?;

    Ok(Json(ApiResponse::success(experiments)))
}

pub async fn create_experiment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewExperiment>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    let experiment =
        run_detached(async move { service.create_experiment(&auth.user, req).await }).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(experiment))))
}

pub async fn get_experiment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let experiment = state.service.get_experiment(&auth.user, &id).await?;

    Ok(Json(ApiResponse::success(experiment)))
}

pub async fn update_experiment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NewExperiment>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    let experiment =
        run_detached(async move { service.update_experiment(&auth.user, &id, req).await })
            .await?;

    Ok(Json(ApiResponse::success(experiment)))
}

pub async fn delete_experiment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = state.service.clone();

    run_detached(async move { service.delete_experiment(&auth.user, &id).await }).await?;

    Ok(StatusCode::NO_CONTENT)
}
