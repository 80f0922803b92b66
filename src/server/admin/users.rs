use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::auth::RequireAdmin;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    CreateTokenResponse, CreateUserRequest, CreateUserTokenRequest, PaginationParams, TokenResponse,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, paginate,
};
use crate::service::normalize_email;
use crate::types::User;

pub async fn create_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let email = normalize_email(&req.email).map_err(ApiError::from)?;

    let existing_user = state
        .store
        .get_user_by_email(&email)
        .map_err(|_| ApiError::internal("Failed to check existing user"))?;

    if existing_user.is_some() {
        return Err(ApiError::conflict("User already exists for this email"));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        created_at: now,
        updated_at: now,
    };

    match state.store.create_user(&user) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict("User already exists for this email"));
        }
        Err(_) => return Err(ApiError::internal("Failed to create user")),
    }

    info!(user_id = %user.id, "Created user");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .map_err(|_| ApiError::internal("Failed to list users"))?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(users, next_cursor, has_more)))
}

pub async fn get_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .map_err(|_| ApiError::internal("Failed to get user"))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// Users who still own experiments cannot be deleted; shares and tokens
/// held by the user go with it.
pub async fn delete_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .map_err(|_| ApiError::internal("Failed to get user"))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let owned = state
        .store
        .list_owned_experiments(&user.id)
        .map_err(|_| ApiError::internal("Failed to check owned experiments"))?;

    if !owned.is_empty() {
        return Err(ApiError::conflict(format!(
            "User still owns {} experiment(s)",
            owned.len()
        )));
    }

    state
        .store
        .delete_user(&user.id)
        .map_err(|_| ApiError::internal("Failed to delete user"))?;

    info!(user_id = %user.id, "Deleted user");
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn list_user_tokens(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .map_err(|_| ApiError::internal("Failed to get user"))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let tokens = state
        .store
        .list_user_tokens(&user.id)
        .map_err(|_| ApiError::internal("Failed to list user tokens"))?;

    let responses: Vec<TokenResponse> = tokens.into_iter().map(TokenResponse::from).collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

pub async fn create_user_token(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateUserTokenRequest>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .map_err(|_| ApiError::internal("Failed to get user"))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if req.expires_in_seconds.is_some_and(|seconds| seconds < 0) {
        return Err(ApiError::bad_request(
            "expires_in_seconds cannot be negative",
        ));
    }

    let expires_at = req
        .expires_in_seconds
        .map(|s| Utc::now() + Duration::seconds(s));

    const MAX_RETRIES: u32 = 3;
    for _ in 0..MAX_RETRIES {
        let (token, raw_token) = state
            .tokens
            .issue(false, Some(user.id.clone()), expires_at)
            .map_err(|_| ApiError::internal("Failed to generate token"))?;

        match state.store.create_token(&token) {
            Ok(()) => {
                info!(user_id = %user.id, token_id = %token.id, "Issued user token");
                return Ok((
                    StatusCode::CREATED,
                    Json(ApiResponse::success(CreateTokenResponse {
                        token: raw_token,
                        metadata: token.into(),
                    })),
                ));
            }
            Err(Error::AlreadyExists) => continue,
            Err(_) => return Err(ApiError::internal("Failed to create token")),
        }
    }

    Err(ApiError::internal("Failed to create token after retries"))
}
