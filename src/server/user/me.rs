use axum::{Json, response::IntoResponse};

use crate::auth::RequireUser;
use crate::server::response::ApiResponse;

pub async fn get_me(auth: RequireUser) -> impl IntoResponse {
    Json(ApiResponse::success(auth.user))
}
