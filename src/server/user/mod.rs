mod experiments;
mod files;
mod me;
mod shares;
mod tags;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::server::AppState;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(me::get_me))
        // Experiments
        .route("/experiments", get(experiments::list_experiments))
        .route("/experiments", post(experiments::create_experiment))
        .route("/experiments/{id}", get(experiments::get_experiment))
        .route("/experiments/{id}", put(experiments::update_experiment))
        .route("/experiments/{id}", delete(experiments::delete_experiment))
        // Attached files; kind is "protocol" or "data"
        .route("/experiments/{id}/files/{kind}", post(files::upload_file))
        .route(
            "/experiments/{id}/files/{kind}/{file_id}",
            delete(files::delete_file),
        )
        // Shares
        .route("/experiments/{id}/shares", get(shares::list_shares))
        .route("/experiments/{id}/shares", post(shares::share_experiment))
        .route(
            "/experiments/{id}/shares/{user_id}",
            patch(shares::update_share),
        )
        .route(
            "/experiments/{id}/shares/{user_id}",
            delete(shares::revoke_share),
        )
        // Tags
        .route("/tags", get(tags::list_tags))
        .route("/tags", post(tags::create_tag))
}
