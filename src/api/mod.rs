//! Admin HTTP surface.
//!
//! Route handlers stay thin: decode the request, call the store or the
//! lifecycle engine, map the shared error taxonomy onto HTTP statuses.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use pan_bagnat_common::Error;

use crate::config::Config;
use crate::lifecycle::ModuleEngine;
use crate::store::Store;
use crate::ws::WsRegistry;

pub mod docker;
pub mod fs;
pub mod git;
pub mod modules;
pub mod ssh_keys;

// ── Shared application state ─────────────────────────────────────────

pub struct AppState {
    pub store: Store,
    pub engine: ModuleEngine,
    pub registry: Arc<WsRegistry>,
    pub config: Arc<Config>,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ───────────────────────────────────────────────────

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self.0);
            // Internals are logged, never leaked to the caller.
            return (
                status,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response();
        }
        (
            status,
            Json(serde_json::json!({"error": self.0.to_string()})),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Router ───────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/admin/modules",
            get(modules::list_modules).post(modules::create_module),
        )
        .route(
            "/admin/modules/{id}",
            get(modules::get_module)
                .patch(modules::patch_module)
                .delete(modules::delete_module),
        )
        .route("/admin/modules/{id}/clone", post(modules::clone_module))
        .route("/admin/modules/{id}/deploy", post(modules::deploy_module))
        .route("/admin/modules/{id}/cleanup", post(modules::cleanup_module))
        .route("/admin/modules/{id}/logs", get(modules::list_logs))
        .route(
            "/admin/modules/{id}/access-token",
            post(modules::access_token),
        )
        .route(
            "/admin/modules/{id}/pages",
            get(modules::list_pages).post(modules::create_page),
        )
        .route(
            "/admin/pages/{slug}",
            axum::routing::patch(modules::patch_page).delete(modules::delete_page),
        )
        .route("/admin/modules/{id}/git/status", get(git::status))
        .route("/admin/modules/{id}/git/pull", post(git::pull))
        .route("/admin/modules/{id}/git/fetch", post(git::fetch))
        .route("/admin/modules/{id}/git/checkout", post(git::checkout))
        .route(
            "/admin/modules/{id}/git/branch",
            post(git::create_branch).delete(git::delete_branch),
        )
        .route(
            "/admin/modules/{id}/git/merge/continue",
            post(git::merge_continue),
        )
        .route(
            "/admin/modules/{id}/git/merge/abort",
            post(git::merge_abort),
        )
        .route(
            "/admin/modules/{id}/git/checkout-file",
            post(git::checkout_file),
        )
        .route("/admin/modules/{id}/git/resolve", post(git::resolve))
        .route("/admin/modules/{id}/git/commits", get(git::list_commits))
        .route(
            "/admin/modules/{id}/docker/containers",
            get(docker::list_containers),
        )
        .route(
            "/admin/modules/{id}/docker/containers/{service}/{action}",
            post(docker::container_action),
        )
        .route("/admin/modules/{id}/fs/tree", get(fs::tree))
        .route(
            "/admin/modules/{id}/fs/file",
            get(fs::read_file).put(fs::write_file).delete(fs::delete_path),
        )
        .route("/admin/modules/{id}/fs/rename", post(fs::rename_path))
        .route("/admin/modules/{id}/fs/mkdir", post(fs::mkdir))
        .route(
            "/admin/ssh-keys",
            get(ssh_keys::list_keys).post(ssh_keys::create_key),
        )
        .route(
            "/admin/ssh-keys/{id}",
            get(ssh_keys::get_key).delete(ssh_keys::delete_key),
        )
        .route("/admin/ssh-keys/{id}/events", get(ssh_keys::list_key_events))
        .route(
            "/admin/users/{ft_login}/sessions",
            axum::routing::delete(modules::revoke_user_sessions),
        )
        .route("/admin/roles/{id}/rules", put(update_role_rules))
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn update_role_rules(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(rules): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    state.store.update_role_rules_json(&id, rules).await?;
    Ok(StatusCode::NO_CONTENT)
}
