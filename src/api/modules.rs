//! Module CRUD, lifecycle triggers, pages, logs and the access token.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Deserializer};

use pan_bagnat_common::Error;
use pan_bagnat_common::pagination::{Cursor, Direction};
use pan_bagnat_common::types::ModuleStatus;

use crate::store::modules::{ModulePatch, NewModule};
use crate::store::pages::{ModulePagePatch, NewModulePage};

use super::{ApiResult, SharedState};

#[derive(Deserialize)]
pub struct CreateModuleRequest {
    pub slug: String,
    pub name: String,
    pub git_url: String,
    #[serde(default = "default_branch")]
    pub git_branch: String,
    pub ssh_key_id: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Distinguishes an absent field (no change) from an explicit `null`
/// (clear the value).
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Deserialize)]
pub struct PatchModuleRequest {
    pub name: Option<String>,
    pub git_branch: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub ssh_key_id: Option<Option<String>>,
    pub status: Option<ModuleStatus>,
}

/// Either an opaque `page_token`, or explicit listing knobs.
#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub page_token: Option<String>,
    pub order_by: Option<String>,
    pub direction: Option<Direction>,
    pub filter: Option<String>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn cursor(&self, default_order: &str) -> Result<Cursor, Error> {
        match &self.page_token {
            Some(token) => Cursor::decode(token),
            None => Ok(Cursor::new(
                self.order_by.as_deref().unwrap_or(default_order),
                self.direction.unwrap_or_default(),
                self.filter.as_deref().unwrap_or(""),
                self.limit.unwrap_or(50),
            )),
        }
    }
}

pub async fn list_modules(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let cursor = query.cursor("name")?;
    let page = state.store.list_modules(&cursor).await?;
    Ok(Json(page))
}

pub async fn create_module(
    State(state): State<SharedState>,
    Json(req): Json<CreateModuleRequest>,
) -> ApiResult<impl IntoResponse> {
    let module = state
        .engine
        .create(NewModule {
            slug: req.slug,
            name: req.name,
            git_url: req.git_url,
            git_branch: req.git_branch,
            ssh_key_id: req.ssh_key_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(module)))
}

pub async fn get_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get_module(&id).await?))
}

pub async fn patch_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<PatchModuleRequest>,
) -> ApiResult<impl IntoResponse> {
    let module = state
        .store
        .patch_module(
            &id,
            ModulePatch {
                name: req.name,
                git_branch: req.git_branch,
                ssh_key_id: req.ssh_key_id,
                status: req.status,
            },
        )
        .await?;
    Ok(Json(module))
}

pub async fn delete_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.delete_module(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 202: the clone continues in the background, progress flows through the
/// module log topic.
pub async fn clone_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.start_clone(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn deploy_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.start_deploy(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn cleanup_module(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.cleanup(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn list_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let cursor = query.cursor("id")?;
    let page = state.store.list_module_logs(&id, &cursor).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct AccessTokenRequest {
    pub session_id: String,
}

pub async fn access_token(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AccessTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    // Only mint tokens for sessions that actually exist.
    let session = state.store.get_session(&req.session_id).await?;
    let token = state
        .engine
        .access_token(&session.session_id, &module.slug)?;
    Ok(Json(serde_json::json!({"token": token})))
}

/// Revoke every session of one user (admin action, e.g. on compromise).
pub async fn revoke_user_sessions(
    State(state): State<SharedState>,
    Path(ft_login): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.delete_user_sessions(&ft_login).await?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

// ── Pages ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreatePageRequest {
    pub slug: String,
    pub url: String,
    #[serde(default)]
    pub is_public: bool,
    pub target_container: Option<String>,
    pub target_port: Option<i32>,
    pub network_name: Option<String>,
    pub icon_url: Option<String>,
}

pub async fn list_pages(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_pages_for_module(&id).await?))
}

pub async fn create_page(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreatePageRequest>,
) -> ApiResult<impl IntoResponse> {
    // The module must exist; FK alone would yield an opaque conflict.
    let module = state.store.get_module(&id).await?;
    let page = state
        .store
        .create_page(NewModulePage {
            module_id: module.id,
            slug: req.slug,
            url: req.url,
            is_public: req.is_public,
            target_container: req.target_container,
            target_port: req.target_port,
            network_name: req.network_name,
            icon_url: req.icon_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(page)))
}

#[derive(Deserialize)]
pub struct PatchPageRequest {
    pub url: Option<String>,
    pub is_public: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub target_container: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub target_port: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub network_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon_url: Option<Option<String>>,
}

pub async fn patch_page(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<PatchPageRequest>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .store
        .patch_page(
            &slug,
            ModulePagePatch {
                url: req.url,
                is_public: req.is_public,
                target_container: req.target_container,
                target_port: req.target_port,
                network_name: req.network_name,
                icon_url: req.icon_url,
            },
        )
        .await?;
    Ok(Json(page))
}

pub async fn delete_page(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.delete_page(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}
