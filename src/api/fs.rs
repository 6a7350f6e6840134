//! File-tree endpoints, sandboxed to the module working tree.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiResult, SharedState};

#[derive(Deserialize, Default)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

pub async fn tree(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    let entries = state.engine.files(&module).tree(&query.path)?;
    Ok(Json(entries))
}

pub async fn read_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    let bytes = state.engine.files(&module).read(&query.path).await?;
    Ok(bytes)
}

pub async fn write_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    state.engine.files(&module).write(&query.path, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_path(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    state.engine.files(&module).delete(&query.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
}

pub async fn rename_path(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    state
        .engine
        .files(&module)
        .rename(&req.from, &req.to)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

pub async fn mkdir(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<MkdirRequest>,
) -> ApiResult<impl IntoResponse> {
    let module = state.store.get_module(&id).await?;
    state.engine.files(&module).mkdir(&req.path).await?;
    Ok(StatusCode::CREATED)
}
