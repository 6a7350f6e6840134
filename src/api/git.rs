//! Git operation endpoints. Every mutation returns the recomputed
//! `GitStatus` so the UI can refresh in one round trip.

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiResult, SharedState};

pub async fn status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.git_status(&id).await?))
}

pub async fn pull(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.pull(&id).await?))
}

pub async fn fetch(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.fetch(&id).await?))
}

#[derive(Deserialize)]
pub struct CheckoutRequest {
    #[serde(rename = "ref")]
    pub reference: String,
}

pub async fn checkout(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.checkout(&id, &req.reference).await?))
}

#[derive(Deserialize)]
pub struct BranchRequest {
    pub name: String,
    pub from: Option<String>,
}

pub async fn create_branch(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<BranchRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .engine
            .create_branch(&id, &req.name, req.from.as_deref())
            .await?,
    ))
}

pub async fn delete_branch(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<BranchRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.delete_branch(&id, &req.name).await?))
}

pub async fn merge_continue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.merge_continue(&id).await?))
}

pub async fn merge_abort(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.merge_abort(&id).await?))
}

#[derive(Deserialize)]
pub struct PathRequest {
    pub path: String,
}

pub async fn checkout_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<PathRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.checkout_file(&id, &req.path).await?))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub path: String,
    /// `"ours"` or `"theirs"`.
    pub strategy: String,
}

pub async fn resolve(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<impl IntoResponse> {
    let ours = match req.strategy.as_str() {
        "ours" => true,
        "theirs" => false,
        other => {
            return Err(pan_bagnat_common::Error::InvalidInput(format!(
                "strategy must be ours or theirs, got {other:?}"
            ))
            .into());
        }
    };
    Ok(Json(state.engine.resolve(&id, &req.path, ours).await?))
}

#[derive(Deserialize)]
pub struct CommitsQuery {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_commits(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<impl IntoResponse> {
    let commits = state
        .engine
        .list_commits(&id, query.reference.as_deref(), query.limit.unwrap_or(50))
        .await?;
    Ok(Json(commits))
}
