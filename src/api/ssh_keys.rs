//! SSH key administration. Private keys never leave the store (the entity
//! skips them on serialization).

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::store::ssh_keys::NewSshKey;

use super::{ApiResult, SharedState};

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub user_id: Option<String>,
    pub module_id: Option<String>,
}

pub async fn list_keys(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_ssh_keys().await?))
}

pub async fn create_key(
    State(state): State<SharedState>,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    let key = state
        .store
        .create_ssh_key(NewSshKey {
            name: req.name,
            public_key: req.public_key,
            private_key: req.private_key,
            user_id: req.user_id,
            module_id: req.module_id,
        })
        .await?;
    state
        .store
        .insert_ssh_key_event(
            &key.id,
            "key created",
            key.user_id.as_deref(),
            key.module_id.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

pub async fn get_key(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get_ssh_key(&id).await?))
}

pub async fn delete_key(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.delete_ssh_key(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_key_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_ssh_key_events(&id).await?))
}
