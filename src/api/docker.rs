//! Container listing and actions for one module.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use pan_bagnat_common::Error;

use crate::lifecycle::docker::ContainerAction;

use super::{ApiResult, SharedState};

pub async fn list_containers(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.containers(&id).await?))
}

pub async fn container_action(
    State(state): State<SharedState>,
    Path((id, service, action)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let action = ContainerAction::parse(&action)
        .ok_or_else(|| Error::InvalidInput(format!("unknown container action {action:?}")))?;
    let containers = state.engine.container_action(&id, &service, action).await?;
    Ok(Json(containers))
}
