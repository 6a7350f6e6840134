//! Controller HTTP surface: per-slug gateway status and explicit
//! reattachment.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::reconcile::Reconciler;

pub fn router(reconciler: Arc<Reconciler>) -> Router {
    Router::new()
        .route(
            "/gateways/{slug}",
            get(get_gateway).post(reattach_gateway),
        )
        .route("/healthz", get(healthz))
        .with_state(reconciler)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Cached last-known status.
async fn get_gateway(
    State(reconciler): State<Arc<Reconciler>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    match reconciler.status(&slug) {
        Some(status) => (StatusCode::OK, Json(serde_json::json!(status))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("no gateway for slug {slug}")})),
        )
            .into_response(),
    }
}

/// Run a reconcile now, then report the refreshed status with
/// `reattached: true`.
async fn reattach_gateway(
    State(reconciler): State<Arc<Reconciler>>,
    Path(slug): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = reconciler.reconcile().await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("reconcile failed: {e}")})),
        )
            .into_response();
    }
    match reconciler.status(&slug) {
        Some(mut status) => {
            status.reattached = Some(true);
            (StatusCode::OK, Json(serde_json::json!(status))).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("no gateway for slug {slug}")})),
        )
            .into_response(),
    }
}
