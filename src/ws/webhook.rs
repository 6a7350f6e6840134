//! Webhook ingress.
//!
//! External producers POST events with an `X-Hook-Signature` header
//! carrying `hex(HMAC-SHA256(body, WEBHOOK_SECRET))`. The comparison is
//! constant time; accepted events join the shared channel and are shed
//! (never blocking) when it is full.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use pan_bagnat_common::types::Event;

use super::registry::WsRegistry;

pub struct WebhookState {
    pub secret: String,
    pub registry: Arc<WsRegistry>,
}

pub async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.secret.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "webhook secret not configured"})),
        )
            .into_response();
    }

    let provided = headers
        .get("X-Hook-Signature")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| hex::decode(v.trim()).ok());
    let Some(provided) = provided else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid signature"})),
        )
            .into_response();
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(state.secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };
    mac.update(&body);
    if mac.verify_slice(&provided).is_err() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid signature"})),
        )
            .into_response();
    }

    let event: Event = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("malformed event: {e}")})),
            )
                .into_response();
        }
    };

    if event.event_type.is_empty() {
        warn!("webhook event without eventType dropped");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "eventType is required"})),
        )
            .into_response();
    }

    state.registry.push(event);
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::{Router, routing::post};
    use tower::ServiceExt;

    const SECRET: &str = "hook-secret";

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn test_router(secret: &str) -> (Router, Arc<WsRegistry>) {
        let (registry, _rx) = WsRegistry::new();
        let state = Arc::new(WebhookState {
            secret: secret.to_string(),
            registry: registry.clone(),
        });
        let router = Router::new()
            .route("/webhook", post(webhook_handler))
            .with_state(state);
        (router, registry)
    }

    fn event_body() -> Vec<u8> {
        serde_json::json!({
            "eventType": "module_status_changed",
            "module_id": "module_1",
            "topic": "module:module_1",
            "timestamp": "2025-01-01T00:00:00Z",
            "payload": {"status": "enabled"},
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_valid_signature_accepted() {
        let (router, _registry) = test_router(SECRET);
        let body = event_body();
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Hook-Signature", sign(SECRET, &body))
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_bit_flip_rejected() {
        let (router, _registry) = test_router(SECRET);
        let body = event_body();
        let mut sig = sign(SECRET, &body).into_bytes();
        // Flip one bit of the first hex digit.
        sig[0] = if sig[0] == b'0' { b'1' } else { b'0' };
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Hook-Signature", String::from_utf8(sig).unwrap())
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejection_body_names_the_signature() {
        use http_body_util::BodyExt;

        let (router, _registry) = test_router(SECRET);
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Hook-Signature", "deadbeef")
            .body(Body::from(event_body()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid signature");
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let (router, _registry) = test_router(SECRET);
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from(event_body()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unset_secret_is_503() {
        let (router, _registry) = test_router("");
        let body = event_body();
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Hook-Signature", sign("anything", &body))
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let (router, _registry) = test_router(SECRET);
        let body = b"{not json".to_vec();
        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Hook-Signature", sign(SECRET, &body))
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
