//! Host-routed reverse proxy and the status endpoints.
//!
//! `<slug>.<allowed-domain>` requests run the auth pipeline, then stream
//! to `http://gateway-<dnsSafe(slug)>:<GATEWAY_PORT>/`. Upstream failures
//! are a flat 502; auth failures never leak SQL errors.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use pan_bagnat_common::slug::{extract_slug, gateway_name};
use pan_bagnat_common::types::ModulePage;

use crate::auth::{self, AuthOutcome, SESSION_COOKIE};
use crate::config::Config;
use crate::pages::PageStore;

pub struct ProxyState {
    pub config: Config,
    pub pool: sqlx::PgPool,
    pub pages: Arc<PageStore>,
    pub client: reqwest::Client,
}

pub type SharedState = Arc<ProxyState>;

/// Hop-by-hop headers that must not be forwarded either way.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn json_error(status: StatusCode, code: &str) -> Response {
    (status, Json(serde_json::json!({"code": code}))).into_response()
}

/// `Set-Cookie` that clears the session cookie.
fn clear_cookie_header(secure: bool) -> HeaderValue {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).unwrap_or(HeaderValue::from_static(""))
}

fn with_cleared_cookie(mut response: Response, secure: bool) -> Response {
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_cookie_header(secure));
    response
}

/// Scheme the request arrived with, honoring an upstream terminator.
fn request_proto(headers: &HeaderMap) -> &'static str {
    match headers
        .get("X-Forwarded-Proto")
        .and_then(|v| v.to_str().ok())
    {
        Some("https") => "https",
        _ => "http",
    }
}

enum AuthDecision {
    Allow,
    Deny(Response),
}

/// Run the shared authorization pipeline for a page.
async fn authorize(state: &ProxyState, page: &ModulePage, headers: &HeaderMap) -> AuthDecision {
    let secure = request_proto(headers) == "https";
    let session_id = auth::extract_session_id(headers)
        .map(|raw| auth::normalize_credential(&raw, &state.config.session_secret));

    let outcome = match auth::resolve(&state.pool, &state.config, session_id.as_deref()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("session resolution failed: {e}");
            return AuthDecision::Deny(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ));
        }
    };

    let authenticated = match outcome {
        AuthOutcome::Expired => {
            return AuthDecision::Deny(with_cleared_cookie(
                json_error(StatusCode::UNAUTHORIZED, "unauthorized"),
                secure,
            ));
        }
        AuthOutcome::Blacklisted { ft_login } => {
            match auth::delete_user_sessions(&state.pool, &ft_login).await {
                Ok(count) => debug!(ft_login, count, "blacklisted user sessions deleted"),
                Err(e) => warn!("failed to delete blacklisted sessions: {e}"),
            }
            return AuthDecision::Deny(with_cleared_cookie(
                json_error(StatusCode::FORBIDDEN, "blacklisted"),
                secure,
            ));
        }
        AuthOutcome::Authenticated { .. } => true,
        AuthOutcome::Anonymous => false,
    };

    if !page.is_public {
        // Private pages are only reachable from inside a Pan Bagnat
        // iframe, which always sends a Referer.
        if headers.get(header::REFERER).is_none() {
            return AuthDecision::Deny(json_error(StatusCode::FORBIDDEN, "iframe_required"));
        }
        if !authenticated {
            return AuthDecision::Deny(json_error(StatusCode::UNAUTHORIZED, "unauthorized"));
        }
    }
    AuthDecision::Allow
}

fn host_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// The catch-all: derive the slug from the host, authorize, proxy.
pub async fn proxy_handler(State(state): State<SharedState>, request: Request) -> Response {
    let headers = request.headers().clone();
    let Some(host) = host_of(&headers) else {
        return json_error(StatusCode::NOT_FOUND, "not_found");
    };
    let Some(slug) = extract_slug(&host, &state.config.allowed_domains) else {
        return json_error(StatusCode::NOT_FOUND, "not_found");
    };
    let Some(page) = state.pages.get(&slug) else {
        return json_error(StatusCode::NOT_FOUND, "not_found");
    };

    if let AuthDecision::Deny(response) = authorize(&state, &page, &headers).await {
        return response;
    }

    forward(&state, &slug, &host, request)
        .await
        .unwrap_or_else(|e| {
            warn!(slug, "upstream error: {e}");
            (StatusCode::BAD_GATEWAY, "module upstream error").into_response()
        })
}

/// Stream the request to the page's gateway and the response back.
async fn forward(
    state: &ProxyState,
    slug: &str,
    host: &str,
    request: Request,
) -> Result<Response, reqwest::Error> {
    let proto = request_proto(request.headers());
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = format!(
        "http://{}:{}{}",
        gateway_name(slug),
        state.config.gateway_port,
        path_and_query
    );

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut upstream = state.client.request(method, &url);

    for (name, value) in request.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) || lower == "host" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            upstream = upstream.header(name.as_str(), value);
        }
    }
    upstream = upstream
        .header("X-Forwarded-Proto", proto)
        .header("X-Forwarded-Host", host);

    let body_stream = request.into_body().into_data_stream();
    let response = upstream
        .body(reqwest::Body::wrap_stream(body_stream))
        .send()
        .await?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    Ok(builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

/// `GET|POST /module-page/_status/{slug}`: same auth pipeline, then the
/// net-controller's view of the gateway, annotated with the page network.
pub async fn status_handler(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(page) = state.pages.get(&slug) else {
        return json_error(StatusCode::NOT_FOUND, "not_found");
    };
    if let AuthDecision::Deny(response) = authorize(&state, &page, &headers).await {
        return response;
    }

    let url = format!(
        "{}/gateways/{}",
        state.config.net_controller_url.trim_end_matches('/'),
        slug
    );
    let request = if method == Method::POST {
        state.client.post(&url)
    } else {
        state.client.get(&url)
    };

    let result = request
        .timeout(state.config.net_controller_timeout)
        .send()
        .await;
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(slug, "net-controller unreachable: {e}");
            return json_error(StatusCode::BAD_GATEWAY, "net_controller_unavailable");
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            warn!(slug, "net-controller returned malformed JSON: {e}");
            return json_error(StatusCode::BAD_GATEWAY, "net_controller_unavailable");
        }
    };
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "network_name".to_string(),
            serde_json::json!(page.network_name),
        );
    }
    (status, Json(body)).into_response()
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_cookie_header_shape() {
        let value = clear_cookie_header(false);
        let s = value.to_str().unwrap();
        assert!(s.starts_with("session_id=;"));
        assert!(s.contains("Path=/"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Lax"));
        assert!(s.contains("Max-Age=0"));
        assert!(!s.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_header_secure() {
        let value = clear_cookie_header(true);
        assert!(value.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn test_request_proto() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_proto(&headers), "http");
        headers.insert("X-Forwarded-Proto", HeaderValue::from_static("https"));
        assert_eq!(request_proto(&headers), "https");
        headers.insert("X-Forwarded-Proto", HeaderValue::from_static("gopher"));
        assert_eq!(request_proto(&headers), "http");
    }

    #[test]
    fn test_hop_by_hop_list_is_lowercase() {
        for name in HOP_BY_HOP {
            assert_eq!(name, name.to_ascii_lowercase());
        }
    }
}
