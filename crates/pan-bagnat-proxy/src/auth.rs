//! Per-request authorization pipeline.
//!
//! Session id comes from the `session_id` cookie, the `X-Session-Id`
//! header, or a bearer token, in that order. Expired sessions clear the
//! cookie; blacklisted users lose every session they own.

use axum::http::HeaderMap;
use sqlx::{FromRow, PgPool, Row};

use pan_bagnat_common::sessions::{self, SessionKnobs};
use pan_bagnat_common::types::Session;

use crate::config::Config;

pub const SESSION_COOKIE: &str = "session_id";
const BLACKLIST_ROLE: &str = "roles_blacklist";

/// Result of resolving a request's session.
#[derive(Debug)]
pub enum AuthOutcome {
    Anonymous,
    Authenticated { session: Session, ft_login: String },
    Expired,
    Blacklisted { ft_login: String },
}

/// Pull the session id out of cookie, header or bearer token.
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = cookie_value(headers, SESSION_COOKIE) {
        return Some(value);
    }
    if let Some(value) = headers.get("X-Session-Id").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok())
        && let Some(token) = auth.strip_prefix("Bearer ")
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

/// A credential may be a raw session id or a signed handoff token minted
/// by the backend (`payload.signature`); a valid token resolves to the
/// session id it wraps, anything else passes through untouched.
pub fn normalize_credential(raw: &str, secret: &str) -> String {
    if !secret.is_empty()
        && raw.contains('.')
        && let Ok(claims) = pan_bagnat_common::token::verify(secret, raw)
    {
        return claims.sid;
    }
    raw.to_string()
}

/// Parse one cookie out of the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.trim() == name {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Resolve the session id to a user, enforcing expiry and the blacklist.
/// An authenticated hit also slides the session window.
pub async fn resolve(
    pool: &PgPool,
    config: &Config,
    session_id: Option<&str>,
) -> Result<AuthOutcome, sqlx::Error> {
    let Some(session_id) = session_id else {
        return Ok(AuthOutcome::Anonymous);
    };

    let row = sqlx::query(
        "SELECT s.session_id, s.ft_login, s.user_agent, s.ip, s.device_label, \
                s.created_at, s.last_seen, s.expires_at \
         FROM sessions s \
         JOIN users u ON u.ft_login = s.ft_login \
         WHERE s.session_id = $1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        // Unknown session: treat as anonymous rather than failing closed.
        return Ok(AuthOutcome::Anonymous);
    };
    let session = Session::from_row(&row)?;
    if session.is_expired(chrono::Utc::now()) {
        return Ok(AuthOutcome::Expired);
    }

    let blacklisted: bool = sqlx::query(
        "SELECT EXISTS(\
            SELECT 1 FROM user_roles ur \
            JOIN users u ON u.id = ur.user_id \
            WHERE u.ft_login = $1 AND ur.role_id = $2\
         ) AS blacklisted",
    )
    .bind(&session.ft_login)
    .bind(BLACKLIST_ROLE)
    .fetch_one(pool)
    .await?
    .try_get("blacklisted")?;

    if blacklisted {
        return Ok(AuthOutcome::Blacklisted {
            ft_login: session.ft_login,
        });
    }

    // Authenticated traffic slides the session window.
    sessions::touch_session_maybe(
        pool,
        &session.session_id,
        SessionKnobs {
            ttl: config.session_ttl,
            cooldown: config.session_expire_cooldown,
            max_expire: config.session_max_expire,
        },
    )
    .await?;
    let ft_login = session.ft_login.clone();
    Ok(AuthOutcome::Authenticated { session, ft_login })
}

pub async fn delete_user_sessions(pool: &PgPool, ft_login: &str) -> Result<u64, sqlx::Error> {
    sessions::delete_user_sessions(pool, ft_login).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_session_id_from_cookie() {
        let headers = headers_with("cookie", "theme=dark; session_id=abc123; lang=fr");
        assert_eq!(extract_session_id(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_session_id_from_header() {
        let headers = headers_with("x-session-id", "hdr-456");
        assert_eq!(extract_session_id(&headers), Some("hdr-456".to_string()));
    }

    #[test]
    fn test_session_id_from_bearer() {
        let headers = headers_with("authorization", "Bearer tok-789");
        assert_eq!(extract_session_id(&headers), Some("tok-789".to_string()));
    }

    #[test]
    fn test_cookie_takes_precedence_over_header() {
        let mut headers = headers_with("cookie", "session_id=from-cookie");
        headers.insert("x-session-id", HeaderValue::from_static("from-header"));
        assert_eq!(
            extract_session_id(&headers),
            Some("from-cookie".to_string())
        );
    }

    #[test]
    fn test_no_session_sources() {
        assert_eq!(extract_session_id(&HeaderMap::new()), None);
        let headers = headers_with("authorization", "Basic dXNlcg==");
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn test_empty_cookie_value_ignored() {
        let headers = headers_with("cookie", "session_id=");
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn test_normalize_credential_unwraps_handoff_token() {
        let secret = "proxy-secret";
        let token = pan_bagnat_common::token::generate(
            secret,
            "sess-42",
            "app",
            std::time::Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(normalize_credential(&token, secret), "sess-42");
    }

    #[test]
    fn test_normalize_credential_passthrough() {
        assert_eq!(normalize_credential("plain-id", "secret"), "plain-id");
        assert_eq!(normalize_credential("a.b", ""), "a.b");
        assert_eq!(normalize_credential("a.b", "secret"), "a.b");
    }
}
