//! Session persistence, shared by the backend and the page proxy.
//!
//! Sliding expiry: a touch bumps `last_seen` always, and extends
//! `expires_at` by the ttl only when less than the cooldown remains,
//! clamped to `created_at + max_expire`. A device fingerprint
//! `(ft_login, user_agent, ip)` has at most one active session, reused on
//! repeat login.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::Session;

const SESSION_COLUMNS: &str =
    "session_id, ft_login, user_agent, ip, device_label, created_at, last_seen, expires_at";

/// Default new-session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 3600);
/// A touch only extends the window when less than this remains.
pub const SESSION_EXPIRE_COOLDOWN: Duration = Duration::from_secs(24 * 3600);
/// Hard ceiling on sliding extension, measured from session creation.
pub const SESSION_MAX_EXPIRE: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone, Copy)]
pub struct SessionKnobs {
    pub ttl: Duration,
    pub cooldown: Duration,
    pub max_expire: Duration,
}

impl Default for SessionKnobs {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL,
            cooldown: SESSION_EXPIRE_COOLDOWN,
            max_expire: SESSION_MAX_EXPIRE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub ft_login: String,
    pub user_agent: String,
    pub ip: String,
    pub device_label: String,
}

/// Reuse the device's active session when one exists, else insert a new
/// row with a fresh session id.
pub async fn add_session(
    pool: &PgPool,
    new: NewSession,
    ttl: Duration,
) -> Result<Session, sqlx::Error> {
    if let Some(existing) =
        find_active_session_for_device(pool, &new.ft_login, &new.user_agent, &new.ip).await?
    {
        return Ok(existing);
    }
    let session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
    let sql = format!(
        "INSERT INTO sessions (session_id, ft_login, user_agent, ip, device_label, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SESSION_COLUMNS}"
    );
    sqlx::query_as::<_, Session>(&sql)
        .bind(&session_id)
        .bind(&new.ft_login)
        .bind(&new.user_agent)
        .bind(&new.ip)
        .bind(&new.device_label)
        .bind(expires_at)
        .fetch_one(pool)
        .await
}

pub async fn get_session(pool: &PgPool, session_id: &str) -> Result<Option<Session>, sqlx::Error> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1");
    sqlx::query_as::<_, Session>(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_active_session_for_device(
    pool: &PgPool,
    ft_login: &str,
    user_agent: &str,
    ip: &str,
) -> Result<Option<Session>, sqlx::Error> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions \
         WHERE ft_login = $1 AND user_agent = $2 AND ip = $3 AND expires_at >= now() \
         ORDER BY expires_at DESC LIMIT 1"
    );
    sqlx::query_as::<_, Session>(&sql)
        .bind(ft_login)
        .bind(user_agent)
        .bind(ip)
        .fetch_optional(pool)
        .await
}

/// Sliding-window touch. Expired sessions are left alone.
pub async fn touch_session_maybe(
    pool: &PgPool,
    session_id: &str,
    knobs: SessionKnobs,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sessions SET last_seen = now(), \
           expires_at = CASE \
             WHEN expires_at - now() < $2::interval \
               THEN LEAST(now() + $3::interval, created_at + $4::interval) \
             ELSE expires_at \
           END \
         WHERE session_id = $1 AND expires_at >= now()",
    )
    .bind(session_id)
    .bind(pg_interval(knobs.cooldown))
    .bind(pg_interval(knobs.ttl))
    .bind(pg_interval(knobs.max_expire))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_user_sessions(pool: &PgPool, ft_login: &str) -> Result<u64, sqlx::Error> {
    let done = sqlx::query("DELETE FROM sessions WHERE ft_login = $1")
        .bind(ft_login)
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}

/// Render a `Duration` as a Postgres interval literal (whole seconds).
fn pg_interval(d: Duration) -> String {
    format!("{} seconds", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_interval_rendering() {
        assert_eq!(pg_interval(Duration::from_secs(90)), "90 seconds");
        assert_eq!(pg_interval(Duration::from_secs(0)), "0 seconds");
    }

    #[test]
    fn test_default_knobs_expose_all_three_windows() {
        let knobs = SessionKnobs::default();
        assert_eq!(knobs.ttl, Duration::from_secs(86400));
        assert_eq!(knobs.cooldown, Duration::from_secs(86400));
        assert_eq!(knobs.max_expire, Duration::from_secs(30 * 86400));
    }
}
