use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use pan_bagnat_common::token::{DEFAULT_TTL, MIN_TTL, parse_duration};

/// Runtime configuration for the admin backend.
///
/// Everything comes from the environment; `.env` files are loaded by
/// `main` before this runs.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub repo_base_path: PathBuf,
    /// HMAC secret for the module access handoff token. Empty = disabled.
    pub session_secret: String,
    /// Lifetime of a handoff token (default 1m, floor 1s).
    pub session_token_ttl: Duration,
    /// HMAC secret for webhook ingress. Empty = webhook disabled.
    pub webhook_secret: String,
    /// New-session lifetime and sliding-extension cooldown.
    pub session_ttl: Duration,
    pub session_expire_cooldown: Duration,
    /// Hard ceiling on sliding extension, measured from session creation.
    pub session_max_expire: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("POSTGRES_URL"))
            .context("DATABASE_URL (or POSTGRES_URL) is required")?;

        let port: u16 = env_or("PORT", "8080")
            .parse()
            .context("PORT must be a port number")?;

        let repo_base_path = PathBuf::from(env_or("REPO_BASE_PATH", "../../repos"));

        let session_token_ttl = std::env::var("MODULES_SESSION_TOKEN_TTL")
            .ok()
            .and_then(|raw| parse_duration(&raw))
            .unwrap_or(DEFAULT_TTL)
            .max(MIN_TTL);

        Ok(Self {
            database_url,
            port,
            repo_base_path,
            session_secret: env_or("MODULES_SESSION_SECRET", ""),
            session_token_ttl,
            webhook_secret: env_or("WEBHOOK_SECRET", ""),
            session_ttl: Duration::from_secs(24 * 3600),
            session_expire_cooldown: Duration::from_secs(24 * 3600),
            session_max_expire: Duration::from_secs(30 * 24 * 3600),
        })
    }

    /// Working tree of a module.
    pub fn repo_dir(&self, slug: &str) -> PathBuf {
        self.repo_base_path.join(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/pb".into(),
            port: 8080,
            repo_base_path: PathBuf::from("/srv/repos"),
            session_secret: String::new(),
            session_token_ttl: DEFAULT_TTL,
            webhook_secret: String::new(),
            session_ttl: Duration::from_secs(86400),
            session_expire_cooldown: Duration::from_secs(86400),
            session_max_expire: Duration::from_secs(30 * 86400),
        }
    }

    #[test]
    fn test_repo_dir_is_anchored_at_base() {
        assert_eq!(
            test_config().repo_dir("demo"),
            PathBuf::from("/srv/repos/demo")
        );
    }
}
