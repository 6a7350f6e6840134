use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Page proxy configuration, all env-driven.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub notify_channel: String,
    /// Host suffixes the proxy serves, e.g. `modules.example.com`.
    pub allowed_domains: Vec<String>,
    /// Port the gateways listen on.
    pub gateway_port: u16,
    /// Base URL of the net-controller status API.
    pub net_controller_url: String,
    /// Deadline for status calls to the net-controller.
    pub net_controller_timeout: Duration,
    /// HMAC secret for handoff tokens. Empty = handoff disabled.
    pub session_secret: String,
    /// Sliding-session knobs, mirroring the backend.
    pub session_ttl: Duration,
    pub session_expire_cooldown: Duration,
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
        let port: u16 = env_or("MODULES_PROXY_PORT", "9090")
            .parse()
            .context("MODULES_PROXY_PORT must be a port number")?;
        let gateway_port: u16 = env_or("MODULES_GATEWAY_PORT", "8080")
            .parse()
            .context("MODULES_GATEWAY_PORT must be a port number")?;

        let allowed_domains: Vec<String> = std::env::var("MODULES_PROXY_ALLOWED_DOMAINS")
            .context("MODULES_PROXY_ALLOWED_DOMAINS is required")?
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if allowed_domains.is_empty() {
            bail!("MODULES_PROXY_ALLOWED_DOMAINS must name at least one domain");
        }

        let net_controller_url = std::env::var("MODULES_NET_CONTROLLER_URL").unwrap_or_else(|_| {
            format!(
                "http://pan-bagnat-net-controller:{}",
                env_or("MODULES_NET_CONTROLLER_PORT", "9091")
            )
        });

        Ok(Self {
            database_url,
            port,
            notify_channel: env_or("MODULES_PROXY_CHANNEL", "module_page_changed"),
            allowed_domains,
            gateway_port,
            net_controller_url,
            net_controller_timeout: Duration::from_secs(15),
            session_secret: env_or("MODULES_SESSION_SECRET", ""),
            session_ttl: Duration::from_secs(24 * 3600),
            session_expire_cooldown: Duration::from_secs(24 * 3600),
            session_max_expire: Duration::from_secs(30 * 24 * 3600),
        })
    }
}
