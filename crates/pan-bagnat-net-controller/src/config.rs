use anyhow::{Context, Result};

/// Gateway controller configuration, all env-driven.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Postgres channel carrying module-page change notifications.
    pub notify_channel: String,
    /// Network joining the page proxy to every gateway.
    pub shared_network: String,
    pub gateway_image: String,
    /// Port the generated nginx config listens on inside each gateway.
    pub gateway_port: u16,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("POSTGRES_URL"))
            .context("DATABASE_URL (or POSTGRES_URL) is required")?;
        let port: u16 = env_or("MODULES_NET_CONTROLLER_PORT", "9091")
            .parse()
            .context("MODULES_NET_CONTROLLER_PORT must be a port number")?;
        let gateway_port: u16 = env_or("MODULES_GATEWAY_PORT", "8080")
            .parse()
            .context("MODULES_GATEWAY_PORT must be a port number")?;
        Ok(Self {
            database_url,
            port,
            notify_channel: env_or("MODULES_PROXY_CHANNEL", "module_page_changed"),
            shared_network: env_or("MODULES_SHARED_NETWORK", "pan-bagnat-proxy-net"),
            gateway_image: env_or("MODULES_GATEWAY_IMAGE", "nginx:alpine"),
            gateway_port,
        })
    }
}
