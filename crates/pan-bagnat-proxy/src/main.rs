//! Page proxy (proxy-service).
//!
//! Terminates `<slug>.<allowed-domain>` requests: resolves the page from
//! the cached table, enforces session/blacklist/public-vs-private access,
//! and reverse-proxies to the page's gateway container.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

mod auth;
mod config;
mod pages;
mod proxy;

use config::Config;
use pages::PageStore;
use pan_bagnat_common::tracing_init::init_tracing;
use proxy::ProxyState;

#[derive(Parser)]
#[command(name = "pan-bagnat-proxy")]
#[command(version, about = "Pan Bagnat page proxy")]
struct Cli {
    /// Emit JSON log lines instead of the human-readable format.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing("pan_bagnat_proxy=info", cli.json_logs);

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let pages = PageStore::new(pool.clone());
    pages
        .refresh()
        .await
        .context("Initial page cache load failed")?;
    pages.spawn_refresh_loop(config.database_url.clone(), config.notify_channel.clone());

    let state = Arc::new(ProxyState {
        config: config.clone(),
        pool,
        pages,
        client: reqwest::Client::new(),
    });

    let app = Router::new()
        .route(
            "/module-page/_status/{slug}",
            get(proxy::status_handler).post(proxy::status_handler),
        )
        .route("/healthz", get(proxy::healthz))
        .fallback(proxy::proxy_handler)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("page proxy listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
