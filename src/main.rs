use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use clap::Parser;

mod api;
mod config;
mod fabric;
mod lifecycle;
mod store;
mod ws;

use config::Config;
use fabric::Fabric;
use lifecycle::ModuleEngine;
use pan_bagnat_common::tracing_init::init_tracing;
use store::Store;
use ws::registry::WsRegistry;
use ws::webhook::WebhookState;

#[derive(Parser)]
#[command(name = "pan-bagnat")]
#[command(version, about = "Pan Bagnat admin backend - module lifecycle, event fabric, admin API")]
struct Cli {
    /// Emit JSON log lines instead of the human-readable format.
    #[arg(long)]
    json_logs: bool,

    /// Listen port; overrides the PORT environment variable.
    #[arg(long)]
    port: Option<u16>,

    /// Permissive CORS, for running the admin UI off a dev server.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing("pan_bagnat=info", cli.json_logs);

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let store = Store::connect(&config.database_url).await?;

    let (registry, event_rx) = WsRegistry::new();
    ws::spawn_dispatcher(registry.clone(), event_rx);

    let fabric = Fabric::new(
        store.clone(),
        registry.clone(),
        config.repo_base_path.clone(),
    );
    fabric.start().await;

    let engine = ModuleEngine::new(store.clone(), registry.clone(), config.clone());

    let state = Arc::new(api::AppState {
        store,
        engine,
        registry: registry.clone(),
        config: config.clone(),
    });
    let webhook_state = Arc::new(WebhookState {
        secret: config.webhook_secret.clone(),
        registry: registry.clone(),
    });

    let ws_registry = registry.clone();
    let mut app = api::api_router()
        .with_state(state)
        .route(
            "/ws",
            get(move |upgrade| ws::handler::ws_handler_with(upgrade, ws_registry)),
        )
        .merge(
            axum::Router::new()
                .route("/webhook", post(ws::webhook::webhook_handler))
                .with_state(webhook_state),
        );
    if cli.dev {
        app = app.layer(tower_http::cors::CorsLayer::permissive());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("pan-bagnat backend listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
