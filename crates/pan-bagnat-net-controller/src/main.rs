//! Gateway controller (net-controller).
//!
//! Keeps one nginx gateway container per routable module page, attached to
//! the shared proxy network and the module's compose network. Reconciles
//! on startup, on `module_page_changed` notifications, every 30 seconds,
//! and on explicit POST.

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

mod config;
mod docker;
mod http;
mod nginx;
mod reconcile;

use config::Config;
use pan_bagnat_common::tracing_init::init_tracing;
use reconcile::Reconciler;

#[derive(Parser)]
#[command(name = "pan-bagnat-net-controller")]
#[command(version, about = "Pan Bagnat gateway controller")]
struct Cli {
    /// Emit JSON log lines instead of the human-readable format.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing("pan_bagnat_net_controller=info", cli.json_logs);

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let reconciler = Reconciler::new(pool.clone(), config.clone());

    // NOTIFY pulses coalesce into a depth-1 trigger channel: anything
    // arriving during an in-flight reconcile collapses to one more run.
    let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
    reconciler.spawn_loop(trigger_rx);

    {
        let database_url = config.database_url.clone();
        let channel = config.notify_channel.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            pan_bagnat_common::notify::listen_loop(&database_url, &pool, &channel, move || {
                let _ = trigger_tx.try_send(());
            })
            .await;
        });
    }

    let app = http::router(reconciler);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("net-controller listening on {addr}");

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
