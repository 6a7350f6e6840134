//! Postgres LISTEN loop.
//!
//! Each listener owns a dedicated connection on top of the shared pool.
//! On error it reconnects with a 5s→60s backoff; after two minutes of
//! silence the server is pinged through the pool and a dead server tears
//! the listener down for a reconnect. Every notification collapses into
//! the callback; coalescing is the callback's concern (the gateway
//! controller feeds a depth-1 channel).

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Silence threshold after which the connection is pinged.
const PING_AFTER: Duration = Duration::from_secs(120);

/// Listen on `channel` forever, invoking `on_notify` for every
/// notification. Never returns; run it in its own task.
pub async fn listen_loop<F>(database_url: &str, pool: &PgPool, channel: &str, on_notify: F)
where
    F: Fn() + Send + Sync,
{
    let mut backoff = MIN_BACKOFF;
    loop {
        let mut listener = match PgListener::connect(database_url).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(channel, "listener connect failed: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        if let Err(e) = listener.listen(channel).await {
            warn!(channel, "LISTEN failed: {e}, retrying in {backoff:?}");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            continue;
        }
        debug!(channel, "listening for notifications");
        backoff = MIN_BACKOFF;

        loop {
            match tokio::time::timeout(PING_AFTER, listener.recv()).await {
                Ok(Ok(notification)) => {
                    debug!(
                        channel,
                        payload = notification.payload(),
                        "notification received"
                    );
                    on_notify();
                }
                Ok(Err(e)) => {
                    warn!(channel, "listener error: {e}, reconnecting");
                    break;
                }
                Err(_silence) => {
                    // Two minutes without traffic: make sure the server is
                    // still there before trusting the idle connection.
                    if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
                        warn!(channel, "ping failed: {e}, reconnecting listener");
                        break;
                    }
                }
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
