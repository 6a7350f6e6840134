//! Shared tracing/logging initialization.
//!
//! All three Pan Bagnat binaries set up `tracing_subscriber` the same way:
//! an env-filter seeded from `RUST_LOG` with a per-binary default, and an
//! optional JSON output format for log shippers.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not
///   set (e.g. `"pan_bagnat=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
