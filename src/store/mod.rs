//! Relational store adapter.
//!
//! Pure data-access boundary over Postgres: typed reads/writes for modules,
//! pages, ssh keys, sessions and module logs. DB error codes are translated
//! into the shared sentinel taxonomy here and nowhere else.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod logs;
pub mod modules;
pub mod pages;
pub mod roles;
pub mod sessions;
pub mod ssh_keys;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect the shared pool. NOTIFY listeners open their own dedicated
    /// connections on top of this.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(30 * 60))
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
