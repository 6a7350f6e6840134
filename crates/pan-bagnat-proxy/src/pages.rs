//! In-memory cache of the module-page table.
//!
//! Loaded on startup and refreshed whenever `module_page_changed` fires.
//! Reads vastly outnumber refreshes, so the map sits behind an RwLock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use pan_bagnat_common::types::ModulePage;

pub struct PageStore {
    pool: PgPool,
    pages: RwLock<HashMap<String, ModulePage>>,
}

impl PageStore {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            pages: RwLock::new(HashMap::new()),
        })
    }

    pub fn get(&self, slug: &str) -> Option<ModulePage> {
        self.pages
            .read()
            .expect("page store lock poisoned")
            .get(slug)
            .cloned()
    }

    /// Replace the cache with the current table contents.
    pub async fn refresh(&self) -> Result<(), sqlx::Error> {
        let pages: Vec<ModulePage> = sqlx::query_as(
            "SELECT id, module_id, slug, url, is_public, target_container, target_port, \
                    network_name, icon_url, created_at, updated_at \
             FROM module_pages",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut map = HashMap::with_capacity(pages.len());
        for page in pages {
            map.insert(page.slug.clone(), page);
        }
        let count = map.len();
        *self.pages.write().expect("page store lock poisoned") = map;
        info!(pages = count, "page cache refreshed");
        Ok(())
    }

    /// Start the NOTIFY-driven refresh: pulses coalesce into a depth-1
    /// channel, each drained pulse reloads the table.
    pub fn spawn_refresh_loop(self: &Arc<Self>, database_url: String, channel: String) {
        let (tx, mut rx) = mpsc::channel::<()>(1);

        let store = self.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if let Err(e) = store.refresh().await {
                    warn!("page cache refresh failed: {e}");
                }
            }
        });

        let pool = self.pool.clone();
        tokio::spawn(async move {
            pan_bagnat_common::notify::listen_loop(&database_url, &pool, &channel, move || {
                let _ = tx.try_send(());
            })
            .await;
        });
    }
}
