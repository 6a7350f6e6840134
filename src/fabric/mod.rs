//! Docker event fabric.
//!
//! One long-lived `docker events` subscription per process feeds the
//! runtime container state map; per-container log tails are started and
//! stopped by the WebSocket refcount hooks. Both publish onto the shared
//! event channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use pan_bagnat_common::types::ContainerState;

use crate::store::Store;
use crate::ws::WsRegistry;

pub mod events;
pub mod tail;

/// Bound on the slug→module cache; exceeded entries are dropped wholesale.
const MODULE_CACHE_CAP: usize = 256;

pub struct Fabric {
    pub(crate) store: Store,
    pub(crate) registry: Arc<WsRegistry>,
    /// Canonical repo base used to filter foreign compose projects.
    pub(crate) repo_base: String,
    /// Runtime container map, keyed `"<module_slug>/<service>"`.
    state: Mutex<HashMap<String, ContainerState>>,
    /// slug → module id (None caches a miss). Read-heavy: every event
    /// resolves through it.
    module_cache: RwLock<HashMap<String, Option<String>>>,
    /// Cancellation handle per `container:<id>:<name>` topic.
    pub(crate) cancels: Mutex<HashMap<String, tokio_util::sync::CancellationToken>>,
    started: AtomicBool,
}

impl Fabric {
    pub fn new(store: Store, registry: Arc<WsRegistry>, repo_base: PathBuf) -> Arc<Self> {
        let repo_base = repo_base
            .canonicalize()
            .unwrap_or(repo_base)
            .display()
            .to_string();
        Arc::new(Self {
            store,
            registry,
            repo_base,
            state: Mutex::new(HashMap::new()),
            module_cache: RwLock::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Start the fabric: install the tail hooks, preload the container map
    /// and spawn the event loop. Safe to call more than once; only the
    /// first call does anything.
    pub async fn start(self: &Arc<Self>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tail::install_hooks(self.clone());
        events::preload(self).await;
        events::spawn_event_loop(self.clone());
        info!("docker event fabric started");
    }

    pub(crate) fn state_key(slug: &str, service: &str) -> String {
        format!("{slug}/{service}")
    }

    pub(crate) fn get_state(&self, key: &str) -> Option<ContainerState> {
        self.state.lock().expect("state lock poisoned").get(key).cloned()
    }

    pub(crate) fn put_state(&self, key: String, state: ContainerState) {
        self.state
            .lock()
            .expect("state lock poisoned")
            .insert(key, state);
        self.dump_state();
    }

    pub(crate) fn remove_state(&self, key: &str) {
        self.state.lock().expect("state lock poisoned").remove(key);
        self.dump_state();
    }

    /// Deterministic (sorted) dump of the container map for operators.
    fn dump_state(&self) {
        let state = self.state.lock().expect("state lock poisoned");
        let mut entries: Vec<String> = state
            .iter()
            .map(|(key, s)| format!("{key}={}", s.status.as_str()))
            .collect();
        entries.sort();
        debug!("container state: [{}]", entries.join(", "));
    }

    /// Resolve a compose project slug to a module id through the bounded
    /// cache; a miss is cached and logged by the caller.
    pub(crate) async fn resolve_module(&self, slug: &str) -> Option<String> {
        {
            let cache = self.module_cache.read().expect("cache lock poisoned");
            if let Some(cached) = cache.get(slug) {
                return cached.clone();
            }
        }
        let resolved = self.store.module_id_for_slug(slug).await.ok().flatten();
        let mut cache = self.module_cache.write().expect("cache lock poisoned");
        if cache.len() >= MODULE_CACHE_CAP {
            cache.clear();
        }
        cache.insert(slug.to_string(), resolved.clone());
        resolved
    }
}
