//! Desired/actual convergence for gateway containers.
//!
//! Desired state is the set of routable module pages; actual state is the
//! set of labeled gateway containers on the daemon. Reconciliation runs
//! under a single-writer mutex; triggers (startup, NOTIFY, 30s tick,
//! explicit POST) collapse into a depth-1 channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{FromRow, PgPool, Row};
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use pan_bagnat_common::slug::gateway_name;
use pan_bagnat_common::types::{GatewaySpec, GatewayStatus, ModulePage};

use crate::config::Config;
use crate::docker::{GatewayDocker, Inspection};

/// Periodic convergence interval, on top of NOTIFY-driven runs.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Reconciler {
    pool: PgPool,
    config: Config,
    docker: GatewayDocker,
    statuses: std::sync::Mutex<HashMap<String, GatewayStatus>>,
    /// Single writer: one reconcile at a time.
    lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(pool: PgPool, config: Config) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            docker: GatewayDocker,
            statuses: std::sync::Mutex::new(HashMap::new()),
            lock: Mutex::new(()),
        })
    }

    /// Last-known status of one page's gateway.
    pub fn status(&self, slug: &str) -> Option<GatewayStatus> {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .get(slug)
            .cloned()
    }

    /// Query the routable pages and derive the desired gateway set.
    /// Slugs whose DNS-safe collapse collides keep only the first spec.
    async fn desired(&self) -> anyhow::Result<HashMap<String, GatewaySpec>> {
        let rows = sqlx::query(
            "SELECT p.id, p.module_id, p.slug, p.url, p.is_public, p.target_container, \
                    p.target_port, p.network_name, p.icon_url, p.created_at, p.updated_at, \
                    m.slug AS module_slug \
             FROM module_pages p \
             JOIN modules m ON m.id = p.module_id \
             WHERE p.target_container IS NOT NULL AND p.target_port IS NOT NULL \
             ORDER BY p.slug",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut desired: HashMap<String, GatewaySpec> = HashMap::new();
        let mut names: HashMap<String, String> = HashMap::new();
        for row in &rows {
            let page = ModulePage::from_row(row)?;
            let module_slug: String = row.try_get("module_slug")?;
            let Some(spec) = GatewaySpec::from_page(&page, &module_slug) else {
                continue;
            };
            let name = gateway_name(&spec.slug);
            if let Some(winner) = names.get(&name) {
                warn!(
                    slug = %spec.slug,
                    winner = %winner,
                    container = %name,
                    "gateway name collision after slug collapse, keeping first"
                );
                continue;
            }
            names.insert(name, spec.slug.clone());
            desired.insert(spec.slug.clone(), spec);
        }
        Ok(desired)
    }

    /// Converge actual gateways onto the desired set and refresh the
    /// status cache.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;

        let desired = self.desired().await?;
        let mut actual = self.docker.list().await?;

        for (slug, spec) in &desired {
            let name = gateway_name(slug);

            // Label drift (target or network changed) forces a recreate.
            if let Some(existing) = actual.get(slug)
                && (existing.target != spec.target_url() || existing.network != spec.network)
            {
                info!(slug = %slug, "gateway labels drifted, recreating");
                if let Err(e) = self.docker.remove(&existing.name).await {
                    warn!(slug = %slug, "failed to remove drifted gateway: {e}");
                }
                actual.remove(slug);
            }

            if !actual.contains_key(slug) {
                info!(slug = %slug, container = %name, "creating gateway");
                if let Err(e) = self
                    .docker
                    .create(
                        spec,
                        &self.config.shared_network,
                        &self.config.gateway_image,
                        self.config.gateway_port,
                    )
                    .await
                {
                    warn!(slug = %slug, "gateway creation failed: {e}");
                    self.put_status(
                        slug,
                        GatewayStatus {
                            ok: false,
                            message: format!("gateway creation failed: {e}"),
                            network_name: Some(spec.network.clone()),
                            connected_networks: None,
                            missing_networks: None,
                            reattached: None,
                        },
                    );
                    continue;
                }
            } else if let Err(e) = self.docker.connect_network(&name, &spec.network).await {
                warn!(slug = %slug, "network connect failed: {e}");
            }

            let status = match self.docker.inspect(&name).await {
                Ok(inspection) => {
                    gateway_status(spec, &inspection, &self.config.shared_network)
                }
                Err(e) => GatewayStatus {
                    ok: false,
                    message: format!("inspect failed: {e}"),
                    network_name: Some(spec.network.clone()),
                    connected_networks: None,
                    missing_networks: None,
                    reattached: None,
                },
            };
            self.put_status(slug, status);
        }

        // Gateways with no desired counterpart are removed.
        for (slug, gateway) in &actual {
            if !desired.contains_key(slug) {
                info!(slug = %slug, container = %gateway.name, "removing orphaned gateway");
                if let Err(e) = self.docker.remove(&gateway.name).await {
                    warn!(slug = %slug, "failed to remove orphaned gateway: {e}");
                }
                self.statuses
                    .lock()
                    .expect("status lock poisoned")
                    .remove(slug);
            }
        }
        Ok(())
    }

    fn put_status(&self, slug: &str, status: GatewayStatus) {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(slug.to_string(), status);
    }

    /// Run the trigger loop: startup pass, then NOTIFY pulses and the
    /// periodic tick, serialized by the reconcile mutex.
    pub fn spawn_loop(self: &Arc<Self>, mut trigger: mpsc::Receiver<()>) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reconciler.reconcile().await {
                warn!("startup reconcile failed: {e}");
            }
            let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
            tick.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    pulse = trigger.recv() => {
                        if pulse.is_none() {
                            return;
                        }
                    }
                    _ = tick.tick() => {}
                }
                if let Err(e) = reconciler.reconcile().await {
                    warn!("reconcile failed: {e}");
                }
            }
        });
    }
}

/// Status report for one gateway, per the convergence contract: missing
/// networks dominate, then not-running, then attached.
fn gateway_status(
    spec: &GatewaySpec,
    inspection: &Inspection,
    shared_network: &str,
) -> GatewayStatus {
    let mut missing = Vec::new();
    if !inspection.networks.iter().any(|n| n == &spec.network) {
        missing.push(spec.network.clone());
    }
    if !inspection.networks.iter().any(|n| n == shared_network) {
        missing.push(shared_network.to_string());
    }
    if !missing.is_empty() {
        return GatewayStatus {
            ok: false,
            message: "missing networks".to_string(),
            network_name: Some(spec.network.clone()),
            connected_networks: Some(inspection.networks.clone()),
            missing_networks: Some(missing),
            reattached: None,
        };
    }
    if !inspection.running {
        return GatewayStatus {
            ok: false,
            message: "gateway stopped".to_string(),
            network_name: Some(spec.network.clone()),
            connected_networks: Some(inspection.networks.clone()),
            missing_networks: None,
            reattached: None,
        };
    }
    GatewayStatus {
        ok: true,
        message: "gateway attached".to_string(),
        network_name: Some(spec.network.clone()),
        connected_networks: Some(vec![spec.network.clone()]),
        missing_networks: None,
        reattached: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GatewaySpec {
        GatewaySpec {
            slug: "app".into(),
            module_id: "module_1".into(),
            module_slug: "demo".into(),
            network: "app_default".into(),
            target_container: "web".into(),
            target_port: 3000,
        }
    }

    #[test]
    fn test_status_attached() {
        let inspection = Inspection {
            running: true,
            networks: vec!["pan-bagnat-proxy-net".into(), "app_default".into()],
        };
        let status = gateway_status(&spec(), &inspection, "pan-bagnat-proxy-net");
        assert!(status.ok);
        assert_eq!(status.message, "gateway attached");
        assert_eq!(status.connected_networks.unwrap(), vec!["app_default"]);
    }

    #[test]
    fn test_status_missing_module_network() {
        let inspection = Inspection {
            running: true,
            networks: vec!["pan-bagnat-proxy-net".into()],
        };
        let status = gateway_status(&spec(), &inspection, "pan-bagnat-proxy-net");
        assert!(!status.ok);
        assert_eq!(status.message, "missing networks");
        assert_eq!(status.missing_networks.unwrap(), vec!["app_default"]);
    }

    #[test]
    fn test_status_missing_shared_network() {
        let inspection = Inspection {
            running: true,
            networks: vec!["app_default".into()],
        };
        let status = gateway_status(&spec(), &inspection, "pan-bagnat-proxy-net");
        assert!(!status.ok);
        assert_eq!(
            status.missing_networks.unwrap(),
            vec!["pan-bagnat-proxy-net"]
        );
    }

    #[test]
    fn test_status_stopped_with_networks_present() {
        let inspection = Inspection {
            running: false,
            networks: vec!["pan-bagnat-proxy-net".into(), "app_default".into()],
        };
        let status = gateway_status(&spec(), &inspection, "pan-bagnat-proxy-net");
        assert!(!status.ok);
        assert_eq!(status.message, "gateway stopped");
    }
}
