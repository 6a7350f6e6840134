//! Docker CLI wrappers for gateway containers.
//!
//! Gateways are recognized by the reserved `com.panbagnat.gateway` labels;
//! the target and network labels double as the drift detector during
//! reconciliation.

use std::collections::HashMap;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use pan_bagnat_common::slug::gateway_name;
use pan_bagnat_common::types::GatewaySpec;

use crate::nginx;

pub const GATEWAY_LABEL: &str = "com.panbagnat.gateway";
pub const SLUG_LABEL: &str = "com.panbagnat.gateway.slug";
pub const TARGET_LABEL: &str = "com.panbagnat.gateway.target";
pub const NETWORK_LABEL: &str = "com.panbagnat.gateway.network";

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker command failed: {0}")]
    Command(String),
    #[error("docker unavailable: {0}")]
    Unavailable(String),
}

/// A gateway container as it exists on the daemon.
#[derive(Debug, Clone)]
pub struct ActualGateway {
    pub name: String,
    pub slug: String,
    pub target: String,
    pub network: String,
}

#[derive(Debug, Clone)]
pub struct Inspection {
    pub running: bool,
    pub networks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

pub struct GatewayDocker;

impl GatewayDocker {
    async fn run(args: &[&str]) -> Result<String, DockerError> {
        let output = Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DockerError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(DockerError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// All gateway containers, keyed by their slug label.
    pub async fn list(&self) -> Result<HashMap<String, ActualGateway>, DockerError> {
        let stdout = Self::run(&[
            "ps",
            "-a",
            "--filter",
            "label=com.panbagnat.gateway=true",
            "--format",
            "{{json .}}",
        ])
        .await?;

        let mut gateways = HashMap::new();
        for line in stdout.lines() {
            let Ok(entry) = serde_json::from_str::<PsEntry>(line) else {
                continue;
            };
            let labels = parse_label_list(&entry.labels);
            let Some(slug) = labels.get(SLUG_LABEL) else {
                continue;
            };
            gateways.insert(
                slug.clone(),
                ActualGateway {
                    name: entry.names.clone(),
                    slug: slug.clone(),
                    target: labels.get(TARGET_LABEL).cloned().unwrap_or_default(),
                    network: labels.get(NETWORK_LABEL).cloned().unwrap_or_default(),
                },
            );
        }
        Ok(gateways)
    }

    /// Create and start a gateway for `spec`: labeled, restart
    /// unless-stopped, aliased on the shared network, running the heredoc
    /// nginx config. The module compose network is connected afterwards.
    pub async fn create(
        &self,
        spec: &GatewaySpec,
        shared_network: &str,
        image: &str,
        gateway_port: u16,
    ) -> Result<String, DockerError> {
        let name = gateway_name(&spec.slug);
        let script = nginx::startup_script(spec, gateway_port);
        let slug_label = format!("{SLUG_LABEL}={}", spec.slug);
        let target_label = format!("{TARGET_LABEL}={}", spec.target_url());
        let network_label = format!("{NETWORK_LABEL}={}", spec.network);

        Self::run(&[
            "run",
            "-d",
            "--name",
            name.as_str(),
            "--label",
            "com.panbagnat.gateway=true",
            "--label",
            slug_label.as_str(),
            "--label",
            target_label.as_str(),
            "--label",
            network_label.as_str(),
            "--restart",
            "unless-stopped",
            "--network",
            shared_network,
            "--network-alias",
            name.as_str(),
            "--entrypoint",
            "sh",
            image,
            "-c",
            script.as_str(),
        ])
        .await?;

        self.connect_network(&name, &spec.network).await?;
        Ok(name)
    }

    pub async fn connect_network(&self, container: &str, network: &str) -> Result<(), DockerError> {
        match Self::run(&["network", "connect", network, container]).await {
            Ok(_) => Ok(()),
            // Idempotent: already-connected is fine.
            Err(DockerError::Command(msg)) if msg.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn inspect(&self, container: &str) -> Result<Inspection, DockerError> {
        let stdout = Self::run(&["inspect", "--format", "{{json .}}", container]).await?;
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| DockerError::Command(format!("inspect parse: {e}")))?;
        let running = value
            .pointer("/State/Running")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let networks = value
            .pointer("/NetworkSettings/Networks")
            .and_then(|v| v.as_object())
            .map(|networks| networks.keys().cloned().collect())
            .unwrap_or_default();
        Ok(Inspection { running, networks })
    }

    pub async fn remove(&self, container: &str) -> Result<(), DockerError> {
        Self::run(&["rm", "-f", container]).await?;
        Ok(())
    }
}

/// `docker ps` renders labels as a `k=v,k=v` list.
fn parse_label_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_list_gateway_labels() {
        let labels = parse_label_list(
            "com.panbagnat.gateway=true,com.panbagnat.gateway.slug=app,\
             com.panbagnat.gateway.target=http://web:3000/,com.panbagnat.gateway.network=app_default",
        );
        assert_eq!(labels.get(SLUG_LABEL).unwrap(), "app");
        assert_eq!(labels.get(TARGET_LABEL).unwrap(), "http://web:3000/");
        assert_eq!(labels.get(NETWORK_LABEL).unwrap(), "app_default");
    }

    #[test]
    fn test_ps_entry_json() {
        let line = r#"{"Names":"gateway-app","Labels":"com.panbagnat.gateway=true,com.panbagnat.gateway.slug=app"}"#;
        let entry: PsEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.names, "gateway-app");
        assert!(entry.labels.contains("gateway.slug=app"));
    }
}
