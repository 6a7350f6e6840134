//! The long-lived `docker events` subscription and the preload pass.
//!
//! Filters: container events carrying the compose project label, further
//! restricted to projects whose working dir or config files live under the
//! repo base (or `/repos`) so foreign compose projects on the same daemon
//! are ignored. `exec_*` actions are noise and dropped up front.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use pan_bagnat_common::topics::module_topic;
use pan_bagnat_common::types::{ContainerPayload, ContainerState, ContainerStatus, Event};

use super::Fabric;

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";
const WORKING_DIR_LABEL: &str = "com.docker.compose.project.working_dir";
const CONFIG_FILES_LABEL: &str = "com.docker.compose.project.config_files";

/// Delay before the events stream is reopened after it closes.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventActor {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DockerEvent {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,
    #[serde(default)]
    pub time: i64,
}

/// One `docker ps --format '{{json .}}'` line used by the preload pass.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "State", default)]
    state: String,
}

/// Refill the runtime state map from the live daemon at process start.
pub(crate) async fn preload(fabric: &Arc<Fabric>) {
    let filter = format!("label={PROJECT_LABEL}");
    let output = Command::new("docker")
        .args(["ps", "-a", "--filter", filter.as_str(), "--format", "{{json .}}"])
        .output()
        .await;
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                "container preload failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return;
        }
        Err(e) => {
            warn!("container preload failed to run docker: {e}");
            return;
        }
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Ok(entry) = serde_json::from_str::<PsEntry>(line) else {
            continue;
        };
        let labels = parse_label_list(&entry.labels);
        let Some(slug) = labels.get(PROJECT_LABEL) else {
            continue;
        };
        let service = match labels.get(SERVICE_LABEL) {
            Some(service) => service.clone(),
            None => continue,
        };
        if !path_matches(fabric, &labels) {
            continue;
        }
        let Some(module_id) = fabric.resolve_module(slug).await else {
            debug!(slug = %slug, "preload: unknown compose project, skipping");
            continue;
        };
        let key = Fabric::state_key(slug, &service);
        fabric.put_state(
            key,
            ContainerState {
                id: entry.id.clone(),
                name: entry.names.clone(),
                module_id,
                service,
                action: "preload".to_string(),
                status: ContainerStatus::from_state(&entry.state),
                updated_at: Utc::now(),
            },
        );
    }
}

/// Spawn the subscription loop: read `docker events` line by line, handle
/// each, and reopen the stream 2s after it closes or errors.
pub(crate) fn spawn_event_loop(fabric: Arc<Fabric>) {
    tokio::spawn(async move {
        loop {
            match run_subscription(&fabric).await {
                Ok(()) => debug!("docker events stream closed, reconnecting"),
                Err(e) => warn!("docker events stream failed: {e}, reconnecting"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });
}

async fn run_subscription(fabric: &Arc<Fabric>) -> std::io::Result<()> {
    let filter = format!("label={PROJECT_LABEL}");
    let mut child = Command::new("docker")
        .args([
            "events",
            "--filter",
            "type=container",
            "--filter",
            filter.as_str(),
            "--format",
            "{{json .}}",
        ])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return Ok(());
    };
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(event) = serde_json::from_str::<DockerEvent>(&line) else {
            continue;
        };
        handle_event(fabric, event).await;
    }
    let _ = child.wait().await;
    Ok(())
}

pub(crate) async fn handle_event(fabric: &Arc<Fabric>, event: DockerEvent) {
    if event.kind != "container" || event.action.starts_with("exec_") {
        return;
    }
    let labels = &event.actor.attributes;
    let Some(slug) = labels.get(PROJECT_LABEL) else {
        return;
    };
    let Some(service) = labels.get(SERVICE_LABEL) else {
        return;
    };
    if !path_matches(fabric, labels) {
        return;
    }
    let Some(module_id) = fabric.resolve_module(slug).await else {
        debug!(slug = %slug, action = %event.action, "event for unknown module dropped");
        return;
    };

    let key = Fabric::state_key(slug, service);
    let when = event_time(event.time);
    let container_name = labels
        .get("name")
        .cloned()
        .unwrap_or_else(|| format!("{slug}-{service}-1"));

    let payload = if event.action == "destroy" {
        fabric.remove_state(&key);
        ContainerPayload {
            name: container_name,
            service: service.clone(),
            status: ContainerStatus::Dead,
            reason: "destroy".to_string(),
            since: None,
        }
    } else {
        let prev = fabric
            .get_state(&key)
            .map(|s| s.status)
            .unwrap_or(ContainerStatus::Unknown);
        let status = ContainerStatus::from_action(&event.action, prev);
        fabric.put_state(
            key,
            ContainerState {
                id: event.actor.id.clone(),
                name: container_name.clone(),
                module_id: module_id.clone(),
                service: service.clone(),
                action: event.action.clone(),
                status,
                updated_at: when,
            },
        );
        ContainerPayload {
            name: container_name,
            service: service.clone(),
            status,
            reason: event.action.clone(),
            since: Some(when),
        }
    };

    let mut out = Event::new(
        "container_status",
        Some(module_topic(&module_id)),
        serde_json::to_value(&payload).unwrap_or_default(),
    );
    out.module_id = Some(module_id);
    out.timestamp = when;
    fabric.registry.push(out);
}

/// Compose project must live under the repo base (or `/repos`).
fn path_matches(fabric: &Fabric, labels: &HashMap<String, String>) -> bool {
    let base = fabric.repo_base.as_str();
    let matches = |value: &String| value.contains(base) || value.contains("/repos");
    labels.get(WORKING_DIR_LABEL).is_some_and(matches)
        || labels.get(CONFIG_FILES_LABEL).is_some_and(matches)
}

/// `docker ps` renders labels as a `k=v,k=v` list.
fn parse_label_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

fn event_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_list() {
        let labels = parse_label_list(
            "com.docker.compose.project=demo,com.docker.compose.service=web,other=1",
        );
        assert_eq!(labels.get(PROJECT_LABEL).unwrap(), "demo");
        assert_eq!(labels.get(SERVICE_LABEL).unwrap(), "web");
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_parse_label_list_empty() {
        assert!(parse_label_list("").is_empty());
    }

    #[test]
    fn test_docker_event_json_shape() {
        let line = r#"{"status":"start","id":"abc","Type":"container","Action":"start",
            "Actor":{"ID":"abc","Attributes":{"com.docker.compose.project":"demo",
            "com.docker.compose.service":"web","name":"demo-web-1"}},"time":1700000000}"#;
        let event: DockerEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, "container");
        assert_eq!(event.action, "start");
        assert_eq!(
            event.actor.attributes.get(PROJECT_LABEL).unwrap(),
            "demo"
        );
        assert_eq!(event.time, 1_700_000_000);
    }

    #[test]
    fn test_event_time_fallback() {
        let t = event_time(1_700_000_000);
        assert_eq!(t.timestamp(), 1_700_000_000);
    }
}
