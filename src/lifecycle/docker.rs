//! Docker Compose operations for one module.
//!
//! The compose project label is the module slug; containers are named
//! `<slug>-<service>-1`. Builds and deploys stream into the module log,
//! listing parses the `docker ps` `name|status-phrase` format.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::types::ContainerStatus;

use super::command::{ShellCommand, run_capture_checked, run_checked};
use super::logger::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Remove,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "rm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "rm" | "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// One container of a module, as listed by `docker ps`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleContainer {
    pub name: String,
    pub service: String,
    pub status: ContainerStatus,
    pub reason: String,
    pub since: String,
}

pub struct ComposeProject {
    slug: String,
    dir: PathBuf,
}

impl ComposeProject {
    pub fn new(slug: &str, dir: PathBuf) -> Self {
        Self {
            slug: slug.to_string(),
            dir,
        }
    }

    fn compose(&self) -> ShellCommand {
        ShellCommand::new("docker")
            .args(["compose", "-f", "docker-compose.yml"])
            .current_dir(&self.dir)
    }

    pub async fn build(&self, sink: Arc<dyn LogSink>) -> Result<()> {
        run_checked(&self.compose().arg("build"), sink, None).await?;
        Ok(())
    }

    pub async fn up(&self, sink: Arc<dyn LogSink>) -> Result<()> {
        run_checked(&self.compose().args(["up", "-d"]), sink, None).await?;
        Ok(())
    }

    /// Full teardown: containers, volumes, orphans and images.
    pub async fn down_full(&self, sink: Arc<dyn LogSink>) -> Result<()> {
        run_checked(
            &self
                .compose()
                .args(["down", "--volumes", "--remove-orphans", "--rmi", "all"]),
            sink,
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn image_prune(&self, sink: Arc<dyn LogSink>) -> Result<()> {
        run_checked(
            &ShellCommand::new("docker").args(["image", "prune", "-af"]),
            sink,
            None,
        )
        .await?;
        Ok(())
    }

    /// List the module's containers via the compose project label.
    pub async fn containers(&self) -> Result<Vec<ModuleContainer>> {
        let filter = format!("label=com.docker.compose.project={}", self.slug);
        let cmd = ShellCommand::new("docker").args([
            "ps",
            "-a",
            "--filter",
            filter.as_str(),
            "--format",
            "{{.Names}}|{{.Status}}",
        ]);
        let captured = run_capture_checked(&cmd)
            .await
            .map_err(|e| Error::DockerUnavailable(e.to_string()))?;
        Ok(captured
            .stdout
            .lines()
            .filter_map(|line| parse_ps_line(&self.slug, line))
            .collect())
    }

    /// Start/stop/restart/remove one service container.
    pub async fn container_action(
        &self,
        service: &str,
        action: ContainerAction,
        sink: Arc<dyn LogSink>,
    ) -> Result<()> {
        let container = format!("{}-{}-1", self.slug, service);
        let mut cmd = ShellCommand::new("docker").arg(action.as_str());
        if action == ContainerAction::Remove {
            cmd = cmd.arg("-f");
        }
        cmd = cmd.arg(container);
        run_checked(&cmd, sink, None).await?;
        Ok(())
    }
}

/// Parse one `name|status-phrase` line from `docker ps`.
fn parse_ps_line(slug: &str, line: &str) -> Option<ModuleContainer> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (name, phrase) = line.split_once('|')?;
    let service = service_of(slug, name).unwrap_or_else(|| name.to_string());
    let (status, reason, since) = parse_status_phrase(phrase);
    Some(ModuleContainer {
        name: name.to_string(),
        service,
        status,
        reason,
        since,
    })
}

/// Extract the compose service name from `<slug>-<service>-1`.
fn service_of(slug: &str, container_name: &str) -> Option<String> {
    let rest = container_name.strip_prefix(slug)?.strip_prefix('-')?;
    let (service, _index) = rest.rsplit_once('-')?;
    if service.is_empty() {
        return None;
    }
    Some(service.to_string())
}

/// Derive `(status, reason, since)` from a `docker ps` status phrase.
fn parse_status_phrase(phrase: &str) -> (ContainerStatus, String, String) {
    let p = phrase.trim();
    if p.contains("(Paused)") || p.starts_with("Paused") {
        let since = p.strip_prefix("Up ").unwrap_or("").replace("(Paused)", "");
        return (
            ContainerStatus::Paused,
            "paused".to_string(),
            since.trim().to_string(),
        );
    }
    if let Some(rest) = p.strip_prefix("Up ") {
        return (
            ContainerStatus::Running,
            "up".to_string(),
            rest.trim().to_string(),
        );
    }
    if p == "Up" {
        return (ContainerStatus::Running, "up".to_string(), String::new());
    }
    if let Some(rest) = p.strip_prefix("Exited ") {
        let (code, since) = split_code_and_since(rest);
        return (ContainerStatus::Exited, format!("exited {code}").trim().to_string(), since);
    }
    if let Some(rest) = p.strip_prefix("Restarting ") {
        let (code, since) = split_code_and_since(rest);
        return (
            ContainerStatus::Restarting,
            format!("restarting {code}").trim().to_string(),
            since,
        );
    }
    if p.starts_with("Created") {
        return (ContainerStatus::Created, "created".to_string(), String::new());
    }
    if p.starts_with("Dead") {
        return (ContainerStatus::Dead, "dead".to_string(), String::new());
    }
    (ContainerStatus::Unknown, p.to_lowercase(), String::new())
}

/// Split `"(137) 2 hours ago"` into the exit code part and the time part.
fn split_code_and_since(rest: &str) -> (String, String) {
    let rest = rest.trim();
    if let Some(close) = rest.find(')') {
        let (code, since) = rest.split_at(close + 1);
        (code.to_string(), since.trim().to_string())
    } else {
        (String::new(), rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_line_running() {
        let c = parse_ps_line("demo", "demo-web-1|Up 3 hours").unwrap();
        assert_eq!(c.name, "demo-web-1");
        assert_eq!(c.service, "web");
        assert_eq!(c.status, ContainerStatus::Running);
        assert_eq!(c.reason, "up");
        assert_eq!(c.since, "3 hours");
    }

    #[test]
    fn test_parse_ps_line_exited_with_code() {
        let c = parse_ps_line("demo", "demo-worker-1|Exited (137) 2 days ago").unwrap();
        assert_eq!(c.service, "worker");
        assert_eq!(c.status, ContainerStatus::Exited);
        assert_eq!(c.reason, "exited (137)");
        assert_eq!(c.since, "2 days ago");
    }

    #[test]
    fn test_parse_ps_line_paused() {
        let c = parse_ps_line("demo", "demo-web-1|Up 10 minutes (Paused)").unwrap();
        assert_eq!(c.status, ContainerStatus::Paused);
        assert_eq!(c.since, "10 minutes");
    }

    #[test]
    fn test_parse_ps_line_created_restarting_dead() {
        assert_eq!(
            parse_ps_line("m", "m-a-1|Created").unwrap().status,
            ContainerStatus::Created
        );
        let restarting = parse_ps_line("m", "m-a-1|Restarting (1) 5 seconds ago").unwrap();
        assert_eq!(restarting.status, ContainerStatus::Restarting);
        assert_eq!(restarting.since, "5 seconds ago");
        assert_eq!(
            parse_ps_line("m", "m-a-1|Dead").unwrap().status,
            ContainerStatus::Dead
        );
    }

    #[test]
    fn test_parse_ps_line_unknown_phrase() {
        let c = parse_ps_line("m", "m-a-1|Removal In Progress").unwrap();
        assert_eq!(c.status, ContainerStatus::Unknown);
        assert_eq!(c.reason, "removal in progress");
    }

    #[test]
    fn test_parse_ps_line_malformed() {
        assert!(parse_ps_line("m", "no-separator-here").is_none());
        assert!(parse_ps_line("m", "").is_none());
    }

    #[test]
    fn test_service_of() {
        assert_eq!(service_of("demo", "demo-web-1"), Some("web".to_string()));
        assert_eq!(
            service_of("demo", "demo-my-worker-1"),
            Some("my-worker".to_string())
        );
        assert_eq!(service_of("demo", "other-web-1"), None);
    }

    #[test]
    fn test_container_action_parse() {
        assert_eq!(ContainerAction::parse("start"), Some(ContainerAction::Start));
        assert_eq!(ContainerAction::parse("rm"), Some(ContainerAction::Remove));
        assert_eq!(ContainerAction::parse("exec"), None);
    }
}
