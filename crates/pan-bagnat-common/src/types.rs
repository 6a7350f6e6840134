//! Entity types backed by the relational store, plus the ephemeral runtime
//! types shared between the backend, the gateway controller and the proxy.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

/// Decode a text column into one of our `FromStr` enums, surfacing parse
/// failures as column-decode errors instead of panics.
fn decode_enum<T>(row: &PgRow, col: &str) -> sqlx::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(col)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: e.into(),
    })
}

// ── Modules ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Cloning,
    WaitingForDeploy,
    Disabled,
    Enabled,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloning => "cloning",
            Self::WaitingForDeploy => "waiting_for_deploy",
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
        }
    }
}

impl FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloning" => Ok(Self::Cloning),
            "waiting_for_deploy" => Ok(Self::WaitingForDeploy),
            "disabled" => Ok(Self::Disabled),
            "enabled" => Ok(Self::Enabled),
            _ => Err(format!("Invalid module status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    None,
    Pending,
    Success,
    Failed,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DeployStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid deploy status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub git_url: String,
    pub git_branch: String,
    pub ssh_key_id: Option<String>,
    pub status: ModuleStatus,
    pub is_deploying: bool,
    pub last_deploy: Option<DateTime<Utc>>,
    pub last_deploy_status: DeployStatus,
    pub current_commit_hash: Option<String>,
    pub current_commit_subject: Option<String>,
    pub latest_commit_hash: Option<String>,
    pub latest_commit_subject: Option<String>,
    pub late_commits: i32,
    pub git_last_fetch: Option<DateTime<Utc>>,
    pub git_last_pull: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, PgRow> for Module {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            git_url: row.try_get("git_url")?,
            git_branch: row.try_get("git_branch")?,
            ssh_key_id: row.try_get("ssh_key_id")?,
            status: decode_enum(row, "status")?,
            is_deploying: row.try_get("is_deploying")?,
            last_deploy: row.try_get("last_deploy")?,
            last_deploy_status: decode_enum(row, "last_deploy_status")?,
            current_commit_hash: row.try_get("current_commit_hash")?,
            current_commit_subject: row.try_get("current_commit_subject")?,
            latest_commit_hash: row.try_get("latest_commit_hash")?,
            latest_commit_subject: row.try_get("latest_commit_subject")?,
            late_commits: row.try_get("late_commits")?,
            git_last_fetch: row.try_get("git_last_fetch")?,
            git_last_pull: row.try_get("git_last_pull")?,
            last_update: row.try_get("last_update")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// ── Module pages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePage {
    pub id: String,
    pub module_id: String,
    pub slug: String,
    pub url: String,
    pub is_public: bool,
    pub target_container: Option<String>,
    pub target_port: Option<i32>,
    pub network_name: Option<String>,
    pub icon_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModulePage {
    /// A page is routable when it names a target container, a valid port
    /// and a compose network.
    pub fn is_routable(&self) -> bool {
        let container_ok = self
            .target_container
            .as_deref()
            .is_some_and(|c| !c.is_empty());
        let port_ok = self.target_port.is_some_and(|p| (1..=65535).contains(&p));
        let network_ok = self.network_name.as_deref().is_some_and(|n| !n.is_empty());
        container_ok && port_ok && network_ok
    }
}

impl sqlx::FromRow<'_, PgRow> for ModulePage {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            module_id: row.try_get("module_id")?,
            slug: row.try_get("slug")?,
            url: row.try_get("url")?,
            is_public: row.try_get("is_public")?,
            target_container: row.try_get("target_container")?,
            target_port: row.try_get("target_port")?,
            network_name: row.try_get("network_name")?,
            icon_url: row.try_get("icon_url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Desired state of one gateway container, derived from a routable page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySpec {
    pub slug: String,
    pub module_id: String,
    pub module_slug: String,
    pub network: String,
    pub target_container: String,
    pub target_port: i32,
}

impl GatewaySpec {
    /// Build the spec for a routable page; `None` when the page is missing
    /// any routing field.
    pub fn from_page(page: &ModulePage, module_slug: &str) -> Option<Self> {
        if !page.is_routable() {
            return None;
        }
        Some(Self {
            slug: page.slug.clone(),
            module_id: page.module_id.clone(),
            module_slug: module_slug.to_string(),
            network: page.network_name.clone()?,
            target_container: page.target_container.clone()?,
            target_port: page.target_port?,
        })
    }

    /// Upstream URL the gateway forwards to.
    pub fn target_url(&self) -> String {
        format!("http://{}:{}/", self.target_container, self.target_port)
    }
}

/// Status of a gateway container as reported by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_networks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_networks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reattached: Option<bool>,
}

// ── SSH keys ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    pub public_key: String,
    /// Never serialized outward.
    #[serde(skip_serializing)]
    pub private_key: String,
    pub user_id: Option<String>,
    pub module_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, PgRow> for SshKey {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            public_key: row.try_get("public_key")?,
            private_key: row.try_get("private_key")?,
            user_id: row.try_get("user_id")?,
            module_id: row.try_get("module_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyEvent {
    pub id: i64,
    pub ssh_key_id: String,
    pub message: String,
    pub actor_user: Option<String>,
    pub actor_module: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, PgRow> for SshKeyEvent {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            ssh_key_id: row.try_get("ssh_key_id")?,
            message: row.try_get("message")?,
            actor_user: row.try_get("actor_user")?,
            actor_module: row.try_get("actor_module")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// ── Sessions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub ft_login: String,
    pub user_agent: String,
    pub ip: String,
    pub device_label: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

impl sqlx::FromRow<'_, PgRow> for Session {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            ft_login: row.try_get("ft_login")?,
            user_agent: row.try_get("user_agent")?,
            ip: row.try_get("ip")?,
            device_label: row.try_get("device_label")?,
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

// ── Module logs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleLog {
    pub id: i64,
    pub module_id: String,
    pub level: LogLevel,
    pub message: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, PgRow> for ModuleLog {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            module_id: row.try_get("module_id")?,
            level: decode_enum(row, "level")?,
            message: row.try_get("message")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// ── Ephemeral git state ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitStatus {
    pub branch: String,
    pub head: String,
    pub head_subject: String,
    pub is_merging: bool,
    pub conflicts: Vec<String>,
    pub modified: Vec<String>,
    pub latest_hash: String,
    pub latest_subject: String,
    pub behind: i32,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_pull: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub subject: String,
}

// ── Container runtime state ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Paused,
    Created,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Created => "created",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }

    /// Map a Docker event action onto a container status, given the
    /// previous status.
    ///
    /// `health_status` events carry the health in the action suffix
    /// (`health_status: healthy`); anything unrecognized keeps `prev`.
    pub fn from_action(action: &str, prev: ContainerStatus) -> ContainerStatus {
        if let Some(health) = action.strip_prefix("health_status") {
            return match health.trim_start_matches(':').trim() {
                "healthy" => Self::Running,
                "unhealthy" => Self::Dead,
                _ => prev,
            };
        }
        match action {
            "start" | "restart" | "unpause" => Self::Running,
            "stop" | "die" => Self::Exited,
            "kill" => {
                if prev == Self::Running {
                    Self::Restarting
                } else {
                    Self::Exited
                }
            }
            "destroy" => Self::Dead,
            "pause" => Self::Paused,
            "create" => Self::Created,
            _ => prev,
        }
    }

    /// Map a `docker ps` state word (`running`, `exited`, ...) onto a status.
    pub fn from_state(state: &str) -> ContainerStatus {
        match state {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "created" => Self::Created,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "created" => Ok(Self::Created),
            "restarting" => Ok(Self::Restarting),
            "exited" => Ok(Self::Exited),
            "dead" => Ok(Self::Dead),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid container status: {s}")),
        }
    }
}

/// Live state of one compose container, keyed `"<module_slug>/<service>"`
/// in the runtime map. Cleared on `destroy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub module_id: String,
    pub service: String,
    pub action: String,
    pub status: ContainerStatus,
    pub updated_at: DateTime<Utc>,
}

/// Payload published on `module:<id>` topics when a container changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerPayload {
    pub name: String,
    pub service: String,
    pub status: ContainerStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

// ── Live event envelope ──────────────────────────────────────────────

/// Envelope pushed through the shared event channel and fanned out to
/// WebSocket subscribers. Also the accepted webhook ingress body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Routing key; `None` or empty broadcasts to every connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: &str, topic: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            module_id: None,
            topic,
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ── Users (proxy auth join) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub ft_login: String,
}

impl sqlx::FromRow<'_, PgRow> for User {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            ft_login: row.try_get("ft_login")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_status_roundtrip() {
        for s in ["cloning", "waiting_for_deploy", "disabled", "enabled"] {
            assert_eq!(s.parse::<ModuleStatus>().unwrap().as_str(), s);
        }
        assert!("bogus".parse::<ModuleStatus>().is_err());
    }

    #[test]
    fn test_deploy_status_empty_string() {
        assert_eq!("".parse::<DeployStatus>().unwrap(), DeployStatus::None);
        assert_eq!(DeployStatus::None.as_str(), "");
    }

    #[test]
    fn test_page_routability() {
        let mut page = ModulePage {
            id: "page_1".into(),
            module_id: "module_1".into(),
            slug: "app".into(),
            url: "/".into(),
            is_public: true,
            target_container: Some("web".into()),
            target_port: Some(3000),
            network_name: Some("app_default".into()),
            icon_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(page.is_routable());

        page.target_port = Some(0);
        assert!(!page.is_routable());
        page.target_port = Some(65536);
        assert!(!page.is_routable());
        page.target_port = Some(3000);

        page.target_container = Some(String::new());
        assert!(!page.is_routable());
        page.target_container = None;
        assert!(!page.is_routable());
    }

    #[test]
    fn test_gateway_spec_from_page() {
        let page = ModulePage {
            id: "page_1".into(),
            module_id: "module_1".into(),
            slug: "app".into(),
            url: "/".into(),
            is_public: false,
            target_container: Some("web".into()),
            target_port: Some(3000),
            network_name: Some("app_default".into()),
            icon_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let spec = GatewaySpec::from_page(&page, "demo").unwrap();
        assert_eq!(spec.target_url(), "http://web:3000/");
        assert_eq!(spec.module_slug, "demo");
    }

    #[test]
    fn test_container_status_from_action() {
        use ContainerStatus::*;
        assert_eq!(ContainerStatus::from_action("start", Unknown), Running);
        assert_eq!(ContainerStatus::from_action("unpause", Paused), Running);
        assert_eq!(ContainerStatus::from_action("stop", Running), Exited);
        assert_eq!(ContainerStatus::from_action("die", Running), Exited);
        assert_eq!(ContainerStatus::from_action("kill", Running), Restarting);
        assert_eq!(ContainerStatus::from_action("kill", Exited), Exited);
        assert_eq!(ContainerStatus::from_action("destroy", Running), Dead);
        assert_eq!(ContainerStatus::from_action("pause", Running), Paused);
        assert_eq!(ContainerStatus::from_action("create", Unknown), Created);
        assert_eq!(
            ContainerStatus::from_action("health_status: healthy", Exited),
            Running
        );
        assert_eq!(
            ContainerStatus::from_action("health_status: unhealthy", Running),
            Dead
        );
        assert_eq!(
            ContainerStatus::from_action("health_status: starting", Paused),
            Paused
        );
        assert_eq!(ContainerStatus::from_action("weird", Paused), Paused);
    }

    #[test]
    fn test_ssh_key_private_key_not_serialized() {
        let key = SshKey {
            id: "sshkey_1".into(),
            name: "deploy".into(),
            public_key: "ssh-ed25519 AAA".into(),
            private_key: "SECRET".into(),
            user_id: None,
            module_id: Some("module_1".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: None,
        };
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("SECRET"));
        assert!(!json.contains("private_key"));
    }

    #[test]
    fn test_event_wire_format() {
        let event = Event::new("module_status_changed", None, serde_json::json!({"x": 1}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"module_status_changed\""));
        assert!(!json.contains("\"topic\""));
    }
}
