//! API models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Register request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Access + refresh token pair issued by login, register and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Current user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub id: i64,
    pub email: String,
    pub user_slug: String,
}

/// Theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// User settings as stored by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub theme: Option<Theme>,
}

/// Theme update body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeUpdate {
    pub theme: Theme,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OkResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub warnings: Vec<serde_json::Value>,
}

/// Cluster health report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterHealth {
    #[serde(default)]
    pub k8s: bool,
    #[serde(default)]
    pub ingress: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ClusterHealth {
    pub fn is_healthy(&self) -> bool {
        self.k8s && self.ingress
    }
}

/// Server flavour backing a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    #[default]
    Nginx,
    #[serde(alias = "httpd")]
    Apache,
    Tomcat,
}

impl ServerType {
    /// Whether a custom index page can be served
    pub fn accepts_index_html(&self) -> bool {
        !matches!(self, ServerType::Tomcat)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerType::Nginx => "nginx",
            ServerType::Apache => "apache",
            ServerType::Tomcat => "tomcat",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ServerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nginx" => Ok(ServerType::Nginx),
            "apache" | "httpd" => Ok(ServerType::Apache),
            "tomcat" => Ok(ServerType::Tomcat),
            _ => Err(format!("Invalid server type: {}", s)),
        }
    }
}

/// Deployment lifecycle status.
///
/// `Deleting` is reported by the server while a delete is in progress and is
/// also derived on the client while a soft delete is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Creating,
    Ready,
    Error,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl DeploymentStatus {
    /// `READY` and `ERROR` end a reconciliation attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Ready | DeploymentStatus::Error)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentStatus::Creating => "CREATING",
            DeploymentStatus::Ready => "READY",
            DeploymentStatus::Error => "ERROR",
            DeploymentStatus::Deleting => "DELETING",
            DeploymentStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Create deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCreate {
    pub display_name: String,
    pub server_type: ServerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Deployment as returned by list, get, create and scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub display_name: String,
    pub slug: String,
    pub namespace: String,
    pub unique_id: String,
    pub ingress_host: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub server_type: Option<ServerType>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub ready_replicas: Option<u32>,
    #[serde(default)]
    pub available_replicas: Option<u32>,
    #[serde(default)]
    pub updated_replicas: Option<u32>,
    #[serde(default)]
    pub endpoints: Option<u32>,
}

impl Deployment {
    /// Public URL served by the tenant ingress
    pub fn url(&self) -> Option<String> {
        if self.ingress_host.is_empty() {
            None
        } else {
            Some(format!("https://{}", self.ingress_host))
        }
    }
}

/// Live replica counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub ready_replicas: Option<u32>,
    #[serde(default)]
    pub available_replicas: Option<u32>,
    #[serde(default)]
    pub updated_replicas: Option<u32>,
    #[serde(default)]
    pub endpoints: Option<u32>,
    #[serde(default)]
    pub pods: Vec<PodSummary>,
}

/// Per-pod line of a deployment report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub ready: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub restarts: u32,
}

/// Body of `GET /deployments/{id}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatusOut {
    pub id: Uuid,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub ready_replicas: Option<u32>,
    #[serde(default)]
    pub available_replicas: Option<u32>,
    #[serde(default)]
    pub updated_replicas: Option<u32>,
    #[serde(default)]
    pub endpoints: Option<u32>,
    #[serde(default)]
    pub pods: Option<Vec<PodSummary>>,
}

/// Body of `GET /deployments/{id}/details`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDetails {
    #[serde(default)]
    pub report: DeploymentReport,
    #[serde(default)]
    pub pods: Vec<PodDetail>,
    #[serde(default)]
    pub events: Vec<ClusterEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDetail {
    pub name: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerState>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Kubernetes event recorded against a pod of the deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "firstTimestamp", default)]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "lastTimestamp", default)]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: Option<u32>,
}

/// Scale request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub replicas: u32,
}

/// One `data:` payload of the live status channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub report: DeploymentReport,
    /// Log tail per pod, then per container
    #[serde(default)]
    pub logs: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub ts: Option<DateTime<Utc>>,
}

/// Lines kept per container when flattening a log tail
pub const LOG_TAIL_LINES: usize = 40;

impl StatusEvent {
    /// Log tail flattened to `pod:container | line`, at most
    /// [`LOG_TAIL_LINES`] per container
    pub fn log_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (pod, containers) in &self.logs {
            for (container, text) in containers {
                let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
                let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
                out.extend(
                    lines[skip..]
                        .iter()
                        .map(|line| format!("{}:{} | {}", pod, container, line)),
                );
            }
        }
        out
    }
}

/// Error body of a non-success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: serde_json::Value,
}

impl ErrorResponse {
    /// Human readable message; validation errors carry a list instead of a string
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
