use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Reserved id for user-supplied resources.
pub const CUSTOM_RESOURCE_ID: &str = "custom";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Model,
    Extension,
    Script,
    #[default]
    #[serde(other)]
    Custom,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Model => "model",
            ResourceKind::Extension => "extension",
            ResourceKind::Script => "script",
            ResourceKind::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "model" | "models" => Some(ResourceKind::Model),
            "extension" | "extensions" => Some(ResourceKind::Extension),
            "script" | "scripts" => Some(ResourceKind::Script),
            "custom" => Some(ResourceKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSize {
    Text(String),
    Measured { value: f64, unit: String },
}

impl fmt::Display for ResourceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSize::Text(text) => f.write_str(text),
            ResourceSize::Measured { value, unit } => write!(f, "{value} {unit}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<ResourceSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Resource {
    pub fn custom(url: &str, name: &str, description: Option<&str>) -> Self {
        Self {
            id: CUSTOM_RESOURCE_ID.to_string(),
            name: name.trim().to_string(),
            kind: ResourceKind::Custom,
            url: Some(url.trim().to_string()),
            size: None,
            description: description
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            tags: Vec::new(),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_RESOURCE_ID || self.kind == ResourceKind::Custom
    }

    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Catalog entry as served by `/preset-resources`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub url: Option<String>,
    pub size: Option<ResourceSize>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub filename: Option<String>,
    pub destination_path: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
}

impl PresetResource {
    /// Name shown and sent to the backend; a server filename wins over the label.
    pub fn display_name(&self) -> &str {
        self.filename
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn to_resource(&self) -> Resource {
        Resource {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            kind: self.kind,
            url: self.url.clone(),
            size: self.size.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallDestination {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Destination entry as served by `/installation-destinations`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DestinationEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl DestinationEntry {
    pub fn into_destination(self) -> InstallDestination {
        InstallDestination {
            id: self.path.clone(),
            name: capitalize(&self.kind),
            path: self.path,
            kind: self.kind,
        }
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Installing,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Installing => "installing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the status poller for a task is alive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PollHealth {
    #[default]
    Idle,
    Polling,
    /// The poller fail-stopped; the status shown is the last one observed.
    Stalled,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallTask {
    pub id: String,
    pub resource: Resource,
    pub destination: InstallDestination,
    pub status: TaskStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub poll_health: PollHealth,
}

impl InstallTask {
    pub fn pending(
        id: String,
        resource: Resource,
        destination: InstallDestination,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            resource,
            destination,
            status: TaskStatus::Pending,
            progress: 0.0,
            error: None,
            start_time: now,
            end_time: None,
            poll_health: PollHealth::Idle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_stalled(&self) -> bool {
        self.poll_health == PollHealth::Stalled && !self.is_terminal()
    }

    /// Elapsed time as `1m 5s` / `42s`, measured to `end_time` or `now`.
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> String {
        let end = self.end_time.unwrap_or(now);
        let seconds = (end - self.start_time).num_seconds().max(0);
        let minutes = seconds / 60;
        let remaining = seconds % 60;
        if minutes > 0 {
            format!("{minutes}m {remaining}s")
        } else {
            format!("{remaining}s")
        }
    }
}

/// Task object from `/installer/tasks`.
///
/// Older backends flatten the resource and destination into
/// `url/name/path/type`; both shapes are accepted.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskPayload {
    pub id: String,
    pub resource: Option<Resource>,
    pub destination: Option<InstallDestination>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: f64,
    pub error: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl TaskPayload {
    pub fn into_task(self, now: DateTime<Utc>) -> InstallTask {
        let kind = self.kind.clone().unwrap_or_default();
        let resource = self.resource.unwrap_or_else(|| Resource {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_default(),
            kind: ResourceKind::parse(&kind).unwrap_or_default(),
            url: self.url.clone(),
            ..Resource::default()
        });
        let destination = self.destination.unwrap_or_else(|| {
            let path = self.path.clone().unwrap_or_default();
            DestinationEntry { kind, path }.into_destination()
        });
        let status = self.status.unwrap_or(TaskStatus::Unknown);
        let terminal = status.is_terminal();
        let error = if status == TaskStatus::Failed {
            Some(non_empty_error(self.error))
        } else {
            None
        };
        let start_time = self
            .start_time
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);
        let end_time = if terminal {
            Some(
                self.end_time
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or(now),
            )
        } else {
            None
        };
        InstallTask {
            id: self.id,
            resource,
            destination,
            status,
            progress: clamp_progress(self.progress),
            error,
            start_time,
            end_time,
            poll_health: PollHealth::Idle,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResourceSummary {
    pub name: String,
}

/// Body of `/installer/status`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub resource: Option<ResourceSummary>,
    #[serde(default)]
    pub name: Option<String>,
}

impl StatusReport {
    pub fn resource_name(&self) -> Option<&str> {
        self.resource
            .as_ref()
            .map(|resource| resource.name.as_str())
            .or(self.name.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAccepted {
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct InstallRequest<'a> {
    pub(crate) resource: &'a Resource,
    pub(crate) destination: &'a InstallDestination,
}

#[derive(Serialize)]
pub(crate) struct CancelRequest<'a> {
    #[serde(rename = "taskId")]
    pub(crate) task_id: &'a str,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub(crate) struct PresetResourcesResponse {
    pub(crate) resources: Vec<PresetResource>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub(crate) struct DestinationsResponse {
    pub(crate) destinations: Vec<DestinationEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub active_connections: u64,
    pub system_uptime: String,
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub disk_usage: f64,
    pub requests_per_minute: u64,
    pub error_rate: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentActivity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dashboard {
    pub stats: DashboardStats,
    pub recent_activity: Vec<RecentActivity>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Health {
    pub status: String,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(value) => Some(value.with_timezone(&Utc)),
        Err(err) => {
            warn!("Ignoring unparseable timestamp '{trimmed}': {err}");
            None
        }
    }
}

pub(crate) fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

pub(crate) const GENERIC_FAILURE: &str = "Unknown error occurred";

pub(crate) fn non_empty_error(error: Option<String>) -> String {
    error
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}
