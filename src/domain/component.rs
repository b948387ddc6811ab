//! Supervised component records as stored in the coordination store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of supervised component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Fixed-interval job
    Job,
    /// Long-running background service (HTTP API etc.)
    Service,
    /// Long-running stream collector
    Stream,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Job => "job",
            ComponentKind::Service => "service",
            ComponentKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job" => Ok(ComponentKind::Job),
            "service" => Ok(ComponentKind::Service),
            "stream" => Ok(ComponentKind::Stream),
            other => Err(format!("unknown component kind: {other}")),
        }
    }
}

/// Static catalog entry, upserted at every process start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub kind: ComponentKind,
    pub group: String,
    pub description: String,
    pub expected_interval_ms: Option<i64>,
    pub default_enabled: bool,
}

impl ComponentDefinition {
    pub fn new(id: &str, kind: ComponentKind, group: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            group: group.to_string(),
            description: description.to_string(),
            expected_interval_ms: None,
            default_enabled: true,
        }
    }

    pub fn with_expected_interval(mut self, interval: Duration) -> Self {
        self.expected_interval_ms = Some(interval.as_millis() as i64);
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }
}

/// Operator override of the enabled flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSetting {
    pub component_id: String,
    pub enabled: bool,
    pub updated_by: Option<String>,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Status value written into heartbeat rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Idle,
    Running,
    Disabled,
    Error,
    Locked,
}

impl HeartbeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatStatus::Idle => "idle",
            HeartbeatStatus::Running => "running",
            HeartbeatStatus::Disabled => "disabled",
            HeartbeatStatus::Error => "error",
            HeartbeatStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeartbeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(HeartbeatStatus::Idle),
            "running" => Ok(HeartbeatStatus::Running),
            "disabled" => Ok(HeartbeatStatus::Disabled),
            "error" => Ok(HeartbeatStatus::Error),
            "locked" => Ok(HeartbeatStatus::Locked),
            other => Err(format!("unknown heartbeat status: {other}")),
        }
    }
}

/// Who is writing: one process incarnation of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub component_id: String,
    pub instance_id: String,
    pub host: String,
    pub pid: i32,
}

impl InstanceIdentity {
    /// Fresh identity for the current process
    pub fn current(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            host: local_hostname(),
            pid: std::process::id() as i32,
        }
    }
}

/// Hostname recorded on heartbeats and error events, `"unknown"` if unavailable
pub fn local_hostname() -> String {
    system_hostname()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// One heartbeat write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    pub component_id: String,
    pub instance_id: String,
    pub status: HeartbeatStatus,
    pub host: Option<String>,
    pub pid: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

/// Liveness of one process incarnation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub component_id: String,
    pub instance_id: String,
    pub host: Option<String>,
    pub pid: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: HeartbeatStatus,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

/// Liveness inferred from heartbeat age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Live,
    Stale,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Live => write!(f, "live"),
            Liveness::Stale => write!(f, "stale"),
        }
    }
}

impl HeartbeatRecord {
    /// Age of the last heartbeat relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_heartbeat_at)
    }

    /// A row is stale once its heartbeat is older than `stale_after`,
    /// whatever status it still claims.
    pub fn liveness(&self, now: DateTime<Utc>, stale_after: Duration) -> Liveness {
        let limit = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        if self.age(now) > limit {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }

    /// Claims to be running but has stopped heartbeating
    pub fn is_stale_running(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == HeartbeatStatus::Running
            && self.liveness(now, stale_after) == Liveness::Stale
    }
}

/// Append-only failure record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: i64,
    pub component_id: String,
    pub occurred_at: DateTime<Utc>,
    pub host: Option<String>,
    pub pid: Option<i32>,
    pub instance_id: Option<String>,
    pub message: String,
    pub traceback: Option<String>,
    pub context: Option<serde_json::Value>,
}

/// Error event before it is stored
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewErrorEvent {
    pub component_id: String,
    pub message: String,
    pub instance_id: Option<String>,
    pub host: Option<String>,
    pub pid: Option<i32>,
    pub traceback: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl NewErrorEvent {
    pub fn new(component_id: &str, message: impl Into<String>) -> Self {
        Self {
            component_id: component_id.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn from_instance(identity: &InstanceIdentity, message: impl Into<String>) -> Self {
        Self {
            component_id: identity.component_id.clone(),
            message: message.into(),
            instance_id: Some(identity.instance_id.clone()),
            host: Some(identity.host.clone()),
            pid: Some(identity.pid),
            ..Default::default()
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
