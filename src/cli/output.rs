//! Output formatting for operator commands.
//!
//! Human-readable tables by default, JSON with `--json`.

use crate::domain::{ComponentDefinition, ErrorEvent, HeartbeatRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct HeartbeatRow {
    #[tabled(rename = "Component")]
    pub component_id: String,
    #[tabled(rename = "Instance")]
    pub instance_id: String,
    #[tabled(rename = "Host")]
    pub host: String,
    #[tabled(rename = "PID")]
    pub pid: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Liveness")]
    pub liveness: String,
    #[tabled(rename = "Age (s)")]
    pub age_secs: i64,
    #[tabled(rename = "Started")]
    pub started_at: String,
    #[tabled(rename = "Last Error")]
    pub last_error: String,
}

impl HeartbeatRow {
    pub fn from_record(record: &HeartbeatRecord, now: DateTime<Utc>, stale_after: Duration) -> Self {
        Self {
            component_id: record.component_id.clone(),
            instance_id: record.instance_id.clone(),
            host: opt(&record.host),
            pid: record.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            status: record.status.to_string(),
            liveness: record.liveness(now, stale_after).to_string(),
            age_secs: record.age(now).num_seconds(),
            started_at: timestamp(&record.started_at),
            last_error: opt(&record.last_error_message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ComponentRow {
    #[tabled(rename = "Component")]
    pub component_id: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Group")]
    pub group: String,
    #[tabled(rename = "Interval (ms)")]
    pub expected_interval_ms: String,
    #[tabled(rename = "Enabled")]
    pub enabled: bool,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl ComponentRow {
    pub fn new(def: &ComponentDefinition, enabled: bool) -> Self {
        Self {
            component_id: def.id.clone(),
            kind: def.kind.to_string(),
            group: def.group.clone(),
            expected_interval_ms: def
                .expected_interval_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string()),
            enabled,
            description: def.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ErrorEventRow {
    #[tabled(rename = "ID")]
    pub id: i64,
    #[tabled(rename = "When")]
    pub occurred_at: String,
    #[tabled(rename = "Host")]
    pub host: String,
    #[tabled(rename = "Instance")]
    pub instance_id: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

impl From<&ErrorEvent> for ErrorEventRow {
    fn from(event: &ErrorEvent) -> Self {
        Self {
            id: event.id,
            occurred_at: timestamp(&event.occurred_at),
            host: opt(&event.host),
            instance_id: opt(&event.instance_id),
            message: event.message.clone(),
        }
    }
}
