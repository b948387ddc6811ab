//! Heartbeat publishing and error event recording
//!
//! Both write straight through to the coordination store. A failure here
//! means the store itself is gone and is returned to the caller untouched.

use super::store::CoordinationStore;
use crate::domain::{HeartbeatStatus, HeartbeatUpdate, InstanceIdentity, NewErrorEvent};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Max characters kept in error messages (heartbeat rows and events)
pub const MAX_MESSAGE_CHARS: usize = 500;
/// Max characters kept in an event traceback
pub const MAX_TRACEBACK_CHARS: usize = 100_000;

const ELLIPSIS: &str = "...";
const TRACEBACK_MARKER: &str = "\n... [traceback truncated]";

/// Cut `text` to at most `max_chars` characters, ending with `marker`
/// when anything was dropped.
pub fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(marker.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(marker);
    out
}

pub fn truncate_message(message: &str) -> String {
    truncate_with_marker(message, MAX_MESSAGE_CHARS, ELLIPSIS)
}

pub fn truncate_traceback(traceback: &str) -> String {
    truncate_with_marker(traceback, MAX_TRACEBACK_CHARS, TRACEBACK_MARKER)
}

#[derive(Clone)]
pub struct HeartbeatPublisher {
    store: Arc<dyn CoordinationStore>,
}

impl HeartbeatPublisher {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Upsert one heartbeat row; `heartbeat_at` is stamped here, right
    /// before the write.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        component_id: &str,
        instance_id: &str,
        status: HeartbeatStatus,
        host: Option<&str>,
        pid: Option<i32>,
        started_at: Option<DateTime<Utc>>,
        last_error_at: Option<DateTime<Utc>>,
        last_error_message: Option<&str>,
    ) -> Result<()> {
        let update = HeartbeatUpdate {
            component_id: component_id.to_string(),
            instance_id: instance_id.to_string(),
            status,
            host: host.map(str::to_string),
            pid,
            started_at,
            heartbeat_at: Utc::now(),
            last_error_at,
            last_error_message: last_error_message.map(truncate_message),
        };

        self.store.upsert_heartbeat(&update).await?;
        debug!(component = %component_id, instance = %instance_id, status = %status, "heartbeat");
        Ok(())
    }

    /// Heartbeat on behalf of this process incarnation
    pub async fn publish(
        &self,
        identity: &InstanceIdentity,
        status: HeartbeatStatus,
        started_at: Option<DateTime<Utc>>,
        last_error: Option<&LastError>,
    ) -> Result<()> {
        self.upsert(
            &identity.component_id,
            &identity.instance_id,
            status,
            Some(&identity.host),
            Some(identity.pid),
            started_at,
            last_error.map(|e| e.at),
            last_error.map(|e| e.message.as_str()),
        )
        .await
    }
}

/// Most recent failure, repeated on every later heartbeat of the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LastError {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct ErrorEventRecorder {
    store: Arc<dyn CoordinationStore>,
}

impl ErrorEventRecorder {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Append one event after capping message and traceback length
    pub async fn record(&self, event: NewErrorEvent) -> Result<i64> {
        let event = NewErrorEvent {
            message: truncate_message(&event.message),
            traceback: event.traceback.as_deref().map(truncate_traceback),
            ..event
        };

        let id = self.store.record_error(&event).await?;
        warn!(
            component = %event.component_id,
            event_id = id,
            "recorded error event: {}",
            event.message
        );
        Ok(id)
    }

    /// Record a collaborator failure with its full error chain as traceback
    pub async fn record_failure(
        &self,
        identity: &InstanceIdentity,
        err: &anyhow::Error,
        context: serde_json::Value,
    ) -> Result<LastError> {
        let message = err.to_string();
        let event = NewErrorEvent::from_instance(identity, message.clone())
            .with_traceback(format!("{err:?}"))
            .with_context(context);
        self.record(event).await?;
        Ok(LastError::now(message))
    }
}
