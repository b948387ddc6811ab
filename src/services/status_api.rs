//! Read-only HTTP view of component state
//!
//! Runs as a managed service under the reconciler, so it can be switched
//! on and off remotely like any other component.

use crate::coordination::CoordinationStore;
use crate::domain::{ComponentKind, HeartbeatRecord, HeartbeatStatus, Liveness};
use crate::error::Result;
use crate::supervisor::ManagedService;
use anyhow::Context;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const STATUS_API_ID: &str = "scheduler-status-api";

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct StatusState {
    pub store: Arc<dyn CoordinationStore>,
    pub stale_after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub host: Option<String>,
    pub pid: Option<i32>,
    pub status: HeartbeatStatus,
    pub liveness: Liveness,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub age_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl InstanceStatus {
    fn from_record(record: HeartbeatRecord, now: DateTime<Utc>, stale_after: Duration) -> Self {
        Self {
            liveness: record.liveness(now, stale_after),
            age_secs: record.age(now).num_seconds(),
            instance_id: record.instance_id,
            host: record.host,
            pid: record.pid,
            status: record.status,
            started_at: record.started_at,
            last_heartbeat_at: record.last_heartbeat_at,
            last_error_at: record.last_error_at,
            last_error_message: record.last_error_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component_id: String,
    pub kind: ComponentKind,
    pub group: String,
    pub enabled: bool,
    pub instances: Vec<InstanceStatus>,
}

pub fn create_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/components", get(components_handler))
        .with_state(state)
}

/// GET /health
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /components
async fn components_handler(
    State(state): State<StatusState>,
) -> std::result::Result<Json<Vec<ComponentStatus>>, (StatusCode, String)> {
    collect_status(&state).await.map(Json).map_err(|e| {
        warn!("status query failed: {}", e);
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })
}

async fn collect_status(state: &StatusState) -> Result<Vec<ComponentStatus>> {
    let now = Utc::now();
    let components = state.store.list_components().await?;
    let mut heartbeats = state.store.list_heartbeats(None).await?;

    let flags = try_join_all(components.iter().map(|def| state.store.get_enabled(&def.id))).await?;

    let mut out = Vec::with_capacity(components.len());
    for (def, enabled) in components.into_iter().zip(flags) {
        let (mine, rest): (Vec<_>, Vec<_>) = heartbeats
            .into_iter()
            .partition(|h| h.component_id == def.id);
        heartbeats = rest;

        out.push(ComponentStatus {
            instances: mine
                .into_iter()
                .map(|h| InstanceStatus::from_record(h, now, state.stale_after))
                .collect(),
            component_id: def.id,
            kind: def.kind,
            group: def.group,
            enabled: enabled.unwrap_or(false),
        });
    }
    Ok(out)
}

struct RunningServer {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// HTTP status server driven by start/stop
pub struct StatusApiService {
    state: StatusState,
    bind: String,
    server: Mutex<Option<RunningServer>>,
}

impl StatusApiService {
    pub fn new(store: Arc<dyn CoordinationStore>, bind: &str, stale_after: Duration) -> Self {
        Self {
            state: StatusState { store, stale_after },
            bind: bind.to_string(),
            server: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ManagedService for StatusApiService {
    async fn start(&self) -> anyhow::Result<()> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }

        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("failed to bind status API on {}", self.bind))?;
        let addr = listener.local_addr()?;
        let app = create_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Status API listening on http://{}", addr);
        *server = Some(RunningServer {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some(running) = self.server.lock().await.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        match tokio::time::timeout(STOP_TIMEOUT, running.handle).await {
            Ok(Ok(Ok(()))) => {
                info!("Status API stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(anyhow::Error::new(e).context("status API server failed")),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("status API task panicked")),
            Err(_) => anyhow::bail!("status API did not drain within {:?}", STOP_TIMEOUT),
        }
    }

    async fn is_running(&self) -> bool {
        self.server
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}
