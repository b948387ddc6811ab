//! Level-triggered reconciler for long-running services
//!
//! Every tick compares the desired state (enabled flag) against the observed
//! state (`is_running()`) and acts on the difference. Nothing is carried
//! between ticks except the last error, which rides along on heartbeats.

use super::traits::{guarded, ManagedService};
use super::SupervisorContext;
use crate::coordination::LastError;
use crate::domain::HeartbeatStatus;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one reconciliation tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// enabled, not running, start succeeded
    Started,
    /// enabled, not running, start failed; retried next tick
    StartFailed,
    /// disabled, running, stop succeeded
    Stopped,
    /// disabled, running, stop failed; retried next tick
    StopFailed,
    /// disabled and already stopped
    Disabled,
    /// enabled and running
    Steady,
}

impl ReconcileAction {
    pub fn status(&self) -> HeartbeatStatus {
        match self {
            ReconcileAction::Started | ReconcileAction::Steady => HeartbeatStatus::Running,
            ReconcileAction::StartFailed => HeartbeatStatus::Error,
            ReconcileAction::Stopped | ReconcileAction::StopFailed | ReconcileAction::Disabled => {
                HeartbeatStatus::Disabled
            }
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileAction::Started => "started",
            ReconcileAction::StartFailed => "start_failed",
            ReconcileAction::Stopped => "stopped",
            ReconcileAction::StopFailed => "stop_failed",
            ReconcileAction::Disabled => "disabled",
            ReconcileAction::Steady => "steady",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub ticks: u64,
    pub starts: u64,
    pub start_failures: u64,
    pub stops: u64,
    pub stop_failures: u64,
    pub last_error: Option<LastError>,
}

impl ReconcileStats {
    fn observe(&mut self, action: ReconcileAction) {
        self.ticks += 1;
        match action {
            ReconcileAction::Started => self.starts += 1,
            ReconcileAction::StartFailed => self.start_failures += 1,
            ReconcileAction::Stopped => self.stops += 1,
            ReconcileAction::StopFailed => self.stop_failures += 1,
            ReconcileAction::Disabled | ReconcileAction::Steady => {}
        }
    }
}

pub struct ManagedServiceSupervisor {
    ctx: SupervisorContext,
    service: Arc<dyn ManagedService>,
    last_error: Option<LastError>,
}

impl ManagedServiceSupervisor {
    pub fn new(ctx: SupervisorContext, service: Arc<dyn ManagedService>) -> Self {
        Self {
            ctx,
            service,
            last_error: None,
        }
    }

    /// One reconciliation pass, publishing the resulting heartbeat
    pub async fn reconcile_once(&mut self) -> Result<ReconcileAction> {
        self.reconcile(None).await
    }

    async fn reconcile(&mut self, started_at: Option<DateTime<Utc>>) -> Result<ReconcileAction> {
        let component_id = self.ctx.component_id().to_string();
        let enabled = self.ctx.flags.is_enabled(&component_id).await?;
        let running = self.service.is_running().await;
        let service = self.service.clone();

        let action = match (enabled, running) {
            (false, true) => match guarded(async move { service.stop().await }).await {
                Ok(()) => {
                    info!(component = %component_id, "service stopped (disabled)");
                    ReconcileAction::Stopped
                }
                Err(err) => {
                    error!(component = %component_id, "service stop failed: {:#}", err);
                    self.record(&err, "stop").await?;
                    ReconcileAction::StopFailed
                }
            },
            (false, false) => ReconcileAction::Disabled,
            (true, false) => match guarded(async move { service.start().await }).await {
                Ok(()) => {
                    info!(component = %component_id, "service started");
                    ReconcileAction::Started
                }
                Err(err) => {
                    error!(component = %component_id, "service start failed: {:#}", err);
                    self.record(&err, "start").await?;
                    ReconcileAction::StartFailed
                }
            },
            (true, true) => ReconcileAction::Steady,
        };

        self.ctx
            .heartbeats
            .publish(
                &self.ctx.identity,
                action.status(),
                started_at,
                self.last_error.as_ref(),
            )
            .await?;

        debug!(component = %component_id, enabled, running, action = %action, "reconciled");
        Ok(action)
    }

    async fn record(&mut self, err: &anyhow::Error, operation: &str) -> Result<()> {
        let context = serde_json::json!({
            "kind": "service",
            "operation": operation,
        });
        let last = self
            .ctx
            .errors
            .record_failure(&self.ctx.identity, err, context)
            .await?;
        self.last_error = Some(last);
        Ok(())
    }

    /// Reconcile every `reconcile_interval` until shutdown, then stop the
    /// service if it is still running.
    pub async fn run(&mut self) -> Result<ReconcileStats> {
        let component_id = self.ctx.component_id().to_string();
        let mut stats = ReconcileStats::default();
        let mut started_at = Some(Utc::now());

        info!(
            component = %component_id,
            instance = %self.ctx.identity.instance_id,
            "service supervisor started"
        );

        while !self.ctx.shutdown.is_requested() {
            let action = self.reconcile(started_at.take()).await?;
            stats.observe(action);
            self.ctx
                .shutdown
                .sleep_or_shutdown(self.ctx.timings.reconcile_interval)
                .await;
        }

        if self.service.is_running().await {
            info!(component = %component_id, "stopping service for shutdown");
            if let Err(err) = guarded(async { self.service.stop().await }).await {
                warn!(component = %component_id, "service stop on shutdown failed: {:#}", err);
            }
        }

        stats.last_error = self.last_error.clone();
        info!(
            component = %component_id,
            ticks = stats.ticks,
            starts = stats.starts,
            "service supervisor stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::config::SupervisorTimings;
    use crate::coordination::{
        ComponentRegistry, CoordinationStore, EnabledFlagStore, Shutdown, ShutdownSignal,
    };
    use crate::domain::{ComponentDefinition, ComponentKind, InstanceIdentity};
    use crate::supervisor::traits::MockManagedService;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const ID: &str = "stream_collector";

    async fn setup(default_enabled: bool) -> (Arc<InMemoryStore>, Arc<Shutdown>, SupervisorContext) {
        let store = Arc::new(InMemoryStore::new());
        let mut def = ComponentDefinition::new(ID, ComponentKind::Service, "collectors", "");
        if !default_enabled {
            def = def.disabled_by_default();
        }
        ComponentRegistry::new(store.clone())
            .register(&[def])
            .await
            .unwrap();
        let shutdown = Arc::new(Shutdown::new());
        let ctx = SupervisorContext::new(
            store.clone(),
            InstanceIdentity::current(ID),
            shutdown.clone(),
            SupervisorTimings::default(),
        );
        (store, shutdown, ctx)
    }

    /// Mock whose observed state follows successful start/stop calls
    fn tracking_mock(running: Arc<AtomicBool>, starts: usize, stops: usize) -> MockManagedService {
        let mut mock = MockManagedService::new();
        let observed = running.clone();
        mock.expect_is_running()
            .returning(move || observed.load(Ordering::SeqCst));
        let on_start = running.clone();
        mock.expect_start().times(starts).returning(move || {
            on_start.store(true, Ordering::SeqCst);
            Ok(())
        });
        let on_stop = running;
        mock.expect_stop().times(stops).returning(move || {
            on_stop.store(false, Ordering::SeqCst);
            Ok(())
        });
        mock
    }

    async fn status(store: &InMemoryStore) -> HeartbeatStatus {
        store.list_heartbeats(Some(ID)).await.unwrap()[0].status
    }

    #[tokio::test]
    async fn test_enable_starts_exactly_once() {
        let (store, _shutdown, ctx) = setup(false).await;
        let flags = EnabledFlagStore::new(store.clone());
        let running = Arc::new(AtomicBool::new(false));
        let mut supervisor =
            ManagedServiceSupervisor::new(ctx, Arc::new(tracking_mock(running.clone(), 1, 0)));

        for _ in 0..3 {
            assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Disabled);
        }
        assert_eq!(status(&store).await, HeartbeatStatus::Disabled);

        flags.set(ID, true, Some("ops"), None).await.unwrap();
        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Started);
        for _ in 0..5 {
            assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Steady);
        }
        assert!(running.load(Ordering::SeqCst));
        assert_eq!(status(&store).await, HeartbeatStatus::Running);
    }

    #[tokio::test]
    async fn test_disable_stops_exactly_once() {
        let (store, _shutdown, ctx) = setup(true).await;
        let flags = EnabledFlagStore::new(store.clone());
        let running = Arc::new(AtomicBool::new(true));
        let mut supervisor =
            ManagedServiceSupervisor::new(ctx, Arc::new(tracking_mock(running.clone(), 0, 1)));

        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Steady);

        flags.set(ID, false, Some("ops"), Some("maintenance")).await.unwrap();
        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Stopped);
        for _ in 0..5 {
            assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::Disabled);
        }
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(status(&store).await, HeartbeatStatus::Disabled);
    }

    #[tokio::test]
    async fn test_start_failure_recorded_and_retried() {
        let (store, _shutdown, ctx) = setup(true).await;
        let mut mock = MockManagedService::new();
        mock.expect_is_running().returning(|| false);
        mock.expect_start()
            .times(2)
            .returning(|| Err(anyhow::anyhow!("address already in use")));
        mock.expect_stop().never();
        let mut supervisor = ManagedServiceSupervisor::new(ctx, Arc::new(mock));

        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::StartFailed);
        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::StartFailed);

        let events = store.list_error_events(ID, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "address already in use");
        assert_eq!(
            events[0].context,
            Some(serde_json::json!({ "kind": "service", "operation": "start" }))
        );

        let row = &store.list_heartbeats(Some(ID)).await.unwrap()[0];
        assert_eq!(row.status, HeartbeatStatus::Error);
        assert_eq!(row.last_error_message.as_deref(), Some("address already in use"));
    }

    #[tokio::test]
    async fn test_panicking_start_is_recorded() {
        let (store, _shutdown, ctx) = setup(true).await;
        let mut mock = MockManagedService::new();
        mock.expect_is_running().returning(|| false);
        mock.expect_start()
            .times(1)
            .returning(|| panic!("listener config missing"));
        mock.expect_stop().never();
        let mut supervisor = ManagedServiceSupervisor::new(ctx, Arc::new(mock));

        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::StartFailed);

        let events = store.list_error_events(ID, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "panicked: listener config missing");
        assert_eq!(
            events[0].context,
            Some(serde_json::json!({ "kind": "service", "operation": "start" }))
        );

        let row = &store.list_heartbeats(Some(ID)).await.unwrap()[0];
        assert_eq!(row.status, HeartbeatStatus::Error);
        assert_eq!(
            row.last_error_message.as_deref(),
            Some("panicked: listener config missing")
        );
    }

    #[tokio::test]
    async fn test_stop_failure_still_reports_disabled() {
        let (store, _shutdown, ctx) = setup(false).await;
        let mut mock = MockManagedService::new();
        mock.expect_is_running().returning(|| true);
        mock.expect_start().never();
        mock.expect_stop()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("listener did not drain")));
        let mut supervisor = ManagedServiceSupervisor::new(ctx, Arc::new(mock));

        assert_eq!(supervisor.reconcile_once().await.unwrap(), ReconcileAction::StopFailed);
        assert_eq!(status(&store).await, HeartbeatStatus::Disabled);
        assert_eq!(store.list_error_events(ID, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, _shutdown, ctx) = setup(true).await;
        let running = Arc::new(AtomicBool::new(true));
        let mut supervisor =
            ManagedServiceSupervisor::new(ctx, Arc::new(tracking_mock(running, 0, 0)));

        store.set_unavailable(true);
        let err = supervisor.reconcile_once().await.unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_and_stops_service_on_shutdown() {
        let (store, shutdown, ctx) = setup(true).await;
        let running = Arc::new(AtomicBool::new(false));
        let mut supervisor =
            ManagedServiceSupervisor::new(ctx, Arc::new(tracking_mock(running.clone(), 1, 1)));

        let handle = tokio::spawn(async move { supervisor.run().await });
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert!(running.load(Ordering::SeqCst));

        shutdown.request(ShutdownSignal::Graceful);
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.starts, 1);
        assert!(!running.load(Ordering::SeqCst));

        let row = &store.list_heartbeats(Some(ID)).await.unwrap()[0];
        assert_eq!(row.status, HeartbeatStatus::Running);
    }
}
