//! Process entrypoint: one component per process
//!
//! Resolve the id, register the catalog, take the component lock, then hand
//! control to the matching supervisor until shutdown. The outcome is an
//! explicit exit status so external supervisors can tell lock contention
//! from a crash.

use crate::catalog::{Catalog, Runnable};
use crate::config::SupervisorTimings;
use crate::coordination::{
    install_signal_handlers, ComponentLock, ComponentRegistry, CoordinationStore,
    ErrorEventRecorder, HeartbeatPublisher, LastError, LockManager, Shutdown,
};
use crate::domain::{HeartbeatStatus, InstanceIdentity, NewErrorEvent};
use crate::error::{Result, SchedulerError};
use crate::supervisor::{IntervalJobRunner, ManagedServiceSupervisor, SupervisorContext};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const COMPONENT_ID_ENV: &str = "COMPONENT_ID";

pub const LOCK_BUSY_MESSAGE: &str = "another instance already holds the lock";

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Clean shutdown after a signal
    Normal,
    /// Another instance owns the component
    LockBusy,
    /// Missing or unknown component id
    DispatchFailed,
    /// Coordination store failed underneath a loop
    StoreUnavailable,
    /// Bad configuration or operator input
    Failed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Normal => 0,
            ExitStatus::LockBusy => 1,
            ExitStatus::DispatchFailed => 2,
            ExitStatus::StoreUnavailable => 3,
            ExitStatus::Failed => 4,
        }
    }

    /// Exit status for an error that escaped the entrypoint
    pub fn for_error(err: &SchedulerError) -> Self {
        match err {
            SchedulerError::MissingComponentId | SchedulerError::UnknownComponent(_) => {
                ExitStatus::DispatchFailed
            }
            e if e.is_store_failure() => ExitStatus::StoreUnavailable,
            _ => ExitStatus::Failed,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Normal => write!(f, "normal"),
            ExitStatus::LockBusy => write!(f, "lock_busy"),
            ExitStatus::DispatchFailed => write!(f, "dispatch_failed"),
            ExitStatus::StoreUnavailable => write!(f, "store_unavailable"),
            ExitStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Explicit argument first, then `COMPONENT_ID`. Blank values count as missing.
pub fn resolve_component_id(arg: Option<&str>) -> Result<String> {
    let from_env = std::env::var(COMPONENT_ID_ENV).ok();
    arg.map(str::to_string)
        .or(from_env)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(SchedulerError::MissingComponentId)
}

pub struct Entrypoint {
    store: Arc<dyn CoordinationStore>,
    catalog: Catalog,
    timings: SupervisorTimings,
    shutdown: Arc<Shutdown>,
    install_signals: bool,
}

impl Entrypoint {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        catalog: Catalog,
        timings: SupervisorTimings,
    ) -> Self {
        Self {
            store,
            catalog,
            timings,
            shutdown: Arc::new(Shutdown::new()),
            install_signals: true,
        }
    }

    /// Share an externally owned shutdown flag
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Leave OS signals alone (embedding, tests)
    pub fn without_signal_handlers(mut self) -> Self {
        self.install_signals = false;
        self
    }

    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Supervise `component_id` until shutdown.
    ///
    /// Only coordination store failures come back as `Err`; every expected
    /// outcome is an `ExitStatus`.
    pub async fn run(&self, component_id: Option<&str>) -> Result<ExitStatus> {
        let component_id = match resolve_component_id(component_id) {
            Ok(id) => id,
            Err(e) => {
                error!("{}", e);
                return Ok(ExitStatus::DispatchFailed);
            }
        };

        ComponentRegistry::new(self.store.clone())
            .register(&self.catalog.definitions())
            .await?;

        let identity = InstanceIdentity::current(&component_id);
        let heartbeats = HeartbeatPublisher::new(self.store.clone());
        let errors = ErrorEventRecorder::new(self.store.clone());

        let Some(lock) = LockManager::new(self.store.clone())
            .acquire(&component_id)
            .await
        else {
            warn!(component = %component_id, "{}, exiting", LOCK_BUSY_MESSAGE);
            heartbeats
                .publish(&identity, HeartbeatStatus::Locked, Some(Utc::now()), None)
                .await?;
            errors
                .record(
                    NewErrorEvent::from_instance(&identity, LOCK_BUSY_MESSAGE)
                        .with_context(serde_json::json!({ "kind": "lock_busy" })),
                )
                .await?;
            return Ok(ExitStatus::LockBusy);
        };

        info!(
            component = %component_id,
            instance = %identity.instance_id,
            host = %identity.host,
            pid = identity.pid,
            "component lock acquired"
        );

        let Some(entry) = self.catalog.get(&component_id) else {
            let outcome = self.reject_unknown(&identity, &errors, &heartbeats).await;
            lock.release().await;
            outcome?;
            return Ok(ExitStatus::DispatchFailed);
        };

        if self.install_signals {
            if let Err(e) = install_signal_handlers(self.shutdown.clone()) {
                lock.release().await;
                return Err(e.into());
            }
        }

        let ctx = SupervisorContext::new(
            self.store.clone(),
            identity.clone(),
            self.shutdown.clone(),
            self.timings,
        );
        let dispatched = match &entry.runnable {
            Runnable::IntervalJob { interval, job } => {
                IntervalJobRunner::new(ctx, *interval, job.clone())
                    .run()
                    .await
                    .map(|stats| stats.last_error)
            }
            Runnable::ManagedService(service) => {
                ManagedServiceSupervisor::new(ctx, service.clone())
                    .run()
                    .await
                    .map(|stats| stats.last_error)
            }
        };

        self.finish(lock, &identity, &heartbeats, dispatched).await
    }

    async fn reject_unknown(
        &self,
        identity: &InstanceIdentity,
        errors: &ErrorEventRecorder,
        heartbeats: &HeartbeatPublisher,
    ) -> Result<()> {
        let err = SchedulerError::UnknownComponent(identity.component_id.clone());
        let known: Vec<&str> = self.catalog.ids().collect();
        error!(component = %identity.component_id, known = ?known, "{}", err);

        let message = err.to_string();
        errors
            .record(
                NewErrorEvent::from_instance(identity, message.clone())
                    .with_context(serde_json::json!({ "kind": "dispatch" })),
            )
            .await?;
        heartbeats
            .publish(
                identity,
                HeartbeatStatus::Error,
                Some(Utc::now()),
                Some(&LastError::now(message)),
            )
            .await
    }

    /// Final idle heartbeat and lock release after the loop returns
    async fn finish(
        &self,
        lock: ComponentLock,
        identity: &InstanceIdentity,
        heartbeats: &HeartbeatPublisher,
        dispatched: Result<Option<LastError>>,
    ) -> Result<ExitStatus> {
        let last_error = match dispatched {
            Ok(last_error) => last_error,
            Err(e) => {
                error!(component = %identity.component_id, "coordination store failed: {}", e);
                lock.release().await;
                return Err(e);
            }
        };

        let idle = heartbeats
            .publish(identity, HeartbeatStatus::Idle, None, last_error.as_ref())
            .await;
        lock.release().await;
        idle?;

        info!(
            component = %identity.component_id,
            signal = ?self.shutdown.signal(),
            "component stopped cleanly"
        );
        Ok(ExitStatus::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            ExitStatus::Normal.code(),
            ExitStatus::LockBusy.code(),
            ExitStatus::DispatchFailed.code(),
            ExitStatus::StoreUnavailable.code(),
            ExitStatus::Failed.code(),
        ];
        assert_eq!(codes, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_exit_status_for_error() {
        assert_eq!(
            ExitStatus::for_error(&SchedulerError::MissingComponentId),
            ExitStatus::DispatchFailed
        );
        assert_eq!(
            ExitStatus::for_error(&SchedulerError::Store("down".into())),
            ExitStatus::StoreUnavailable
        );
        assert_eq!(
            ExitStatus::for_error(&SchedulerError::Validation("limit".into())),
            ExitStatus::Failed
        );
    }

    #[test]
    fn test_explicit_id_is_trimmed() {
        assert_eq!(resolve_component_id(Some("  price_poller ")).unwrap(), "price_poller");
    }

    #[test]
    fn test_blank_id_is_missing() {
        assert!(matches!(
            resolve_component_id(Some("   ")),
            Err(SchedulerError::MissingComponentId)
        ));
    }
}
