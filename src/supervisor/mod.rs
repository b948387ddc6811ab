//! Supervisor Layer for Singleton Components
//!
//! Once a process owns a component's lock it hands control to one of:
//! - `IntervalJobRunner` for drift-corrected fixed-cadence jobs
//! - `ManagedServiceSupervisor` for level-triggered service reconciliation

pub mod interval_job;
pub mod managed_service;
pub mod traits;

pub use interval_job::{IntervalJobRunner, RunStats};
pub use managed_service::{ManagedServiceSupervisor, ReconcileAction, ReconcileStats};
pub use traits::{job_fn, FnJob, Job, ManagedService};

use crate::config::SupervisorTimings;
use crate::coordination::{
    CoordinationStore, EnabledFlagStore, ErrorEventRecorder, HeartbeatPublisher, Shutdown,
};
use crate::domain::InstanceIdentity;
use std::sync::Arc;

/// Everything a supervision loop needs besides its collaborator
#[derive(Clone)]
pub struct SupervisorContext {
    pub identity: InstanceIdentity,
    pub flags: EnabledFlagStore,
    pub heartbeats: HeartbeatPublisher,
    pub errors: ErrorEventRecorder,
    pub shutdown: Arc<Shutdown>,
    pub timings: SupervisorTimings,
}

impl SupervisorContext {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: InstanceIdentity,
        shutdown: Arc<Shutdown>,
        timings: SupervisorTimings,
    ) -> Self {
        Self {
            identity,
            flags: EnabledFlagStore::new(store.clone()),
            heartbeats: HeartbeatPublisher::new(store.clone()),
            errors: ErrorEventRecorder::new(store),
            shutdown,
            timings,
        }
    }

    pub fn component_id(&self) -> &str {
        &self.identity.component_id
    }
}
