pub mod adapters;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod entrypoint;
pub mod error;
pub mod services;
pub mod supervisor;

pub use adapters::{InMemoryStore, PostgresStore};
pub use catalog::{Catalog, CatalogEntry, Runnable};
pub use config::{SchedulerConfig, SupervisorTimings};
pub use coordination::{
    stable_key_hash, ComponentLock, ComponentRegistry, CoordinationStore, EnabledFlagStore,
    ErrorEventRecorder, HeartbeatPublisher, LockManager, Shutdown, ShutdownSignal,
};
pub use domain::{ComponentDefinition, ComponentKind, HeartbeatStatus, InstanceIdentity};
pub use entrypoint::{Entrypoint, ExitStatus};
pub use error::{Result, SchedulerError};
pub use supervisor::{
    job_fn, IntervalJobRunner, Job, ManagedService, ManagedServiceSupervisor, SupervisorContext,
};
