//! Static component catalog
//!
//! Maps each component id to what the process should run once it owns the
//! lock. Populated by explicit registration at startup.

use crate::config::SchedulerConfig;
use crate::coordination::CoordinationStore;
use crate::domain::{ComponentDefinition, ComponentKind};
use crate::error::{Result, SchedulerError};
use crate::services::{
    StaleHeartbeatReport, StatusApiService, STALE_REPORT_ID, STALE_REPORT_INTERVAL, STATUS_API_ID,
};
use crate::supervisor::{Job, ManagedService};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What to run for a component
#[derive(Clone)]
pub enum Runnable {
    IntervalJob {
        interval: Duration,
        job: Arc<dyn Job>,
    },
    ManagedService(Arc<dyn ManagedService>),
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub definition: ComponentDefinition,
    pub runnable: Runnable,
}

#[derive(Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the scheduler's own status API and stale report
    pub fn builtin(store: Arc<dyn CoordinationStore>, config: &SchedulerConfig) -> Result<Self> {
        let stale_after = config.scheduler.stale_after();
        let mut catalog = Self::new();

        catalog.register_service(
            ComponentDefinition::new(
                STATUS_API_ID,
                ComponentKind::Service,
                "scheduler",
                "HTTP view of component heartbeats",
            ),
            Arc::new(StatusApiService::new(
                store.clone(),
                &config.status_api.bind,
                stale_after,
            )),
        )?;
        catalog.register_job(
            ComponentDefinition::new(
                STALE_REPORT_ID,
                ComponentKind::Job,
                "scheduler",
                "Warns about running components that stopped heartbeating",
            ),
            STALE_REPORT_INTERVAL,
            Arc::new(StaleHeartbeatReport::new(store, stale_after)),
        )?;
        Ok(catalog)
    }

    /// Register a fixed-interval job; `expected_interval_ms` is filled in
    /// from `interval` when unset.
    pub fn register_job(
        &mut self,
        definition: ComponentDefinition,
        interval: Duration,
        job: Arc<dyn Job>,
    ) -> Result<()> {
        if definition.kind != ComponentKind::Job {
            return Err(SchedulerError::Validation(format!(
                "{} is registered as a job but declared {}",
                definition.id, definition.kind
            )));
        }
        if interval.is_zero() {
            return Err(SchedulerError::Validation(format!(
                "{} has a zero interval",
                definition.id
            )));
        }

        let definition = if definition.expected_interval_ms.is_none() {
            definition.with_expected_interval(interval)
        } else {
            definition
        };
        self.insert(CatalogEntry {
            definition,
            runnable: Runnable::IntervalJob { interval, job },
        })
    }

    /// Register a service or stream collector driven by the reconciler
    pub fn register_service(
        &mut self,
        definition: ComponentDefinition,
        service: Arc<dyn ManagedService>,
    ) -> Result<()> {
        if definition.kind == ComponentKind::Job {
            return Err(SchedulerError::Validation(format!(
                "{} is registered as a service but declared job",
                definition.id
            )));
        }
        self.insert(CatalogEntry {
            definition,
            runnable: Runnable::ManagedService(service),
        })
    }

    fn insert(&mut self, entry: CatalogEntry) -> Result<()> {
        let id = entry.definition.id.clone();
        if id.is_empty() {
            return Err(SchedulerError::Validation(
                "component id must not be empty".to_string(),
            ));
        }
        if self.entries.contains_key(&id) {
            return Err(SchedulerError::DuplicateComponent(id));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn get(&self, component_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(component_id)
    }

    pub fn definitions(&self) -> Vec<ComponentDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
