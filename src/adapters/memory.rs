//! In-process coordination store
//!
//! Implements the full store contract inside one process: used by the test
//! suite and for local dry runs without PostgreSQL. Locks behave like
//! session locks: a handle owns its key until it is closed or dropped.

use crate::coordination::{CoordinationStore, LockHandle};
use crate::domain::{
    ComponentDefinition, ComponentSetting, ErrorEvent, HeartbeatRecord, HeartbeatUpdate,
    NewErrorEvent,
};
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentDefinition>,
    settings: HashMap<String, ComponentSetting>,
    heartbeats: BTreeMap<(String, String), HeartbeatRecord>,
    events: Vec<ErrorEvent>,
}

/// Coordination store held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashSet<i64>>>,
    unavailable: Arc<AtomicBool>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store went away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SchedulerError::Store("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Settings row as stored, for assertions on operator metadata
    pub fn setting(&self, component_id: &str) -> Option<ComponentSetting> {
        guard(&self.state).settings.get(component_id).cloned()
    }

    /// Number of keys currently locked
    pub fn held_locks(&self) -> usize {
        guard(&self.locks).len()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn register_components(&self, defs: &[ComponentDefinition]) -> Result<()> {
        self.check_available()?;
        let mut state = guard(&self.state);
        let now = Utc::now();

        for def in defs {
            state.components.insert(def.id.clone(), def.clone());
            state
                .settings
                .entry(def.id.clone())
                .or_insert_with(|| ComponentSetting {
                    component_id: def.id.clone(),
                    enabled: def.default_enabled,
                    updated_by: None,
                    note: None,
                    updated_at: now,
                });
        }
        Ok(())
    }

    async fn list_components(&self) -> Result<Vec<ComponentDefinition>> {
        self.check_available()?;
        Ok(guard(&self.state).components.values().cloned().collect())
    }

    async fn get_enabled(&self, component_id: &str) -> Result<Option<bool>> {
        self.check_available()?;
        let state = guard(&self.state);
        let Some(def) = state.components.get(component_id) else {
            return Ok(None);
        };
        Ok(Some(
            state
                .settings
                .get(component_id)
                .map(|s| s.enabled)
                .unwrap_or(def.default_enabled),
        ))
    }

    async fn set_enabled(
        &self,
        component_id: &str,
        enabled: bool,
        updated_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = guard(&self.state);
        if !state.components.contains_key(component_id) {
            return Ok(false);
        }
        state.settings.insert(
            component_id.to_string(),
            ComponentSetting {
                component_id: component_id.to_string(),
                enabled,
                updated_by: updated_by.map(str::to_string),
                note: note.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn upsert_heartbeat(&self, update: &HeartbeatUpdate) -> Result<()> {
        self.check_available()?;
        let mut state = guard(&self.state);
        let key = (update.component_id.clone(), update.instance_id.clone());

        let started_at = state
            .heartbeats
            .get(&key)
            .map(|existing| existing.started_at)
            .or(update.started_at)
            .unwrap_or(update.heartbeat_at);

        state.heartbeats.insert(
            key,
            HeartbeatRecord {
                component_id: update.component_id.clone(),
                instance_id: update.instance_id.clone(),
                host: update.host.clone(),
                pid: update.pid,
                started_at,
                last_heartbeat_at: update.heartbeat_at,
                status: update.status,
                last_error_at: update.last_error_at,
                last_error_message: update.last_error_message.clone(),
            },
        );
        Ok(())
    }

    async fn list_heartbeats(&self, component_id: Option<&str>) -> Result<Vec<HeartbeatRecord>> {
        self.check_available()?;
        let state = guard(&self.state);
        let mut rows: Vec<HeartbeatRecord> = state
            .heartbeats
            .values()
            .filter(|hb| component_id.map_or(true, |id| hb.component_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.component_id
                .cmp(&b.component_id)
                .then(b.last_heartbeat_at.cmp(&a.last_heartbeat_at))
        });
        Ok(rows)
    }

    async fn record_error(&self, event: &NewErrorEvent) -> Result<i64> {
        self.check_available()?;
        let mut state = guard(&self.state);
        let id = state.events.len() as i64 + 1;

        state.events.push(ErrorEvent {
            id,
            component_id: event.component_id.clone(),
            occurred_at: Utc::now(),
            host: event.host.clone(),
            pid: event.pid,
            instance_id: event.instance_id.clone(),
            message: event.message.clone(),
            traceback: event.traceback.clone(),
            context: event.context.clone(),
        });
        Ok(id)
    }

    async fn list_error_events(&self, component_id: &str, limit: i64) -> Result<Vec<ErrorEvent>> {
        self.check_available()?;
        let state = guard(&self.state);
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.component_id == component_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn try_lock(&self, key: i64, _tag: &str) -> Result<Option<Box<dyn LockHandle>>> {
        self.check_available()?;
        if !guard(&self.locks).insert(key) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLock {
            key,
            locks: self.locks.clone(),
            held: AtomicBool::new(true),
        })))
    }
}

/// Lock slot owned until close or drop
struct MemoryLock {
    key: i64,
    locks: Arc<Mutex<HashSet<i64>>>,
    held: AtomicBool,
}

impl MemoryLock {
    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            guard(&self.locks).remove(&self.key);
        }
    }
}

#[async_trait]
impl LockHandle for MemoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.release();
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.release();
    }
}
