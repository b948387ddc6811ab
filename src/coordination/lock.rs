//! Per-component distributed lock
//!
//! Busy is an expected outcome, so `acquire` returns an `Option` and never
//! an error. A failure to even open the probe connection is logged and
//! treated the same as "someone else owns it".

use super::key_hash::stable_key_hash;
use super::store::{CoordinationStore, LockHandle};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the `application_name` tag on lock connections
pub const LOCK_TAG_PREFIX: &str = "ploy-scheduler:lock:";

/// Held lock for one component
pub struct ComponentLock {
    component_id: String,
    handle: Box<dyn LockHandle>,
}

impl ComponentLock {
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn key(&self) -> i64 {
        self.handle.key()
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_held()
    }

    /// Release the lock. Safe to call more than once.
    pub async fn release(&self) {
        if self.handle.is_held() {
            self.handle.close().await;
            info!(component = %self.component_id, "released component lock");
        }
    }
}

impl std::fmt::Debug for ComponentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentLock")
            .field("component_id", &self.component_id)
            .field("key", &self.handle.key())
            .field("held", &self.handle.is_held())
            .finish()
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Try once to take the lock for `component_id` without waiting
    pub async fn acquire(&self, component_id: &str) -> Option<ComponentLock> {
        let key = stable_key_hash(component_id);
        let tag = format!("{LOCK_TAG_PREFIX}{component_id}");

        match self.store.try_lock(key, &tag).await {
            Ok(Some(handle)) => {
                info!(component = %component_id, key, "acquired component lock");
                Some(ComponentLock {
                    component_id: component_id.to_string(),
                    handle,
                })
            }
            Ok(None) => {
                debug!(component = %component_id, key, "component lock busy");
                None
            }
            Err(e) => {
                warn!(component = %component_id, key, "lock connection failed: {}", e);
                None
            }
        }
    }
}
