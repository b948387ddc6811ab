//! Coordination store contract
//!
//! Any backend with idempotent upserts, plain reads/writes and
//! session-scoped non-blocking advisory locks keyed by a signed 64-bit
//! integer can implement this. Every method is independently atomic; no
//! caller needs a transaction spanning several calls.

use crate::domain::{
    ComponentDefinition, ErrorEvent, HeartbeatRecord, HeartbeatUpdate, NewErrorEvent,
};
use crate::error::Result;
use async_trait::async_trait;

/// Ownership token for one advisory lock.
///
/// The lock lives exactly as long as the handle's dedicated connection.
/// Dropping the handle without `close()` still releases the lock.
#[async_trait]
pub trait LockHandle: Send + Sync {
    /// Key the lock was taken on
    fn key(&self) -> i64;

    /// Whether the handle still owns its connection
    fn is_held(&self) -> bool;

    /// Release the lock by closing the connection. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Upsert definitions and insert missing settings rows
    async fn register_components(&self, defs: &[ComponentDefinition]) -> Result<()>;

    /// All registered definitions, ordered by id
    async fn list_components(&self) -> Result<Vec<ComponentDefinition>>;

    /// Effective enabled flag; `None` if the id is not registered
    async fn get_enabled(&self, component_id: &str) -> Result<Option<bool>>;

    /// Upsert the operator override; `false` if the id is not registered
    async fn set_enabled(
        &self,
        component_id: &str,
        enabled: bool,
        updated_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool>;

    /// Idempotent per (component_id, instance_id); keeps the first started_at
    async fn upsert_heartbeat(&self, update: &HeartbeatUpdate) -> Result<()>;

    async fn list_heartbeats(&self, component_id: Option<&str>) -> Result<Vec<HeartbeatRecord>>;

    /// Append one error event, returning its id
    async fn record_error(&self, event: &NewErrorEvent) -> Result<i64>;

    /// Most recent first
    async fn list_error_events(&self, component_id: &str, limit: i64) -> Result<Vec<ErrorEvent>>;

    /// Non-blocking try-lock on a fresh dedicated connection tagged with `tag`.
    ///
    /// `Ok(None)` when someone else holds the key.
    async fn try_lock(&self, key: i64, tag: &str) -> Result<Option<Box<dyn LockHandle>>>;
}
