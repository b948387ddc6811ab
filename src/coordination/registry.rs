//! Component catalog registration and the remote enabled toggle.

use super::store::CoordinationStore;
use crate::domain::ComponentDefinition;
use crate::error::{Result, SchedulerError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes the static catalog into the coordination store
#[derive(Clone)]
pub struct ComponentRegistry {
    store: Arc<dyn CoordinationStore>,
}

impl ComponentRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Idempotent upsert of definitions.
    ///
    /// Settings rows are only inserted when absent, so an operator's
    /// existing override always survives a restart.
    pub async fn register(&self, defs: &[ComponentDefinition]) -> Result<()> {
        let mut seen = HashSet::new();
        for def in defs {
            if def.id.is_empty() {
                return Err(SchedulerError::Validation(
                    "component id must not be empty".to_string(),
                ));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(SchedulerError::DuplicateComponent(def.id.clone()));
            }
        }

        self.store.register_components(defs).await?;
        info!("Registered {} components", defs.len());
        Ok(())
    }
}

/// Remote per-component toggle, never cached
#[derive(Clone)]
pub struct EnabledFlagStore {
    store: Arc<dyn CoordinationStore>,
}

impl EnabledFlagStore {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Override if present, else `default_enabled`; `None` if unregistered
    pub async fn get(&self, component_id: &str) -> Result<Option<bool>> {
        self.store.get_enabled(component_id).await
    }

    /// Unregistered ids read as disabled
    pub async fn is_enabled(&self, component_id: &str) -> Result<bool> {
        Ok(self.get(component_id).await?.unwrap_or(false))
    }

    pub async fn set(
        &self,
        component_id: &str,
        enabled: bool,
        updated_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .store
            .set_enabled(component_id, enabled, updated_by, note)
            .await?;
        if updated {
            info!(
                component = %component_id,
                enabled,
                updated_by = updated_by.unwrap_or("-"),
                "enabled flag updated"
            );
        } else {
            debug!(component = %component_id, "set_enabled on unknown component");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::domain::ComponentKind;

    fn defs() -> Vec<ComponentDefinition> {
        vec![
            ComponentDefinition::new("price_poller", ComponentKind::Job, "market", "poll prices"),
            ComponentDefinition::new("api_server", ComponentKind::Service, "api", "http api")
                .disabled_by_default(),
        ]
    }

    #[tokio::test]
    async fn test_defaults_apply_until_overridden() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ComponentRegistry::new(store.clone());
        let flags = EnabledFlagStore::new(store.clone());

        registry.register(&defs()).await.unwrap();
        assert_eq!(flags.get("price_poller").await.unwrap(), Some(true));
        assert_eq!(flags.get("api_server").await.unwrap(), Some(false));
        assert_eq!(flags.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reregister_keeps_operator_override() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ComponentRegistry::new(store.clone());
        let flags = EnabledFlagStore::new(store.clone());

        registry.register(&defs()).await.unwrap();
        assert!(flags
            .set("price_poller", false, Some("ops"), Some("maintenance"))
            .await
            .unwrap());

        registry.register(&defs()).await.unwrap();
        assert_eq!(flags.get("price_poller").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_set_unknown_returns_false() {
        let store = Arc::new(InMemoryStore::new());
        let flags = EnabledFlagStore::new(store.clone());

        assert!(!flags.set("ghost", true, None, None).await.unwrap());
        assert!(!flags.is_enabled("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ComponentRegistry::new(store.clone());
        let mut twice = defs();
        twice.push(defs().remove(0));

        let err = registry.register(&twice).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateComponent(id) if id == "price_poller"));
    }
}
