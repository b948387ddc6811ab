//! Operator commands against the coordination store

use super::output::{print_items, ComponentRow, ErrorEventRow, HeartbeatRow, OutputMode};
use crate::catalog::Catalog;
use crate::coordination::{ComponentRegistry, CoordinationStore, EnabledFlagStore};
use crate::error::{Result, SchedulerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Flip the enabled flag. Registers the catalog first so built-in ids can
/// be toggled before any process has started them.
pub async fn set_enabled(
    store: Arc<dyn CoordinationStore>,
    catalog: &Catalog,
    component_id: &str,
    enabled: bool,
    by: Option<&str>,
    note: Option<&str>,
) -> Result<()> {
    ComponentRegistry::new(store.clone())
        .register(&catalog.definitions())
        .await?;

    let flags = EnabledFlagStore::new(store);
    if !flags.set(component_id, enabled, by, note).await? {
        return Err(SchedulerError::UnknownComponent(component_id.to_string()));
    }

    info!(component = %component_id, enabled, by = ?by, "enabled flag updated");
    println!(
        "{} {}",
        component_id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub async fn show_status(
    store: Arc<dyn CoordinationStore>,
    component_id: Option<&str>,
    stale_after: Duration,
    mode: OutputMode,
) -> Result<()> {
    let now = Utc::now();
    let rows: Vec<HeartbeatRow> = store
        .list_heartbeats(component_id)
        .await?
        .iter()
        .map(|r| HeartbeatRow::from_record(r, now, stale_after))
        .collect();
    print_items(&rows, mode)?;
    Ok(())
}

pub async fn show_errors(
    store: Arc<dyn CoordinationStore>,
    component_id: &str,
    limit: i64,
    mode: OutputMode,
) -> Result<()> {
    if limit <= 0 {
        return Err(SchedulerError::Validation("limit must be positive".to_string()));
    }

    let events = store.list_error_events(component_id, limit).await?;
    match mode {
        OutputMode::Json => print_items_json(&events)?,
        OutputMode::Table => {
            let rows: Vec<ErrorEventRow> = events.iter().map(ErrorEventRow::from).collect();
            print_items(&rows, mode)?;
        }
    }
    Ok(())
}

// Full events (traceback, context) only make sense as JSON
fn print_items_json<T: serde::Serialize>(items: &[T]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(items)?);
    Ok(())
}

pub async fn list_components(
    store: Arc<dyn CoordinationStore>,
    catalog: &Catalog,
    mode: OutputMode,
) -> Result<()> {
    ComponentRegistry::new(store.clone())
        .register(&catalog.definitions())
        .await?;

    let mut rows = Vec::new();
    for def in store.list_components().await? {
        let enabled = store.get_enabled(&def.id).await?.unwrap_or(false);
        rows.push(ComponentRow::new(&def, enabled));
    }
    print_items(&rows, mode)?;
    Ok(())
}
