//! Periodic report of components that claim to run but stopped heartbeating

use crate::coordination::CoordinationStore;
use crate::domain::HeartbeatRecord;
use crate::supervisor::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const STALE_REPORT_ID: &str = "scheduler-stale-report";
pub const STALE_REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub struct StaleHeartbeatReport {
    store: Arc<dyn CoordinationStore>,
    stale_after: Duration,
}

impl StaleHeartbeatReport {
    pub fn new(store: Arc<dyn CoordinationStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }
}

/// Rows still marked running whose last heartbeat is older than `stale_after`
pub fn stale_running(
    records: &[HeartbeatRecord],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<&HeartbeatRecord> {
    records
        .iter()
        .filter(|r| r.is_stale_running(now, stale_after))
        .collect()
}

#[async_trait]
impl Job for StaleHeartbeatReport {
    async fn run(&self) -> anyhow::Result<()> {
        let records = self.store.list_heartbeats(None).await?;
        let now = Utc::now();
        let stale = stale_running(&records, now, self.stale_after);

        for record in &stale {
            warn!(
                component = %record.component_id,
                instance = %record.instance_id,
                host = record.host.as_deref().unwrap_or("-"),
                age_secs = record.age(now).num_seconds(),
                "component marked running has stopped heartbeating"
            );
        }
        debug!(scanned = records.len(), stale = stale.len(), "stale heartbeat scan done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::domain::{HeartbeatStatus, HeartbeatUpdate};

    fn update(component_id: &str, status: HeartbeatStatus, age_secs: i64) -> HeartbeatUpdate {
        HeartbeatUpdate {
            component_id: component_id.to_string(),
            instance_id: format!("{component_id}-1"),
            status,
            host: Some("worker-a".to_string()),
            pid: Some(4242),
            started_at: None,
            heartbeat_at: Utc::now() - chrono::Duration::seconds(age_secs),
            last_error_at: None,
            last_error_message: None,
        }
    }

    #[tokio::test]
    async fn test_only_old_running_rows_are_stale() {
        let store = Arc::new(InMemoryStore::new());
        let rows = [
            update("price_poller", HeartbeatStatus::Running, 5),
            update("trailing_stop", HeartbeatStatus::Running, 300),
            update("model_refresh", HeartbeatStatus::Disabled, 300),
            update("stream_collector", HeartbeatStatus::Idle, 900),
        ];
        for row in &rows {
            store.upsert_heartbeat(row).await.unwrap();
        }

        let records = store.list_heartbeats(None).await.unwrap();
        let stale = stale_running(&records, Utc::now(), Duration::from_secs(30));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].component_id, "trailing_stop");
    }

    #[tokio::test]
    async fn test_job_surfaces_store_failure() {
        let store = Arc::new(InMemoryStore::new());
        let report = StaleHeartbeatReport::new(store.clone(), Duration::from_secs(30));
        report.run().await.unwrap();

        store.set_unavailable(true);
        assert!(report.run().await.is_err());
    }
}
