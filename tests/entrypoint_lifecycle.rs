//! Whole-process behavior of the entrypoint on the in-memory store:
//! dispatch, lock contention, remote disable and clean shutdown.

use ploy_scheduler::adapters::InMemoryStore;
use ploy_scheduler::catalog::Catalog;
use ploy_scheduler::config::SupervisorTimings;
use ploy_scheduler::coordination::{
    CoordinationStore, EnabledFlagStore, LockManager, Shutdown, ShutdownSignal,
};
use ploy_scheduler::domain::{ComponentDefinition, ComponentKind, HeartbeatStatus};
use ploy_scheduler::entrypoint::{Entrypoint, ExitStatus, LOCK_BUSY_MESSAGE};
use ploy_scheduler::supervisor::{job_fn, ManagedService};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting_catalog(id: &str, interval: Duration, calls: Arc<AtomicU64>) -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .register_job(
            ComponentDefinition::new(id, ComponentKind::Job, "pipeline", "test job"),
            interval,
            job_fn(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();
    catalog
}

fn entrypoint(store: Arc<InMemoryStore>, catalog: Catalog, shutdown: Arc<Shutdown>) -> Entrypoint {
    Entrypoint::new(store, catalog, SupervisorTimings::default())
        .with_shutdown(shutdown)
        .without_signal_handlers()
}

async fn heartbeat_status(store: &InMemoryStore, id: &str) -> HeartbeatStatus {
    store.list_heartbeats(Some(id)).await.unwrap()[0].status
}

#[tokio::test(start_paused = true)]
async fn job_runs_pauses_on_disable_and_stops_cleanly() {
    let store = Arc::new(InMemoryStore::new());
    let shutdown = Arc::new(Shutdown::new());
    let calls = Arc::new(AtomicU64::new(0));
    let ep = entrypoint(
        store.clone(),
        counting_catalog("X", Duration::from_millis(1_000), calls.clone()),
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { ep.run(Some("X")).await });

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(heartbeat_status(&store, "X").await, HeartbeatStatus::Running);
    assert_eq!(store.held_locks(), 1);

    EnabledFlagStore::new(store.clone())
        .set("X", false, Some("ops"), Some("pause"))
        .await
        .unwrap();
    let paused_at = calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), paused_at);
    assert_eq!(heartbeat_status(&store, "X").await, HeartbeatStatus::Disabled);

    shutdown.request(ShutdownSignal::Graceful);
    let status = handle.await.unwrap().unwrap();
    assert_eq!(status, ExitStatus::Normal);
    assert_eq!(heartbeat_status(&store, "X").await, HeartbeatStatus::Idle);
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test]
async fn unknown_component_writes_one_event() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU64::new(0));
    let ep = entrypoint(
        store.clone(),
        counting_catalog("X", Duration::from_secs(1), calls),
        Arc::new(Shutdown::new()),
    );

    let status = ep.run(Some("ghost")).await.unwrap();
    assert_eq!(status, ExitStatus::DispatchFailed);
    assert_eq!(status.code(), 2);

    let events = store.list_error_events("ghost", 100).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].message.contains("ghost"));

    let row = &store.list_heartbeats(Some("ghost")).await.unwrap()[0];
    assert_eq!(row.status, HeartbeatStatus::Error);
    assert!(row.last_error_message.is_some());
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test]
async fn missing_component_id_is_dispatch_failure() {
    let store = Arc::new(InMemoryStore::new());
    let ep = entrypoint(store.clone(), Catalog::new(), Arc::new(Shutdown::new()));

    let status = ep.run(Some("  ")).await.unwrap();
    assert_eq!(status, ExitStatus::DispatchFailed);
    assert!(store.list_heartbeats(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_instance_exits_with_lock_busy() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU64::new(0));
    let holder = LockManager::new(store.clone()).acquire("X").await.unwrap();

    let ep = entrypoint(
        store.clone(),
        counting_catalog("X", Duration::from_secs(1), calls.clone()),
        Arc::new(Shutdown::new()),
    );
    let status = ep.run(Some("X")).await.unwrap();
    assert_eq!(status, ExitStatus::LockBusy);
    assert_eq!(status.code(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(heartbeat_status(&store, "X").await, HeartbeatStatus::Locked);
    let events = store.list_error_events("X", 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, LOCK_BUSY_MESSAGE);

    // The holder is untouched
    assert!(holder.is_held());
    holder.release().await;
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test(start_paused = true)]
async fn store_outage_is_fatal_and_releases_lock() {
    let store = Arc::new(InMemoryStore::new());
    let failing = store.clone();
    let mut catalog = Catalog::new();
    catalog
        .register_job(
            ComponentDefinition::new("X", ComponentKind::Job, "pipeline", ""),
            Duration::from_secs(1),
            job_fn(move || {
                let failing = failing.clone();
                async move {
                    failing.set_unavailable(true);
                    anyhow::bail!("upstream timeout")
                }
            }),
        )
        .unwrap();

    let err = entrypoint(store.clone(), catalog, Arc::new(Shutdown::new()))
        .run(Some("X"))
        .await
        .unwrap_err();
    assert!(err.is_store_failure());
    assert_eq!(ExitStatus::for_error(&err).code(), 3);
    assert_eq!(store.held_locks(), 0);
}

struct FlagService {
    running: AtomicBool,
}

#[async_trait::async_trait]
impl ManagedService for FlagService {
    async fn start(&self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn service_is_started_then_stopped_on_shutdown() {
    let store = Arc::new(InMemoryStore::new());
    let shutdown = Arc::new(Shutdown::new());
    let service = Arc::new(FlagService {
        running: AtomicBool::new(false),
    });
    let mut catalog = Catalog::new();
    catalog
        .register_service(
            ComponentDefinition::new("stream_collector", ComponentKind::Stream, "collectors", ""),
            service.clone(),
        )
        .unwrap();

    let ep = entrypoint(store.clone(), catalog, shutdown.clone());
    let handle = tokio::spawn(async move { ep.run(Some("stream_collector")).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(service.is_running().await);
    assert_eq!(
        heartbeat_status(&store, "stream_collector").await,
        HeartbeatStatus::Running
    );

    shutdown.request(ShutdownSignal::Graceful);
    assert_eq!(handle.await.unwrap().unwrap(), ExitStatus::Normal);
    assert!(!service.is_running().await);
    assert_eq!(
        heartbeat_status(&store, "stream_collector").await,
        HeartbeatStatus::Idle
    );
}
