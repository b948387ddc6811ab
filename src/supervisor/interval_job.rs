//! Drift-corrected fixed-interval job runner
//!
//! The next run is anchored to the previous *scheduled* time, not to when
//! the last execution finished, so the long-run cadence converges to the
//! configured interval. An overrun only delays the following tick.
//!
//! If executions keep exceeding the interval, `max(next + interval, now +
//! interval)` degrades to back-to-back runs paced from completion time and
//! phase alignment is lost. That case is logged as a warning.

use super::traits::{guarded, Job};
use super::SupervisorContext;
use crate::coordination::LastError;
use crate::domain::HeartbeatStatus;
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Counters returned when the runner stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub executions: u64,
    pub failures: u64,
    pub skipped_disabled: u64,
    pub overruns: u64,
    pub last_error: Option<LastError>,
}

pub struct IntervalJobRunner {
    ctx: SupervisorContext,
    interval: Duration,
    job: Arc<dyn Job>,
}

impl IntervalJobRunner {
    pub fn new(ctx: SupervisorContext, interval: Duration, job: Arc<dyn Job>) -> Self {
        Self { ctx, interval, job }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Loop until shutdown is requested.
    ///
    /// Job failures, panics included, are recorded and the loop continues;
    /// a failing store write ends the loop with the error.
    pub async fn run(&self) -> Result<RunStats> {
        let ctx = &self.ctx;
        let component_id = ctx.component_id().to_string();
        let mut stats = RunStats::default();

        ctx.heartbeats
            .publish(&ctx.identity, HeartbeatStatus::Running, Some(Utc::now()), None)
            .await?;
        let mut status = HeartbeatStatus::Running;
        let mut last_heartbeat = Instant::now();
        let mut next_run = Instant::now();

        info!(
            component = %component_id,
            instance = %ctx.identity.instance_id,
            interval_ms = self.interval.as_millis() as u64,
            "interval job runner started"
        );

        while !ctx.shutdown.is_requested() {
            let now = Instant::now();

            if now.duration_since(last_heartbeat) >= ctx.timings.heartbeat_interval {
                status = if ctx.flags.is_enabled(&component_id).await? {
                    HeartbeatStatus::Running
                } else {
                    HeartbeatStatus::Disabled
                };
                ctx.heartbeats
                    .publish(&ctx.identity, status, None, stats.last_error.as_ref())
                    .await?;
                last_heartbeat = now;
            }

            if now < next_run {
                let wait = (next_run - now).min(ctx.timings.idle_sleep);
                ctx.shutdown.sleep_or_shutdown(wait).await;
                continue;
            }

            if now >= next_run + self.interval {
                stats.overruns += 1;
                warn!(
                    component = %component_id,
                    behind_ms = (now - next_run).as_millis() as u64,
                    "job fell a full interval behind, realigning to completion time"
                );
            }
            next_run = (next_run + self.interval).max(now + self.interval);

            if !ctx.flags.is_enabled(&component_id).await? {
                stats.skipped_disabled += 1;
                if status != HeartbeatStatus::Disabled {
                    info!(component = %component_id, "component disabled, skipping ticks");
                    status = HeartbeatStatus::Disabled;
                    ctx.heartbeats
                        .publish(&ctx.identity, status, None, stats.last_error.as_ref())
                        .await?;
                    last_heartbeat = Instant::now();
                }
                continue;
            }

            if status == HeartbeatStatus::Disabled {
                info!(component = %component_id, "component re-enabled");
                status = HeartbeatStatus::Running;
                ctx.heartbeats
                    .publish(&ctx.identity, status, None, stats.last_error.as_ref())
                    .await?;
                last_heartbeat = Instant::now();
            }

            stats.executions += 1;
            let started = Instant::now();
            match guarded(async { self.job.run().await }).await {
                Ok(()) => {
                    debug!(
                        component = %component_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "job tick completed"
                    );
                }
                Err(err) => {
                    stats.failures += 1;
                    error!(component = %component_id, "job tick failed: {:#}", err);

                    let context = serde_json::json!({
                        "kind": "job",
                        "interval_ms": self.interval.as_millis() as u64,
                        "execution": stats.executions,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    });
                    let last_error = ctx.errors.record_failure(&ctx.identity, &err, context).await?;
                    status = HeartbeatStatus::Error;
                    ctx.heartbeats
                        .publish(&ctx.identity, status, None, Some(&last_error))
                        .await?;
                    stats.last_error = Some(last_error);
                    last_heartbeat = Instant::now();
                }
            }
        }

        info!(
            component = %component_id,
            executions = stats.executions,
            failures = stats.failures,
            "interval job runner stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::config::SupervisorTimings;
    use crate::coordination::{
        ComponentRegistry, CoordinationStore, EnabledFlagStore, Shutdown, ShutdownSignal,
    };
    use crate::domain::{ComponentDefinition, ComponentKind, InstanceIdentity};
    use crate::supervisor::job_fn;
    use std::sync::Mutex;

    async fn setup(id: &str) -> (Arc<InMemoryStore>, Arc<Shutdown>, SupervisorContext) {
        let store = Arc::new(InMemoryStore::new());
        ComponentRegistry::new(store.clone())
            .register(&[ComponentDefinition::new(id, ComponentKind::Job, "test", "")])
            .await
            .unwrap();
        let shutdown = Arc::new(Shutdown::new());
        let ctx = SupervisorContext::new(
            store.clone(),
            InstanceIdentity::current(id),
            shutdown.clone(),
            SupervisorTimings::default(),
        );
        (store, shutdown, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_correction_keeps_average_spacing() {
        let (_store, shutdown, ctx) = setup("signal_recompute").await;
        let ticks: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = ticks.clone();
        let stopper = shutdown.clone();
        let job = job_fn(move || {
            let recorded = recorded.clone();
            let stopper = stopper.clone();
            async move {
                let count = {
                    let mut ticks = recorded.lock().unwrap();
                    ticks.push(Instant::now());
                    ticks.len()
                };
                tokio::time::sleep(Duration::from_millis(300)).await;
                if count == 11 {
                    stopper.request(ShutdownSignal::Requested);
                }
                Ok(())
            }
        });

        let runner = IntervalJobRunner::new(ctx, Duration::from_secs(1), job);
        let stats = runner.run().await.unwrap();
        assert_eq!(stats.executions, 11);
        assert_eq!(stats.overruns, 0);

        let ticks = ticks.lock().unwrap();
        let span = ticks[10] - ticks[0];
        let average = span.as_secs_f64() / 10.0;
        assert!((average - 1.0).abs() < 0.01, "average spacing {average}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_delays_only_next_tick() {
        let (_store, shutdown, ctx) = setup("slow_job").await;
        let ticks: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = ticks.clone();
        let stopper = shutdown.clone();
        let job = job_fn(move || {
            let recorded = recorded.clone();
            let stopper = stopper.clone();
            async move {
                let count = {
                    let mut ticks = recorded.lock().unwrap();
                    ticks.push(Instant::now());
                    ticks.len()
                };
                // Only the first run overruns the 1s interval
                let work = if count == 1 { 2_500 } else { 100 };
                tokio::time::sleep(Duration::from_millis(work)).await;
                if count == 4 {
                    stopper.request(ShutdownSignal::Requested);
                }
                Ok(())
            }
        });

        let stats = IntervalJobRunner::new(ctx, Duration::from_secs(1), job)
            .run()
            .await
            .unwrap();
        assert_eq!(stats.overruns, 1);

        let ticks = ticks.lock().unwrap();
        let gaps: Vec<u128> = ticks.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![2_500, 1_000, 1_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_runner() {
        let (store, shutdown, ctx) = setup("always_fails").await;
        let stopper = shutdown.clone();
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = calls.clone();

        let job = job_fn(move || {
            let counter = counter.clone();
            let stopper = stopper.clone();
            async move {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if n == 100 {
                    stopper.request(ShutdownSignal::Requested);
                }
                Err(anyhow::anyhow!("upstream 502 on attempt {n}"))
            }
        });

        let stats = IntervalJobRunner::new(ctx, Duration::from_millis(50), job)
            .run()
            .await
            .unwrap();
        assert_eq!(stats.executions, 100);
        assert_eq!(stats.failures, 100);

        let events = store.list_error_events("always_fails", 1_000).await.unwrap();
        assert_eq!(events.len(), 100);
        for event in &events {
            let traceback = event.traceback.as_deref().unwrap_or_default();
            assert!(!traceback.is_empty());
            assert!(traceback.chars().count() <= crate::coordination::MAX_TRACEBACK_CHARS);
        }

        let heartbeat = &store.list_heartbeats(Some("always_fails")).await.unwrap()[0];
        assert_eq!(heartbeat.status, HeartbeatStatus::Error);
        assert_eq!(
            heartbeat.last_error_message.as_deref(),
            Some("upstream 502 on attempt 100")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_is_isolated() {
        let (store, shutdown, ctx) = setup("order_book_snapshot").await;
        let stopper = shutdown.clone();
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = calls.clone();

        let job = job_fn(move || {
            let counter = counter.clone();
            let stopper = stopper.clone();
            async move {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if n == 3 {
                    stopper.request(ShutdownSignal::Requested);
                }
                let levels: Vec<u64> = Vec::new();
                let _top = levels[0];
                Ok(())
            }
        });

        let runner = IntervalJobRunner::new(ctx, Duration::from_millis(100), job);
        let outcome = tokio::spawn(async move { runner.run().await }).await;
        let stats = outcome.expect("runner task must not panic").unwrap();
        assert_eq!(stats.executions, 3);
        assert_eq!(stats.failures, 3);

        let events = store.list_error_events("order_book_snapshot", 10).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].message.contains("index out of bounds"));

        let heartbeat = &store.list_heartbeats(Some("order_book_snapshot")).await.unwrap()[0];
        assert_eq!(heartbeat.status, HeartbeatStatus::Error);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_takes_effect_within_heartbeat() {
        let (store, shutdown, ctx) = setup("price_poller").await;
        let flags = EnabledFlagStore::new(store.clone());
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = calls.clone();

        let job = job_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });
        let runner = IntervalJobRunner::new(ctx, Duration::from_millis(200), job);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let before = calls.load(std::sync::atomic::Ordering::SeqCst);
        assert!(before >= 5);

        flags.set("price_poller", false, Some("ops"), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), before);

        let heartbeat = &store.list_heartbeats(Some("price_poller")).await.unwrap()[0];
        assert_eq!(heartbeat.status, HeartbeatStatus::Disabled);

        shutdown.request(ShutdownSignal::Requested);
        let stats = handle.await.unwrap().unwrap();
        assert!(stats.skipped_disabled > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_is_fatal() {
        let (store, _shutdown, ctx) = setup("price_poller").await;
        let failing = store.clone();
        let job = job_fn(move || {
            let failing = failing.clone();
            async move {
                failing.set_unavailable(true);
                anyhow::bail!("boom")
            }
        });

        let result = IntervalJobRunner::new(ctx, Duration::from_secs(1), job)
            .run()
            .await;
        assert!(result.unwrap_err().is_store_failure());
    }
}
