//! Collaborator interfaces consumed by the supervisors.
//!
//! Business logic (price polling, trailing stops, model refresh, HTTP APIs,
//! stream collectors) stays opaque behind these traits.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// One unit of fixed-interval work
#[async_trait]
pub trait Job: Send + Sync {
    /// Perform one unit of work. An `Err` is recorded and the runner moves on.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Long-running background service driven by the reconciler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagedService: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Observed state; must not rely on what start/stop last returned
    async fn is_running(&self) -> bool;
}

/// Closure-backed job
pub struct FnJob<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Wrap an async closure as a job
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnJob { f })
}

/// Await collaborator work, turning a panic into an ordinary error
pub(crate) async fn guarded<Fut>(work: Fut) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
