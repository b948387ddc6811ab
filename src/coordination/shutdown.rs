//! Cooperative shutdown
//!
//! OS signals only flip a flag. Loops poll it at the top of every pass and
//! sleep through `sleep_or_shutdown`, so cleanup (final heartbeat, lock
//! release) runs in normal control flow instead of inside a signal handler.
//! Work already in flight is never interrupted. A second OS signal while
//! that work is still running exits the process immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Process exit code when a repeated signal forces an immediate exit
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM / SIGINT / Ctrl+C
    Graceful,
    /// SIGQUIT
    Urgent,
    /// Requested from code (tests, embedding applications)
    Requested,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
            ShutdownSignal::Requested => write!(f, "requested"),
        }
    }
}

/// Stop flag shared by the entrypoint and the loop it runs
#[derive(Debug)]
pub struct Shutdown {
    requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Which signal stopped us, if any
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.signal_tx.borrow()
    }

    /// Returns `false` when shutdown was already requested
    pub fn request(&self, signal: ShutdownSignal) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return false;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
        true
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.signal_tx.subscribe();
        // Closed sender cannot happen while `self` is alive
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` when woken by shutdown.
    pub async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_requested(),
            _ = self.wait() => true,
        }
    }
}

/// First signal requests shutdown; a repeat means the loop is stuck
fn on_os_signal(shutdown: &Shutdown, kind: ShutdownSignal) {
    if !shutdown.request(kind) {
        error!("Repeated {} signal during shutdown, exiting now", kind);
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Route SIGTERM/SIGINT/SIGQUIT (Ctrl+C elsewhere) into `shutdown`
pub fn install_signal_handlers(shutdown: Arc<Shutdown>) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::spawn(async move {
            loop {
                let kind = tokio::select! {
                    _ = sigterm.recv() => { info!("Received SIGTERM"); ShutdownSignal::Graceful }
                    _ = sigint.recv() => { info!("Received SIGINT"); ShutdownSignal::Graceful }
                    _ = sigquit.recv() => { warn!("Received SIGQUIT"); ShutdownSignal::Urgent }
                };
                on_os_signal(&shutdown, kind);
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                on_os_signal(&shutdown, ShutdownSignal::Graceful);
            }
        });
    }

    Ok(())
}
