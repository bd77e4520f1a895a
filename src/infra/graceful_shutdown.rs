//! Graceful shutdown handling
//!
//! - Signal handling (SIGTERM, SIGINT)
//! - A cloneable [`ShutdownSignal`] observed by the scheduler and write workers
//! - In-flight request draining before tenant pools are closed

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal that can be cloned and shared
#[derive(Clone)]
pub struct ShutdownSignal {
    watch_rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check if shutdown has been initiated
    pub fn is_shutdown(&self) -> bool {
        *self.watch_rx.borrow()
    }

    /// Resolve once shutdown has been initiated, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.watch_rx.clone();
        // A closed channel means the coordinator is gone; treat as shutdown.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Tracks in-flight requests for graceful draining
#[derive(Default)]
pub struct RequestTracker {
    active: AtomicU64,
    total: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request starting; the guard ends it on drop.
    pub fn request_start(self: &Arc<Self>) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Wait for all requests to complete
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    active = self.active_count(),
                    "Timeout waiting for requests to drain"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("All requests drained successfully");
        true
    }
}

/// Decrements the active request count when dropped
pub struct RequestGuard {
    tracker: Arc<RequestTracker>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Middleware counting every request that passes through the router
pub async fn track_requests(
    State(tracker): State<Arc<RequestTracker>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = tracker.request_start();
    next.run(request).await
}

/// Shutdown coordinator that manages graceful shutdown
pub struct ShutdownCoordinator {
    watch_tx: watch::Sender<bool>,
    request_tracker: Arc<RequestTracker>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(false);
        Self {
            watch_tx,
            request_tracker: Arc::new(RequestTracker::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            watch_rx: self.watch_tx.subscribe(),
        }
    }

    pub fn request_tracker(&self) -> Arc<RequestTracker> {
        self.request_tracker.clone()
    }

    /// Initiate shutdown; later calls are no-ops.
    pub fn shutdown(&self) {
        let changed = self.watch_tx.send_if_modified(|stopped| {
            let first = !*stopped;
            *stopped = true;
            first
        });
        if changed {
            info!("Initiating graceful shutdown...");
        }
    }

    /// Initiate shutdown and wait for in-flight requests, up to `drain_timeout`.
    pub async fn graceful_shutdown(&self, drain_timeout: Duration) -> bool {
        self.shutdown();

        info!(
            active = self.request_tracker.active_count(),
            "Waiting for in-flight requests to complete..."
        );

        self.request_tracker.wait_for_drain(drain_timeout).await
    }

    pub fn is_shutdown(&self) -> bool {
        *self.watch_tx.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Future that completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

// ============================================================================
// Shutdown-Aware Server
// ============================================================================

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct GracefulShutdownConfig {
    /// Timeout for draining in-flight requests
    pub drain_timeout: Duration,
    /// Delay before the listener stops (for load balancer health checks)
    pub shutdown_delay: Duration,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            shutdown_delay: Duration::ZERO,
        }
    }
}

impl GracefulShutdownConfig {
    /// Reads `SHUTDOWN_DRAIN_SECS` and `SHUTDOWN_DELAY_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            drain_timeout: secs("SHUTDOWN_DRAIN_SECS", defaults.drain_timeout),
            shutdown_delay: secs("SHUTDOWN_DELAY_SECS", defaults.shutdown_delay),
        }
    }
}

/// Serve until the coordinator signals shutdown, then drain in-flight requests.
pub async fn serve_with_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    coordinator: Arc<ShutdownCoordinator>,
    config: GracefulShutdownConfig,
) -> Result<(), std::io::Error> {
    let signal = coordinator.signal();

    info!("Starting server with graceful shutdown support");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.wait().await;

            if !config.shutdown_delay.is_zero() {
                info!(
                    delay_ms = config.shutdown_delay.as_millis() as u64,
                    "Shutdown signal received, delaying listener stop"
                );
                tokio::time::sleep(config.shutdown_delay).await;
            }
        })
        .await?;

    coordinator.graceful_shutdown(config.drain_timeout).await;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
