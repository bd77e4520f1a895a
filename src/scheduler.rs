//! Background maintenance scheduler
//!
//! Runs each registered [`MaintenanceTask`] on its own interval, independent of
//! request traffic. A task never overlaps itself: a tick that arrives while the
//! previous run is still going is skipped and counted.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::infra::{
    CachedTenantDirectory, ConnectionPoolManager, ShutdownSignal, TenantDirectory,
};
use crate::reconcile::{ReconcileSummary, ReconciliationEngine};

/// A periodic maintenance job
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    fn name(&self) -> &str;

    /// One run. Errors are logged by the scheduler; the next tick runs anyway.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Scheduler intervals
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub reconcile_interval: Duration,
    pub pool_sweep_interval: Duration,
    pub cache_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(3600),
            pool_sweep_interval: Duration::from_secs(60),
            cache_cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            pool_sweep_interval: secs("POOL_SWEEP_INTERVAL_SECS", defaults.pool_sweep_interval),
            cache_cleanup_interval: secs(
                "CACHE_CLEANUP_INTERVAL_SECS",
                defaults.cache_cleanup_interval,
            ),
        }
    }
}

#[derive(Default)]
struct TaskCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    last_duration_ms: AtomicU64,
}

struct Entry {
    task: Arc<dyn MaintenanceTask>,
    interval: Duration,
    running: Arc<AtomicBool>,
    counters: Arc<TaskCounters>,
}

/// Per-task counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub interval_secs: u64,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
    pub last_duration_ms: u64,
}

/// Why a trigger did not start a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    UnknownTask,
}

/// Fixed-cadence driver for maintenance tasks
pub struct BackgroundScheduler {
    entries: BTreeMap<String, Entry>,
    shutdown: ShutdownSignal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundScheduler {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            entries: BTreeMap::new(),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a task. Takes effect at `start`; a second task with the same
    /// name replaces the first.
    pub fn schedule(&mut self, task: Arc<dyn MaintenanceTask>, interval: Duration) -> &mut Self {
        let name = task.name().to_string();
        if self.entries.contains_key(&name) {
            warn!(task = %name, "maintenance task already scheduled; replacing");
        }
        self.entries.insert(
            name,
            Entry {
                task,
                interval: interval.max(Duration::from_millis(1)),
                running: Arc::new(AtomicBool::new(false)),
                counters: Arc::new(TaskCounters::default()),
            },
        );
        self
    }

    /// Spawn one ticker per task. The first run happens one interval after start.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        if !handles.is_empty() {
            return;
        }
        for (name, entry) in &self.entries {
            info!(task = %name, interval_secs = entry.interval.as_secs(), "maintenance task scheduled");
            let task = entry.task.clone();
            let running = entry.running.clone();
            let counters = entry.counters.clone();
            let period = entry.interval;
            let shutdown = self.shutdown.clone();

            handles.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // interval fires immediately; skip that tick
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = ticker.tick() => {
                            launch(&task, &running, &counters, "interval");
                        }
                    }
                }
                debug!(task = %task.name(), "maintenance ticker stopped");
            }));
        }
    }

    /// Run a task now, unless it is already running.
    pub fn trigger(&self, name: &str) -> TriggerOutcome {
        match self.entries.get(name) {
            Some(entry) => launch(&entry.task, &entry.running, &entry.counters, "trigger"),
            None => TriggerOutcome::UnknownTask,
        }
    }

    pub fn stats(&self) -> BTreeMap<String, TaskStats> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let c = &entry.counters;
                (
                    name.clone(),
                    TaskStats {
                        interval_secs: entry.interval.as_secs(),
                        running: entry.running.load(Ordering::SeqCst),
                        runs: c.runs.load(Ordering::Relaxed),
                        failures: c.failures.load(Ordering::Relaxed),
                        skipped: c.skipped.load(Ordering::Relaxed),
                        last_duration_ms: c.last_duration_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    /// Stop the tickers. Runs already in flight finish on their own.
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        info!("background scheduler stopped");
    }
}

/// Start a run in its own task if the task is idle.
fn launch(
    task: &Arc<dyn MaintenanceTask>,
    running: &Arc<AtomicBool>,
    counters: &Arc<TaskCounters>,
    cause: &'static str,
) -> TriggerOutcome {
    if running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        info!(task = %task.name(), reason = "previous run still in progress", cause, "maintenance task skipped");
        return TriggerOutcome::AlreadyRunning;
    }

    let task = task.clone();
    let running = running.clone();
    let counters = counters.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let result = task.run().await;
        counters.runs.fetch_add(1, Ordering::Relaxed);
        counters
            .last_duration_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        match result {
            Ok(()) => debug!(task = %task.name(), cause, "maintenance task finished"),
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                error!(task = %task.name(), error = %e, "maintenance task failed");
            }
        }
        running.store(false, Ordering::SeqCst);
    });
    TriggerOutcome::Started
}

/// Periodic `reconcile_all`
pub struct ReconcileSweep {
    engine: Arc<ReconciliationEngine>,
}

impl ReconcileSweep {
    pub const NAME: &'static str = "reconcile_sweep";

    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MaintenanceTask for ReconcileSweep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self) -> anyhow::Result<()> {
        let reports = self.engine.reconcile_all().await?;
        let summary = ReconcileSummary::from_reports(&reports);
        if summary.failed > 0 {
            warn!(failed = summary.failed, tenants = summary.tenants, "reconcile sweep had failures");
        }
        Ok(())
    }
}

/// Stale-pool eviction
pub struct PoolEvictionSweep {
    pools: Arc<ConnectionPoolManager>,
    directory: Arc<dyn TenantDirectory>,
}

impl PoolEvictionSweep {
    pub fn new(pools: Arc<ConnectionPoolManager>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self { pools, directory }
    }
}

#[async_trait]
impl MaintenanceTask for PoolEvictionSweep {
    fn name(&self) -> &str {
        "pool_eviction_sweep"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let evicted = self.pools.sweep(self.directory.as_ref()).await;
        if evicted > 0 {
            info!(evicted, "stale pools evicted");
        }
        Ok(())
    }
}

/// Drops expired directory cache entries
pub struct DirectoryCacheCleanup<D> {
    directory: Arc<CachedTenantDirectory<D>>,
}

impl<D> DirectoryCacheCleanup<D> {
    pub fn new(directory: Arc<CachedTenantDirectory<D>>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D: TenantDirectory + 'static> MaintenanceTask for DirectoryCacheCleanup<D> {
    fn name(&self) -> &str {
        "directory_cache_cleanup"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let removed = self.directory.cleanup_expired().await;
        debug!(removed, "directory cache cleaned");
        Ok(())
    }
}
