//! Per-tenant connection pool manager
//!
//! Owns at most one [`PooledConnectionHandle`] per tenant. Pool creation is
//! single-flight: the first caller for a tenant spawns the connector call and
//! every concurrent caller awaits the same shared result. The spawned task
//! publishes the handle (or clears the slot) itself, so a caller that gives up
//! mid-creation cannot leave the slot stuck.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{PreparedWrite, SqlDialect, StoreLocator, Tenant, TenantId};

use super::pool_monitor::{AcquisitionOutcome, PoolHealthStatus, PoolMonitor, PoolMonitorStats};
use super::{
    PoolLimits, PoolUsage, Result, StoreConnector, TenancyError, TenantDirectory, TenantStore,
};

/// Pool manager configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bounds for every tenant pool
    pub limits: PoolLimits,
    /// Handles unused for this long are evicted by [`ConnectionPoolManager::sweep`]
    pub idle_ttl: Duration,
    /// Maximum number of tenant pools held at once
    pub max_pools: usize,
    /// Consecutive connection errors after which a handle is recreated
    pub failure_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limits: PoolLimits::default(),
            idle_ttl: Duration::from_secs(900),
            max_pools: 200,
            failure_threshold: 5,
        }
    }
}

impl PoolConfig {
    /// Load from `TENANT_POOL_*` environment variables.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        let defaults = Self::default();
        Self {
            limits: PoolLimits {
                max_connections: var("TENANT_POOL_MAX_CONNECTIONS")
                    .unwrap_or(defaults.limits.max_connections)
                    .max(1),
                acquire_timeout: var("TENANT_POOL_ACQUIRE_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.limits.acquire_timeout),
                idle_timeout: defaults.limits.idle_timeout,
            },
            idle_ttl: var("TENANT_POOL_IDLE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_ttl),
            max_pools: var("TENANT_POOL_MAX_POOLS")
                .unwrap_or(defaults.max_pools)
                .max(1),
            failure_threshold: var("TENANT_POOL_FAILURE_THRESHOLD")
                .unwrap_or(defaults.failure_threshold)
                .max(1),
        }
    }

    /// Upper bound on connections this process may hold across all tenants.
    pub fn connection_ceiling(&self) -> u64 {
        self.max_pools as u64 * u64::from(self.limits.max_connections)
    }
}

/// A tenant's bounded pool, shared by every request for that tenant.
pub struct PooledConnectionHandle {
    tenant_id: TenantId,
    store_locator: StoreLocator,
    store: Arc<dyn TenantStore>,
    created_at: Instant,
    last_used: Mutex<Instant>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    closed: AtomicBool,
}

impl std::fmt::Debug for PooledConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnectionHandle")
            .field("tenant_id", &self.tenant_id)
            .field("store_locator", &self.store_locator)
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

impl PooledConnectionHandle {
    pub fn new(
        tenant_id: TenantId,
        store_locator: StoreLocator,
        store: Arc<dyn TenantStore>,
        failure_threshold: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            tenant_id,
            store_locator,
            store,
            created_at: now,
            last_used: Mutex::new(now),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Locator the pool was opened with
    pub fn store_locator(&self) -> &StoreLocator {
        &self.store_locator
    }

    pub fn dialect(&self) -> SqlDialect {
        self.store.dialect()
    }

    pub async fn list_relations(&self) -> Result<std::collections::BTreeSet<String>> {
        self.touch();
        let result = self.store.list_relations().await;
        self.observe(&result);
        result
    }

    pub async fn list_indexes(&self) -> Result<std::collections::BTreeSet<String>> {
        self.touch();
        let result = self.store.list_indexes().await;
        self.observe(&result);
        result
    }

    pub async fn apply_ddl(&self, statements: &[String]) -> Result<()> {
        self.touch();
        let result = self.store.apply_ddl(statements).await;
        self.observe(&result);
        result
    }

    pub async fn write(&self, write: &PreparedWrite) -> Result<u64> {
        self.touch();
        let result = self.store.write(write).await;
        self.observe(&result);
        result
    }

    pub async fn ping(&self) -> Result<()> {
        self.touch();
        let result = self.store.ping().await;
        self.observe(&result);
        result
    }

    pub fn usage(&self) -> PoolUsage {
        self.store.usage()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the handle was last acquired or used
    pub fn idle_for(&self) -> Duration {
        self.lock_last_used().elapsed()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Too many consecutive connection errors; the manager will recreate it.
    pub fn is_poisoned(&self) -> bool {
        self.consecutive_failures() >= self.failure_threshold
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.close().await;
        }
    }

    fn touch(&self) {
        *self.lock_last_used() = Instant::now();
    }

    fn lock_last_used(&self) -> MutexGuard<'_, Instant> {
        self.last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observe<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(e) if e.is_connection_error() => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == self.failure_threshold {
                    warn!(
                        tenant_id = %self.tenant_id,
                        failures,
                        "tenant pool marked unhealthy"
                    );
                }
            }
            Err(_) => {}
        }
    }
}

type CreationResult = std::result::Result<Arc<PooledConnectionHandle>, String>;
type SharedCreation = Shared<BoxFuture<'static, CreationResult>>;

enum Slot {
    Ready(Arc<PooledConnectionHandle>),
    Pending {
        generation: u64,
        locator: StoreLocator,
        creation: SharedCreation,
    },
}

type Slots = Arc<Mutex<HashMap<TenantId, Slot>>>;

fn lock(slots: &Mutex<HashMap<TenantId, Slot>>) -> MutexGuard<'_, HashMap<TenantId, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of one cached pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub tenant_id: TenantId,
    pub usage: PoolUsage,
    pub health: PoolHealthStatus,
    pub idle_secs: u64,
    pub age_secs: u64,
    pub consecutive_failures: u32,
}

/// Manager-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolManagerStats {
    pub cached_pools: usize,
    pub pending_creations: usize,
    pub max_pools: usize,
    pub connection_ceiling: u64,
    pub counters: PoolMonitorStats,
    pub pools: Vec<PoolSnapshot>,
}

/// Owns every tenant's connection pool
pub struct ConnectionPoolManager {
    connector: Arc<dyn StoreConnector>,
    config: PoolConfig,
    slots: Slots,
    next_generation: AtomicU64,
    monitor: Arc<PoolMonitor>,
    shut_down: AtomicBool,
}

enum Plan {
    Hit(Arc<PooledConnectionHandle>),
    Join(u64, SharedCreation),
}

impl ConnectionPoolManager {
    pub fn new(connector: Arc<dyn StoreConnector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            monitor: Arc::new(PoolMonitor::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Return the tenant's pool, creating it at most once per tenant at a time.
    pub async fn acquire(&self, tenant: &Tenant) -> Result<Arc<PooledConnectionHandle>> {
        let started = Instant::now();

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TenancyError::ShuttingDown);
        }

        if !tenant.is_active() {
            self.invalidate(&tenant.id, "tenant not active").await;
            self.monitor
                .record_acquisition(started.elapsed(), AcquisitionOutcome::Rejected);
            return Err(TenancyError::TenantInactive {
                tenant_id: tenant.id.clone(),
                status: tenant.status,
            });
        }

        let (plan, retired) = self.plan(tenant)?;
        for handle in retired {
            tokio::spawn(async move { handle.close().await });
        }

        match plan {
            Plan::Hit(handle) => {
                handle.touch();
                self.monitor
                    .record_acquisition(started.elapsed(), AcquisitionOutcome::CacheHit);
                Ok(handle)
            }
            Plan::Join(generation, creation) => match creation.await {
                Ok(handle) => {
                    handle.touch();
                    self.monitor
                        .record_acquisition(started.elapsed(), AcquisitionOutcome::Created);
                    Ok(handle)
                }
                Err(reason) => {
                    self.clear_pending(&tenant.id, generation);
                    self.monitor
                        .record_acquisition(started.elapsed(), AcquisitionOutcome::Failed);
                    Err(TenancyError::PoolCreationFailed {
                        tenant_id: tenant.id.clone(),
                        reason,
                    })
                }
            },
        }
    }

    /// Decide under the lock whether to reuse, join or start a creation.
    /// Returns handles that must be closed once the lock is released.
    fn plan(&self, tenant: &Tenant) -> Result<(Plan, Vec<Arc<PooledConnectionHandle>>)> {
        let mut retired = Vec::new();
        let mut slots = lock(&self.slots);

        match slots.get(&tenant.id) {
            Some(Slot::Ready(handle))
                if handle.store_locator() == &tenant.store_locator && !handle.is_poisoned() =>
            {
                return Ok((Plan::Hit(handle.clone()), retired));
            }
            Some(Slot::Ready(handle)) => {
                let reason = if handle.is_poisoned() {
                    "connection failures"
                } else {
                    "locator changed"
                };
                info!(tenant_id = %tenant.id, reason, "pool invalidated");
                self.monitor.record_invalidation();
                retired.push(handle.clone());
                slots.remove(&tenant.id);
            }
            Some(Slot::Pending {
                generation,
                locator,
                creation,
            }) if locator == &tenant.store_locator => {
                return Ok((Plan::Join(*generation, creation.clone()), retired));
            }
            Some(Slot::Pending { .. }) => {
                info!(tenant_id = %tenant.id, reason = "locator changed", "pool invalidated");
                self.monitor.record_invalidation();
                slots.remove(&tenant.id);
            }
            None => {}
        }

        if slots.len() >= self.config.max_pools {
            match self.evict_lru(&mut slots) {
                Some(handle) => retired.push(handle),
                None => {
                    return Err(TenancyError::PoolCreationFailed {
                        tenant_id: tenant.id.clone(),
                        reason: format!("pool limit of {} reached", self.config.max_pools),
                    })
                }
            }
        }

        let (generation, creation) = self.start_creation(tenant);
        slots.insert(
            tenant.id.clone(),
            Slot::Pending {
                generation,
                locator: tenant.store_locator.clone(),
                creation: creation.clone(),
            },
        );
        Ok((Plan::Join(generation, creation), retired))
    }

    fn evict_lru(
        &self,
        slots: &mut HashMap<TenantId, Slot>,
    ) -> Option<Arc<PooledConnectionHandle>> {
        let victim = slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready(handle) => Some((id.clone(), handle.idle_for())),
                Slot::Pending { .. } => None,
            })
            .max_by_key(|(_, idle)| *idle)
            .map(|(id, _)| id)?;

        match slots.remove(&victim) {
            Some(Slot::Ready(handle)) => {
                info!(tenant_id = %victim, reason = "pool limit", "pool invalidated");
                self.monitor.record_eviction();
                Some(handle)
            }
            _ => None,
        }
    }

    fn start_creation(&self, tenant: &Tenant) -> (u64, SharedCreation) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let connector = self.connector.clone();
        let slots = self.slots.clone();
        let monitor = self.monitor.clone();
        let limits = self.config.limits.clone();
        let threshold = self.config.failure_threshold;
        let tenant = tenant.clone();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let connected = tokio::time::timeout(
                limits.acquire_timeout,
                connector.connect(&tenant.id, &tenant.store_locator, &limits),
            )
            .await
            .unwrap_or_else(|_| {
                Err(TenancyError::Timeout {
                    operation: "pool creation",
                    elapsed: limits.acquire_timeout,
                })
            });

            let store = match connected {
                Ok(store) => store,
                Err(e) => {
                    monitor.record_creation(false);
                    let reason = match e {
                        TenancyError::PoolCreationFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    warn!(tenant_id = %tenant.id, error = %reason, "pool creation failed");
                    remove_pending(&slots, &tenant.id, generation);
                    return Err(reason);
                }
            };

            monitor.record_creation(true);
            let handle = Arc::new(PooledConnectionHandle::new(
                tenant.id.clone(),
                tenant.store_locator.clone(),
                store,
                threshold,
            ));

            let published = {
                let mut slots = lock(&slots);
                match slots.get(&tenant.id) {
                    Some(Slot::Pending { generation: g, .. }) if *g == generation => {
                        slots.insert(tenant.id.clone(), Slot::Ready(handle.clone()));
                        true
                    }
                    _ => false,
                }
            };

            if published {
                info!(
                    tenant_id = %tenant.id,
                    max_connections = limits.max_connections,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pool created"
                );
                Ok(handle)
            } else {
                handle.close().await;
                warn!(tenant_id = %tenant.id, "pool invalidated during creation");
                Err("pool invalidated during creation".to_string())
            }
        });

        let creation = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(format!("pool creation task failed: {e}")),
            }
        }
        .boxed()
        .shared();

        (generation, creation)
    }

    fn clear_pending(&self, tenant_id: &TenantId, generation: u64) {
        remove_pending(&self.slots, tenant_id, generation);
    }

    /// Drop and close the tenant's pool. Returns whether one was cached.
    ///
    /// A creation in flight is abandoned: its waiters get `PoolCreationFailed`.
    pub async fn invalidate(&self, tenant_id: &TenantId, reason: &str) -> bool {
        let removed = lock(&self.slots).remove(tenant_id);
        match removed {
            Some(slot) => {
                info!(tenant_id = %tenant_id, reason, "pool invalidated");
                self.monitor.record_invalidation();
                if let Slot::Ready(handle) = slot {
                    handle.close().await;
                }
                true
            }
            None => false,
        }
    }

    /// Evict pools whose tenant is gone, inactive, moved, unhealthy or idle.
    ///
    /// If the directory cannot be listed only the unhealthy and idle checks
    /// run. Returns the number of pools evicted.
    pub async fn sweep(&self, directory: &dyn TenantDirectory) -> usize {
        let tenants: Option<BTreeMap<TenantId, Tenant>> = match directory.list_tenants().await {
            Ok(tenants) => Some(tenants.into_iter().map(|t| (t.id.clone(), t)).collect()),
            Err(e) => {
                warn!(error = %e, "pool sweep could not list tenants");
                None
            }
        };

        let stale: Vec<(TenantId, &'static str)> = {
            let slots = lock(&self.slots);
            slots
                .iter()
                .filter_map(|(id, slot)| {
                    let Slot::Ready(handle) = slot else {
                        return None;
                    };
                    let reason = match tenants.as_ref().map(|t| t.get(id)) {
                        Some(None) => Some("tenant removed"),
                        Some(Some(t)) if !t.is_active() => Some("tenant not active"),
                        Some(Some(t)) if t.store_locator != handle.store_locator => {
                            Some("locator changed")
                        }
                        _ if handle.is_poisoned() => Some("connection failures"),
                        _ if handle.idle_for() >= self.config.idle_ttl => Some("idle"),
                        _ => None,
                    };
                    reason.map(|r| (id.clone(), r))
                })
                .collect()
        };

        let mut evicted = 0;
        for (tenant_id, reason) in stale {
            if self.invalidate(&tenant_id, reason).await {
                evicted += 1;
            }
        }
        debug!(evicted, "pool sweep finished");
        evicted
    }

    /// Tenants with a ready pool, sorted
    pub fn cached_tenants(&self) -> Vec<TenantId> {
        let slots = lock(&self.slots);
        let mut ids: Vec<TenantId> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ready handle for a tenant, without creating one
    pub fn get(&self, tenant_id: &TenantId) -> Option<Arc<PooledConnectionHandle>> {
        match lock(&self.slots).get(tenant_id) {
            Some(Slot::Ready(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn stats(&self) -> PoolManagerStats {
        let slots = lock(&self.slots);
        let mut pools: Vec<PoolSnapshot> = slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(handle) => {
                    let usage = handle.usage();
                    Some(PoolSnapshot {
                        tenant_id: handle.tenant_id().clone(),
                        usage,
                        health: self.monitor.assess(usage),
                        idle_secs: handle.idle_for().as_secs(),
                        age_secs: handle.age().as_secs(),
                        consecutive_failures: handle.consecutive_failures(),
                    })
                }
                Slot::Pending { .. } => None,
            })
            .collect();
        pools.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));

        PoolManagerStats {
            cached_pools: pools.len(),
            pending_creations: slots.len() - pools.len(),
            max_pools: self.config.max_pools,
            connection_ceiling: self.config.connection_ceiling(),
            counters: self.monitor.stats(),
            pools,
        }
    }

    /// Close every pool and refuse further acquisitions.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            if let Slot::Ready(handle) = slot {
                handle.close().await;
            }
        }
        info!(pools = count, "all tenant pools closed");
    }
}

fn remove_pending(slots: &Mutex<HashMap<TenantId, Slot>>, tenant_id: &TenantId, generation: u64) {
    let mut slots = lock(slots);
    if matches!(
        slots.get(tenant_id),
        Some(Slot::Pending { generation: g, .. }) if *g == generation
    ) {
        slots.remove(tenant_id);
    }
}
