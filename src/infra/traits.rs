//! Trait definitions for the tenancy core's external collaborators

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{PreparedWrite, SqlDialect, StoreLocator, Tenant, TenantId};

use super::Result;

/// Canonical registry of tenants and their store locators.
///
/// Read-only from this crate's point of view. `Ok(None)` means the tenant does
/// not exist; `Err` means the directory itself is unreachable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Look up a single tenant
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<Tenant>>;

    /// Every tenant regardless of status
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Reachability check for readiness. Never served from a cache.
    async fn ping(&self) -> Result<()> {
        self.lookup(&TenantId::new("__readiness_probe")).await.map(|_| ())
    }
}

#[async_trait]
impl<T: TenantDirectory + ?Sized> TenantDirectory for Arc<T> {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        (**self).lookup(tenant_id).await
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        (**self).list_tenants().await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

/// Live connection usage of one tenant pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub size: u32,
    pub idle: u32,
    pub max_connections: u32,
}

impl PoolUsage {
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }
}

/// Bounds applied to every tenant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// One tenant's isolated store, behind a bounded connection pool.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantStore: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// Names of the base relations in the store's catalog
    async fn list_relations(&self) -> Result<BTreeSet<String>>;

    /// Names of the indexes in the store's catalog
    async fn list_indexes(&self) -> Result<BTreeSet<String>>;

    /// Execute DDL statements atomically
    async fn apply_ddl(&self, statements: &[String]) -> Result<()>;

    /// Execute a parameterized insert, returning rows affected
    async fn write(&self, write: &PreparedWrite) -> Result<u64>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    fn usage(&self) -> PoolUsage;

    /// Close every connection; later calls fail with `PoolClosed`
    async fn close(&self);
}

/// Opens tenant stores from their locators.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        tenant_id: &TenantId,
        locator: &StoreLocator,
        limits: &PoolLimits,
    ) -> Result<Arc<dyn TenantStore>>;
}
