//! Tenant directory implementations
//!
//! - [`InMemoryTenantDirectory`]: mutable map for local development and tests
//! - [`CachedTenantDirectory`]: TTL-bounded lookup cache over any directory
//!
//! The PostgreSQL directory lives in [`crate::infra::postgres`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::{Tenant, TenantId, TenantStatus};

use super::cache::{CacheStatsSnapshot, TenantCache};
use super::{Result, TenantDirectory};

/// In-memory tenant directory
#[derive(Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<BTreeMap<TenantId, Tenant>>,
    lookups: AtomicU64,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: RwLock::new(tenants.into_iter().map(|t| (t.id.clone(), t)).collect()),
            lookups: AtomicU64::new(0),
        }
    }

    /// Change a tenant's status; false if the tenant is unknown
    pub async fn set_status(&self, tenant_id: &TenantId, status: TenantStatus) -> bool {
        match self.tenants.write().await.get_mut(tenant_id) {
            Some(tenant) => {
                tenant.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, tenant_id: &TenantId) -> Option<Tenant> {
        self.tenants.write().await.remove(tenant_id)
    }

    /// Number of `lookup` calls served
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.read().await.values().cloned().collect())
    }
}

/// Lookup cache in front of another directory.
///
/// Only found tenants are cached, and `list_tenants` always goes to the
/// inner directory. A failed inner lookup is returned as-is.
pub struct CachedTenantDirectory<D> {
    inner: D,
    cache: TenantCache,
}

impl<D: TenantDirectory> CachedTenantDirectory<D> {
    pub fn new(inner: D, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TenantCache::new(capacity, ttl),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Drop a cached record so the next lookup reads the directory
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.cache.remove(tenant_id).await;
    }

    pub async fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired().await
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats().snapshot()
    }
}

#[async_trait]
impl<D: TenantDirectory> TenantDirectory for CachedTenantDirectory<D> {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        if let Some(tenant) = self.cache.get(tenant_id).await {
            return Ok(Some(tenant));
        }

        let found = self.inner.lookup(tenant_id).await?;
        if let Some(tenant) = &found {
            self.cache.insert(tenant_id.clone(), tenant.clone()).await;
        }
        Ok(found)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.inner.list_tenants().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{MockTenantDirectory, TenancyError};

    fn tenant(id: &str) -> Tenant {
        Tenant::new(id, format!("{id} Ltd"), format!("sqlite://{id}.db"))
    }

    #[tokio::test]
    async fn test_in_memory_status_changes() {
        let directory = InMemoryTenantDirectory::with_tenants([tenant("t1")]);

        assert!(directory.set_status(&"t1".into(), TenantStatus::Suspended).await);
        assert!(!directory.set_status(&"nope".into(), TenantStatus::Suspended).await);

        let found = directory.lookup(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(found.status, TenantStatus::Suspended);
        assert_eq!(directory.lookup_count(), 1);

        directory.remove(&"t1".into()).await;
        assert!(directory.lookup(&"t1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_directory_serves_hits_without_inner_call() {
        let mut inner = MockTenantDirectory::new();
        inner
            .expect_lookup()
            .times(1)
            .returning(|id| Ok(Some(tenant(id.as_str()))));

        let cached = CachedTenantDirectory::new(inner, 16, Duration::from_secs(30));
        for _ in 0..3 {
            let found = cached.lookup(&"t1".into()).await.unwrap();
            assert_eq!(found.unwrap().id.as_str(), "t1");
        }
        assert_eq!(cached.cache_stats().hits, 2);
    }

    #[tokio::test]
    async fn test_cached_directory_does_not_cache_misses() {
        let mut inner = MockTenantDirectory::new();
        inner.expect_lookup().times(2).returning(|_| Ok(None));

        let cached = CachedTenantDirectory::new(inner, 16, Duration::from_secs(30));
        assert!(cached.lookup(&"ghost".into()).await.unwrap().is_none());
        assert!(cached.lookup(&"ghost".into()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_not_served_when_directory_fails() {
        let mut inner = MockTenantDirectory::new();
        let mut seq = mockall::Sequence::new();
        inner
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| Ok(Some(tenant(id.as_str()))));
        inner
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TenancyError::DirectoryUnavailable("down".into())));

        let cached = CachedTenantDirectory::new(inner, 16, Duration::from_secs(30));
        assert!(cached.lookup(&"t1".into()).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        let err = cached.lookup(&"t1".into()).await.unwrap_err();
        assert!(matches!(err, TenancyError::DirectoryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ping_reaches_backend_past_a_warm_cache() {
        let mut inner = MockTenantDirectory::new();
        inner
            .expect_lookup()
            .times(1)
            .returning(|id| Ok(Some(tenant(id.as_str()))));
        inner
            .expect_ping()
            .times(1)
            .returning(|| Err(TenancyError::DirectoryUnavailable("down".into())));

        let cached = CachedTenantDirectory::new(inner, 16, Duration::from_secs(30));
        assert!(cached.lookup(&"t1".into()).await.unwrap().is_some());

        let err = cached.ping().await.unwrap_err();
        assert!(matches!(err, TenancyError::DirectoryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_in_memory_ping_is_a_lookup() {
        let directory = InMemoryTenantDirectory::new();
        directory.ping().await.unwrap();
        assert_eq!(directory.lookup_count(), 1);
    }
}
