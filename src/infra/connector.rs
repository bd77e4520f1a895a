//! Store connector backed by sqlx
//!
//! Picks the backend from the locator scheme: `postgres://` / `postgresql://`
//! open a [`PgTenantStore`], `sqlite:` opens a [`SqliteTenantStore`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{StoreLocator, TenantId};

use super::postgres::PgTenantStore;
use super::sqlite::SqliteTenantStore;
use super::{PoolLimits, Result, StoreConnector, TenancyError, TenantStore};

/// Production [`StoreConnector`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxStoreConnector;

impl SqlxStoreConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for SqlxStoreConnector {
    async fn connect(
        &self,
        tenant_id: &TenantId,
        locator: &StoreLocator,
        limits: &PoolLimits,
    ) -> Result<Arc<dyn TenantStore>> {
        let failed = |reason: String| TenancyError::PoolCreationFailed {
            tenant_id: tenant_id.clone(),
            reason,
        };

        match locator.scheme().as_deref() {
            Some("postgres") | Some("postgresql") => {
                let store = PgTenantStore::connect(locator, limits)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Arc::new(store))
            }
            Some("sqlite") => {
                let store = SqliteTenantStore::connect(locator, limits)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Arc::new(store))
            }
            other => Err(failed(format!(
                "unsupported store locator scheme {:?} in {}",
                other.unwrap_or(""),
                locator.redacted()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_scheme_is_creation_failure() {
        let err = SqlxStoreConnector::new()
            .connect(
                &"t1".into(),
                &StoreLocator::new("mysql://user:secret@db/t1"),
                &PoolLimits::default(),
            )
            .await
            .err()
            .unwrap();
        match err {
            TenancyError::PoolCreationFailed { tenant_id, reason } => {
                assert_eq!(tenant_id.as_str(), "t1");
                assert!(!reason.contains("secret"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_sqlite_file_is_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let locator = format!("sqlite://{}", dir.path().join("absent/t2.db").display());
        let err = SqlxStoreConnector::new()
            .connect(&"t2".into(), &StoreLocator::new(locator), &PoolLimits::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TenancyError::PoolCreationFailed { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_store_opens() {
        let dir = tempfile::tempdir().unwrap();
        let locator = format!("sqlite://{}?mode=rwc", dir.path().join("t1.db").display());
        let store = SqlxStoreConnector::new()
            .connect(&"t1".into(), &StoreLocator::new(locator), &PoolLimits::default())
            .await
            .unwrap();
        store.ping().await.unwrap();
        assert!(store.usage().size >= 1);
        store.close().await;
    }
}
