//! Performs one write attempt for the pipeline workers

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

use crate::domain::{CanonicalSchema, WriteRequest};
use crate::infra::{Result, TenancyError};
use crate::resolution::TenantResolver;

/// A single write attempt. Returns rows affected.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WriteExecutor: Send + Sync {
    async fn execute(&self, request: &WriteRequest) -> Result<u64>;
}

/// Resolves the tenant exactly like the request middleware, then inserts
/// through the tenant's pooled handle.
pub struct ResolvingWriteExecutor {
    resolver: TenantResolver,
    schema: Arc<CanonicalSchema>,
}

impl ResolvingWriteExecutor {
    pub fn new(resolver: TenantResolver, schema: Arc<CanonicalSchema>) -> Self {
        Self { resolver, schema }
    }
}

#[async_trait]
impl WriteExecutor for ResolvingWriteExecutor {
    async fn execute(&self, request: &WriteRequest) -> Result<u64> {
        let prepared = request
            .operation
            .prepare(&self.schema)
            .map_err(TenancyError::InvalidWrite)?;

        let context = self.resolver.resolve(&request.tenant_id).await?;
        context.handle.write(&prepared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ColumnSpec, ColumnType, RelationSpec, Tenant, TenantId, TenantStatus, WriteOperation,
        WriteValue,
    };
    use crate::infra::{
        ConnectionPoolManager, InMemoryTenantDirectory, MockStoreConnector, MockTenantStore,
        PoolConfig, TenantStore,
    };

    fn schema() -> Arc<CanonicalSchema> {
        Arc::new(
            CanonicalSchema::new(
                1,
                vec![RelationSpec::new("notes")
                    .column(ColumnSpec::id())
                    .column(ColumnSpec::new("body", ColumnType::Text))],
            )
            .unwrap(),
        )
    }

    fn request(tenant: &str, column: &str) -> WriteRequest {
        WriteRequest {
            tenant_id: TenantId::new(tenant),
            operation: WriteOperation::insert("notes")
                .value(column, WriteValue::Text("hello".into())),
        }
    }

    fn executor(tenant: Tenant, connector: MockStoreConnector) -> ResolvingWriteExecutor {
        let directory = Arc::new(InMemoryTenantDirectory::with_tenants([tenant]));
        let pools = Arc::new(ConnectionPoolManager::new(
            Arc::new(connector),
            PoolConfig::default(),
        ));
        ResolvingWriteExecutor::new(TenantResolver::new(directory, pools), schema())
    }

    #[tokio::test]
    async fn test_write_goes_through_tenant_handle() {
        let mut store = MockTenantStore::new();
        store
            .expect_write()
            .withf(|w| w.relation == "notes" && w.values.len() == 1)
            .times(1)
            .returning(|_| Ok(1));
        store.expect_close().returning(|| ());
        let store: Arc<dyn TenantStore> = Arc::new(store);

        let mut connector = MockStoreConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move |_, _, _| Ok(store.clone()));

        let executor = executor(Tenant::new("t1", "Org", "sqlite://t1.db"), connector);
        assert_eq!(executor.execute(&request("t1", "body")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_suspended_tenant_never_reaches_store() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().never();

        let tenant =
            Tenant::new("t1", "Org", "sqlite://t1.db").with_status(TenantStatus::Suspended);
        let executor = executor(tenant, connector);

        let err = executor.execute(&request("t1", "body")).await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantInactive { .. }));
    }

    #[tokio::test]
    async fn test_unknown_column_is_invalid_write() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().never();
        let executor = executor(Tenant::new("t1", "Org", "sqlite://t1.db"), connector);

        let err = executor
            .execute(&request("t1", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::InvalidWrite(_)));
    }
}
