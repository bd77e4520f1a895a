//! PostgreSQL-backed tenant directory
//!
//! Reads the shared `tenants` table created by the directory migrations.
//! Transient database errors are retried briefly; anything left over is
//! surfaced as `DirectoryUnavailable`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::domain::{StoreLocator, Tenant, TenantId, TenantStatus};
use crate::infra::retry::{is_retryable_db_error, Retry, RetryConfig};
use crate::infra::{Result, TenancyError, TenantDirectory};

#[derive(Debug, FromRow)]
struct TenantRow {
    id: String,
    organization_name: String,
    store_locator: String,
    status: String,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = TenancyError;

    fn try_from(row: TenantRow) -> Result<Self> {
        let status: TenantStatus = row
            .status
            .parse()
            .map_err(TenancyError::DirectoryUnavailable)?;
        Ok(Tenant {
            id: TenantId::new(row.id),
            organization_name: row.organization_name,
            store_locator: StoreLocator::new(row.store_locator),
            status,
        })
    }
}

/// PostgreSQL tenant directory
pub struct PgTenantDirectory {
    pool: PgPool,
    retry: Retry,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: Retry::new(RetryConfig::directory()),
        }
    }
}

fn unavailable(err: sqlx::Error) -> TenancyError {
    TenancyError::DirectoryUnavailable(err.to_string())
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        let row = self
            .retry
            .run_with_predicate(
                || {
                    sqlx::query_as::<_, TenantRow>(
                        r#"
                        SELECT id, organization_name, store_locator, status
                        FROM tenants
                        WHERE id = $1
                        "#,
                    )
                    .bind(tenant_id.as_str())
                    .fetch_optional(&self.pool)
                },
                is_retryable_db_error,
            )
            .await
            .into_result()
            .map_err(unavailable)?;

        row.map(Tenant::try_from).transpose()
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = self
            .retry
            .run_with_predicate(
                || {
                    sqlx::query_as::<_, TenantRow>(
                        r#"
                        SELECT id, organization_name, store_locator, status
                        FROM tenants
                        ORDER BY id
                        "#,
                    )
                    .fetch_all(&self.pool)
                },
                is_retryable_db_error,
            )
            .await
            .into_result()
            .map_err(unavailable)?;

        rows.into_iter().map(Tenant::try_from).collect()
    }
}
