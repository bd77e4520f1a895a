//! PostgreSQL-backed tenant store
//!
//! One bounded `PgPool` per tenant database. Catalog introspection reads
//! `information_schema.tables` and `pg_indexes` for the connection's current
//! schema only.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::BTreeSet;

use crate::domain::{PreparedWrite, SqlDialect, StoreLocator, WriteValue};
use crate::infra::{PoolLimits, PoolUsage, Result, TenantStore};

/// PostgreSQL store for a single tenant
pub struct PgTenantStore {
    pool: PgPool,
    max_connections: u32,
}

impl PgTenantStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, max_connections: u32) -> Self {
        Self {
            pool,
            max_connections,
        }
    }

    /// Open a bounded pool and verify one connection.
    pub async fn connect(locator: &StoreLocator, limits: &PoolLimits) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(limits.max_connections)
            .acquire_timeout(limits.acquire_timeout)
            .idle_timeout(limits.idle_timeout)
            .connect(locator.expose())
            .await?;

        Ok(Self::new(pool, limits.max_connections))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn list_relations(&self) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_type = 'BASE TABLE'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn list_indexes(&self) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT indexname::text
            FROM pg_indexes
            WHERE schemaname = current_schema()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn apply_ddl(&self, statements: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write(&self, write: &PreparedWrite) -> Result<u64> {
        let sql = write.insert_sql(SqlDialect::Postgres);
        let mut query = sqlx::query(&sql);
        for value in &write.values {
            query = match value {
                WriteValue::Null => query.bind(Option::<String>::None),
                WriteValue::Bool(b) => query.bind(*b),
                WriteValue::Integer(i) => query.bind(*i),
                WriteValue::Float(f) => query.bind(*f),
                WriteValue::Text(s) => query.bind(s.clone()),
                WriteValue::Json(v) => query.bind(Json(v.clone())),
            };
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn usage(&self) -> PoolUsage {
        PoolUsage {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
            max_connections: self.max_connections,
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
