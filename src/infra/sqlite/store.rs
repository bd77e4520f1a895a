//! SQLite-backed tenant store
//!
//! Used for single-node deployments and in tests. The database file must
//! already exist unless the locator asks for `mode=rwc`.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::domain::{PreparedWrite, SqlDialect, StoreLocator, WriteValue};
use crate::infra::{PoolLimits, PoolUsage, Result, TenantStore};

/// SQLite store for a single tenant
pub struct SqliteTenantStore {
    pool: SqlitePool,
    max_connections: u32,
}

impl SqliteTenantStore {
    pub fn new(pool: SqlitePool, max_connections: u32) -> Self {
        Self {
            pool,
            max_connections,
        }
    }

    /// Open a bounded pool and verify one connection.
    pub async fn connect(locator: &StoreLocator, limits: &PoolLimits) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(locator.expose())?;
        let pool = SqlitePoolOptions::new()
            .max_connections(limits.max_connections)
            .acquire_timeout(limits.acquire_timeout)
            .idle_timeout(limits.idle_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool, limits.max_connections))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn catalog(&self, kind: &str) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = ? AND name NOT LIKE 'sqlite_%'
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn list_relations(&self) -> Result<BTreeSet<String>> {
        self.catalog("table").await
    }

    async fn list_indexes(&self) -> Result<BTreeSet<String>> {
        self.catalog("index").await
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
        let sql = write.insert_sql(SqlDialect::Sqlite);
        let mut query = sqlx::query(&sql);
        for value in &write.values {
            query = match value {
                WriteValue::Null => query.bind(Option::<String>::None),
                WriteValue::Bool(b) => query.bind(*b),
                WriteValue::Integer(i) => query.bind(*i),
                WriteValue::Float(f) => query.bind(*f),
                WriteValue::Text(s) => query.bind(s.clone()),
                WriteValue::Json(v) => query.bind(v.to_string()),
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
