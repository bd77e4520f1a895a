//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use backoffice_tenancy::domain::{
    CanonicalSchema, ColumnSpec, ColumnType, IndexSpec, PreparedWrite, RelationSpec, SqlDialect,
    StoreLocator, Tenant, TenantId, TenantStatus,
};
use backoffice_tenancy::infra::{
    InMemoryTenantDirectory, PoolLimits, PoolUsage, Result, ShutdownCoordinator, StoreConnector,
    TenancyError, TenantDirectory, TenantStore,
};
use backoffice_tenancy::server::{build_router, build_state, AppState, Config};

// ============================================================================
// Tenants
// ============================================================================

pub fn tenant(id: &str) -> Tenant {
    Tenant::new(id, format!("{id} Ltd"), format!("fake://{id}"))
}

pub fn suspended(id: &str) -> Tenant {
    tenant(id).with_status(TenantStatus::Suspended)
}

// ============================================================================
// Schemas
// ============================================================================

/// `count` independent relations named `rel_00`, `rel_01`, ... each with an id
/// column and one index.
pub fn flat_schema(count: usize) -> CanonicalSchema {
    let relations = (0..count)
        .map(|i| {
            let name = relation_name(i);
            RelationSpec::new(name.clone())
                .column(ColumnSpec::id())
                .column(ColumnSpec::new("label", ColumnType::Text))
                .index(IndexSpec::new(format!("idx_{name}_label"), ["label"]))
        })
        .collect();
    CanonicalSchema::new(1, relations).expect("valid flat schema")
}

pub fn relation_name(i: usize) -> String {
    format!("rel_{i:02}")
}

// ============================================================================
// Fake tenant store
// ============================================================================

/// In-memory store whose catalog follows the DDL applied to it.
#[derive(Default)]
pub struct FakeStore {
    relations: Mutex<BTreeSet<String>>,
    indexes: Mutex<BTreeSet<String>>,
    applied: Mutex<Vec<String>>,
    writes: AtomicU64,
    write_failures: AtomicU64,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds the given relations and their indexes
    pub fn with_relations(schema: &CanonicalSchema, names: impl IntoIterator<Item = String>) -> Self {
        let store = Self::new();
        for name in names {
            if let Some(spec) = schema.relation(&name) {
                let mut indexes = store.indexes.lock().unwrap();
                for index in &spec.indexes {
                    indexes.insert(index.name.clone());
                }
            }
            store.relations.lock().unwrap().insert(name);
        }
        store
    }

    pub fn failing_writes() -> Self {
        let store = Self::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn relations(&self) -> BTreeSet<String> {
        self.relations.lock().unwrap().clone()
    }

    pub fn applied_ddl(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::SeqCst)
    }
}

/// Object name following `IF NOT EXISTS` in a DDL statement
fn ddl_target(sql: &str) -> String {
    sql.split_whitespace()
        .skip_while(|w| *w != "EXISTS")
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TenantStore for FakeStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn list_relations(&self) -> Result<BTreeSet<String>> {
        Ok(self.relations())
    }

    async fn list_indexes(&self) -> Result<BTreeSet<String>> {
        Ok(self.indexes.lock().unwrap().clone())
    }

    async fn apply_ddl(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.applied.lock().unwrap().push(sql.clone());
            let target = ddl_target(sql);
            if sql.starts_with("CREATE TABLE") {
                self.relations.lock().unwrap().insert(target);
            } else {
                self.indexes.lock().unwrap().insert(target);
            }
        }
        Ok(())
    }

    async fn write(&self, _write: &PreparedWrite) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.write_failures.fetch_add(1, Ordering::SeqCst);
            return Err(TenancyError::Database(sqlx::Error::PoolTimedOut));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn usage(&self) -> PoolUsage {
        PoolUsage {
            size: 1,
            idle: 1,
            max_connections: 5,
        }
    }

    async fn close(&self) {}
}

// ============================================================================
// Connectors
// ============================================================================

/// Hands out pre-registered fake stores by locator and counts connects.
///
/// Unregistered locators fail like an unreachable server.
#[derive(Default)]
pub struct FakeConnector {
    stores: Mutex<HashMap<String, Arc<FakeStore>>>,
    connects: AtomicU64,
    delay: Option<Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect sleeps first, widening the window for concurrent callers
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn register(&self, tenant: &Tenant, store: Arc<FakeStore>) {
        self.stores
            .lock()
            .unwrap()
            .insert(tenant.store_locator.expose().to_string(), store);
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(
        &self,
        tenant_id: &TenantId,
        locator: &StoreLocator,
        _limits: &PoolLimits,
    ) -> Result<Arc<dyn TenantStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let store = self.stores.lock().unwrap().get(locator.expose()).cloned();
        match store {
            Some(store) => Ok(store),
            None => Err(TenancyError::PoolCreationFailed {
                tenant_id: tenant_id.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Locator for a fresh SQLite file inside `dir`
pub fn sqlite_locator(dir: &tempfile::TempDir, name: &str) -> String {
    format!("sqlite://{}/{name}.db?mode=rwc", dir.path().display())
}

// ============================================================================
// HTTP app
// ============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub directory: Arc<InMemoryTenantDirectory>,
    pub connector: Arc<FakeConnector>,
    pub coordinator: Arc<ShutdownCoordinator>,
}

/// Full router over an in-memory directory and the given connector.
///
/// Must be called inside a Tokio runtime.
pub fn test_app(tenants: Vec<Tenant>, connector: Arc<FakeConnector>, config: Config) -> TestApp {
    let directory = Arc::new(InMemoryTenantDirectory::with_tenants(tenants));
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let state = build_state(
        &config,
        directory.clone() as Arc<dyn TenantDirectory>,
        connector.clone() as Arc<dyn StoreConnector>,
        &coordinator,
    )
    .expect("state");
    let router = build_router(state.clone(), &config.resolution, &coordinator).expect("router");

    TestApp {
        router,
        state,
        directory,
        connector,
        coordinator,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str, tenant: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-id", tenant);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        tenant: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-id", tenant);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}
