//! Schema reconciliation engine
//!
//! Diffs each tenant store's catalog against the [`CanonicalSchema`] and
//! creates whatever is missing. All DDL is `IF NOT EXISTS`, and a tenant with
//! nothing missing gets no DDL at all, so reruns are free.

mod canonical;

pub use canonical::{backoffice_relations, backoffice_schema, BACKOFFICE_SCHEMA_VERSION};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::{
    CanonicalSchema, IndexSpec, ReconciliationOutcome, ReconciliationReport, RelationSpec, Tenant,
};
use crate::infra::{ConnectionPoolManager, Result, TenancyError, TenantDirectory};

/// Reconciliation configuration
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Tenants reconciled at once by `reconcile_all`
    pub concurrency: usize,
    /// Budget for one tenant, acquire through verification
    pub tenant_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            tenant_timeout: Duration::from_secs(120),
        }
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("RECONCILE_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            tenant_timeout: std::env::var("RECONCILE_TENANT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.tenant_timeout),
        }
    }
}

/// Aggregate view of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub tenants: usize,
    pub already_complete: usize,
    pub repaired: usize,
    pub failed: usize,
    pub applied_relations: usize,
    pub applied_indexes: usize,
}

impl ReconcileSummary {
    pub fn from_reports(reports: &[ReconciliationReport]) -> Self {
        let mut summary = Self {
            tenants: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.outcome {
                ReconciliationOutcome::AlreadyComplete => summary.already_complete += 1,
                ReconciliationOutcome::Repaired => summary.repaired += 1,
                ReconciliationOutcome::Failed => summary.failed += 1,
            }
            summary.applied_relations += report.applied_relations.len();
            summary.applied_indexes += report.applied_indexes.len();
        }
        summary
    }
}

/// What a catalog diff found missing, in apply order
struct Gaps<'a> {
    relations: Vec<&'a RelationSpec>,
    /// (relation, index) pairs for indexes on relations that already exist
    indexes: Vec<(&'a str, &'a IndexSpec)>,
}

impl Gaps<'_> {
    fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.indexes.is_empty()
    }
}

/// Per-tenant schema repair
pub struct ReconciliationEngine {
    directory: Arc<dyn TenantDirectory>,
    pools: Arc<ConnectionPoolManager>,
    schema: Arc<CanonicalSchema>,
    config: ReconcileConfig,
    reports_tx: broadcast::Sender<ReconciliationReport>,
}

impl ReconciliationEngine {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        pools: Arc<ConnectionPoolManager>,
        schema: Arc<CanonicalSchema>,
        config: ReconcileConfig,
    ) -> Self {
        let (reports_tx, _) = broadcast::channel(256);
        Self {
            directory,
            pools,
            schema,
            config,
            reports_tx,
        }
    }

    pub fn schema(&self) -> &Arc<CanonicalSchema> {
        &self.schema
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Stream of every report produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReconciliationReport> {
        self.reports_tx.subscribe()
    }

    /// Reconcile one tenant. Never fails: errors land in the report.
    pub async fn reconcile(&self, tenant: &Tenant) -> ReconciliationReport {
        let started = Instant::now();
        let mut report = ReconciliationReport::new(tenant.id.clone(), self.schema.version());

        let budget = self.config.tenant_timeout;
        let result = match tokio::time::timeout(budget, self.run(tenant, &mut report)).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::Timeout {
                operation: "reconciliation",
                elapsed: budget,
            }),
        };

        if let Err(e) = result {
            let failure = TenancyError::ReconciliationPartialFailure {
                tenant_id: tenant.id.clone(),
                reason: e.to_string(),
            };
            warn!(tenant_id = %tenant.id, error = %failure, "reconciliation error");
            report.outcome = ReconciliationOutcome::Failed;
            report.error = Some(e.to_string());
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            tenant_id = %report.tenant_id,
            outcome = %report.outcome,
            applied = report.applied_ddl_count(),
            missing = report.missing_relations.len(),
            final_relation_count = report.final_relation_count,
            duration_ms = report.duration_ms,
            "reconciliation finished"
        );
        let _ = self.reports_tx.send(report.clone());
        report
    }

    async fn run(&self, tenant: &Tenant, report: &mut ReconciliationReport) -> Result<()> {
        let handle = self.pools.acquire(tenant).await?;

        let relations = handle.list_relations().await?;
        let indexes = handle.list_indexes().await?;
        let gaps = self.diff(&relations, &indexes);

        report.missing_relations = gaps.relations.iter().map(|r| r.name.clone()).collect();
        report.missing_indexes = gaps
            .relations
            .iter()
            .flat_map(|r| r.indexes.iter().map(|i| i.name.clone()))
            .chain(gaps.indexes.iter().map(|(_, i)| i.name.clone()))
            .collect();

        if gaps.is_empty() {
            report.final_relation_count = relations.len();
            report.outcome = ReconciliationOutcome::AlreadyComplete;
            return Ok(());
        }

        let dialect = handle.dialect();
        let mut statements = Vec::new();
        let mut applied_relations = Vec::new();
        let mut applied_indexes = Vec::new();
        for relation in &gaps.relations {
            statements.push(relation.create_table_sql(dialect));
            applied_relations.push(relation.name.clone());
            for index in &relation.indexes {
                statements.push(RelationSpec::create_index_sql(index, &relation.name));
                applied_indexes.push(index.name.clone());
            }
        }
        for (relation, index) in &gaps.indexes {
            statements.push(RelationSpec::create_index_sql(index, relation));
            applied_indexes.push(index.name.clone());
        }

        handle.apply_ddl(&statements).await?;
        report.applied_relations = applied_relations;
        report.applied_indexes = applied_indexes;

        let after = handle.list_relations().await?;
        report.final_relation_count = after.len();
        report.still_missing = self
            .schema
            .relation_names()
            .into_iter()
            .filter(|name| !after.contains(name))
            .collect();

        report.outcome = if report.still_missing.is_empty() {
            ReconciliationOutcome::Repaired
        } else {
            report.error = Some(format!(
                "{} canonical relations still missing",
                report.still_missing.len()
            ));
            ReconciliationOutcome::Failed
        };
        Ok(())
    }

    fn diff<'a>(&'a self, relations: &BTreeSet<String>, indexes: &BTreeSet<String>) -> Gaps<'a> {
        let mut gaps = Gaps {
            relations: Vec::new(),
            indexes: Vec::new(),
        };
        for relation in self.schema.ordered() {
            if !relations.contains(&relation.name) {
                gaps.relations.push(relation);
                continue;
            }
            for index in &relation.indexes {
                if !indexes.contains(&index.name) {
                    gaps.indexes.push((relation.name.as_str(), index));
                }
            }
        }
        gaps
    }

    /// Reconcile the given tenants with bounded parallelism.
    ///
    /// Reports come back in input order; one tenant failing does not affect
    /// the others.
    pub async fn reconcile_tenants(&self, tenants: Vec<Tenant>) -> Vec<ReconciliationReport> {
        stream::iter(tenants)
            .map(|tenant| async move { self.reconcile(&tenant).await })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Reconcile every active tenant in the directory.
    ///
    /// Errors only when the directory cannot be listed.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>> {
        let tenants: Vec<Tenant> = self
            .directory
            .list_tenants()
            .await?
            .into_iter()
            .filter(Tenant::is_active)
            .collect();

        let reports = self.reconcile_tenants(tenants).await;
        let summary = ReconcileSummary::from_reports(&reports);
        info!(
            tenants = summary.tenants,
            repaired = summary.repaired,
            already_complete = summary.already_complete,
            failed = summary.failed,
            "reconciliation sweep finished"
        );
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnSpec, ColumnType, SqlDialect, TenantId};
    use crate::infra::{
        MockStoreConnector, MockTenantDirectory, MockTenantStore, PoolConfig, TenantStore,
    };
    use std::sync::Mutex;

    fn schema() -> Arc<CanonicalSchema> {
        Arc::new(
            CanonicalSchema::new(
                1,
                vec![
                    RelationSpec::new("orders")
                        .column(ColumnSpec::id())
                        .column(ColumnSpec::new("customer_id", ColumnType::BigInt).references("customers"))
                        .index(IndexSpec::new("idx_orders_customer", ["customer_id"])),
                    RelationSpec::new("customers").column(ColumnSpec::id()),
                ],
            )
            .unwrap(),
        )
    }

    fn tenant(id: &str) -> Tenant {
        Tenant::new(TenantId::new(id), "Org", "sqlite://t.db")
    }

    /// Store whose catalog grows with applied DDL
    fn fake_store(existing: &[&str], indexes: &[&str]) -> (MockTenantStore, Arc<Mutex<Vec<String>>>) {
        let relations = Arc::new(Mutex::new(
            existing.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        ));
        let idx = Arc::new(Mutex::new(
            indexes.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        ));
        let applied = Arc::new(Mutex::new(Vec::new()));

        let mut store = MockTenantStore::new();
        store
            .expect_dialect()
            .return_const(SqlDialect::Sqlite);
        let r = relations.clone();
        store
            .expect_list_relations()
            .returning(move || Ok(r.lock().unwrap().clone()));
        let i = idx.clone();
        store
            .expect_list_indexes()
            .returning(move || Ok(i.lock().unwrap().clone()));
        let (r, i, log) = (relations.clone(), idx.clone(), applied.clone());
        store.expect_apply_ddl().returning(move |statements| {
            for sql in statements {
                log.lock().unwrap().push(sql.clone());
                let name = sql
                    .split_whitespace()
                    .skip_while(|w| *w != "EXISTS")
                    .nth(1)
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string();
                if sql.contains("TABLE") {
                    r.lock().unwrap().insert(name);
                } else {
                    i.lock().unwrap().insert(name);
                }
            }
            Ok(())
        });
        store.expect_close().returning(|| ());
        (store, applied)
    }

    fn engine_with(store: MockTenantStore) -> ReconciliationEngine {
        let store: Arc<dyn TenantStore> = Arc::new(store);
        let mut connector = MockStoreConnector::new();
        connector
            .expect_connect()
            .returning(move |_, _, _| Ok(store.clone()));
        let pools = Arc::new(ConnectionPoolManager::new(
            Arc::new(connector),
            PoolConfig::default(),
        ));
        ReconciliationEngine::new(
            Arc::new(MockTenantDirectory::new()),
            pools,
            schema(),
            ReconcileConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_relations_created_in_dependency_order() {
        let (store, applied) = fake_store(&[], &[]);
        let engine = engine_with(store);

        let report = engine.reconcile(&tenant("t1")).await;
        assert_eq!(report.outcome, ReconciliationOutcome::Repaired);
        assert_eq!(report.applied_relations, vec!["customers", "orders"]);
        assert_eq!(report.applied_indexes, vec!["idx_orders_customer"]);
        assert_eq!(report.final_relation_count, 2);

        let applied = applied.lock().unwrap();
        assert!(applied[0].starts_with("CREATE TABLE IF NOT EXISTS customers"));
        assert!(applied[1].starts_with("CREATE TABLE IF NOT EXISTS orders"));
        assert!(applied[2].contains("INDEX"));
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing() {
        let (store, applied) = fake_store(&[], &[]);
        let engine = engine_with(store);

        engine.reconcile(&tenant("t1")).await;
        let count = applied.lock().unwrap().len();

        let report = engine.reconcile(&tenant("t1")).await;
        assert_eq!(report.outcome, ReconciliationOutcome::AlreadyComplete);
        assert_eq!(report.applied_ddl_count(), 0);
        assert_eq!(applied.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_missing_index_on_existing_relation() {
        let (store, _) = fake_store(&["customers", "orders"], &[]);
        let engine = engine_with(store);

        let report = engine.reconcile(&tenant("t1")).await;
        assert_eq!(report.outcome, ReconciliationOutcome::Repaired);
        assert!(report.applied_relations.is_empty());
        assert_eq!(report.applied_indexes, vec!["idx_orders_customer"]);
    }

    #[tokio::test]
    async fn test_ddl_that_does_not_stick_is_failed() {
        let mut store = MockTenantStore::new();
        store
            .expect_dialect()
            .return_const(SqlDialect::Sqlite);
        store
            .expect_list_relations()
            .returning(|| Ok(BTreeSet::from(["customers".to_string()])));
        store.expect_list_indexes().returning(|| Ok(BTreeSet::new()));
        store.expect_apply_ddl().returning(|_| Ok(()));
        store.expect_close().returning(|| ());
        let engine = engine_with(store);

        let report = engine.reconcile(&tenant("t1")).await;
        assert_eq!(report.outcome, ReconciliationOutcome::Failed);
        assert_eq!(report.still_missing, BTreeSet::from(["orders".to_string()]));
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_reports_are_broadcast() {
        let (store, _) = fake_store(&["customers", "orders"], &["idx_orders_customer"]);
        let engine = engine_with(store);
        let mut rx = engine.subscribe();

        engine.reconcile(&tenant("t1")).await;
        let report = rx.recv().await.unwrap();
        assert_eq!(report.tenant_id, TenantId::new("t1"));
        assert_eq!(report.outcome, ReconciliationOutcome::AlreadyComplete);
    }

    #[test]
    fn test_summary_counts() {
        let mut repaired = ReconciliationReport::new(TenantId::new("a"), 1);
        repaired.outcome = ReconciliationOutcome::Repaired;
        repaired.applied_relations = vec!["x".into(), "y".into()];
        let failed = ReconciliationReport::new(TenantId::new("b"), 1);

        let summary = ReconcileSummary::from_reports(&[repaired, failed]);
        assert_eq!(summary.tenants, 2);
        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.applied_relations, 2);
    }
}
