//! Schema reconciliation integration tests

mod common;

use common::*;
use std::sync::Arc;

use backoffice_tenancy::domain::{CanonicalSchema, ReconciliationOutcome, TenantStatus};
use backoffice_tenancy::infra::{
    ConnectionPoolManager, InMemoryTenantDirectory, PoolConfig, SqlxStoreConnector,
    StoreConnector, TenantDirectory,
};
use backoffice_tenancy::reconcile::{
    backoffice_schema, ReconcileConfig, ReconcileSummary, ReconciliationEngine,
};
use backoffice_tenancy::Tenant;

fn engine(
    tenants: Vec<Tenant>,
    connector: Arc<dyn StoreConnector>,
    schema: CanonicalSchema,
) -> ReconciliationEngine {
    let directory: Arc<dyn TenantDirectory> =
        Arc::new(InMemoryTenantDirectory::with_tenants(tenants));
    let pools = Arc::new(ConnectionPoolManager::new(connector, PoolConfig::default()));
    ReconciliationEngine::new(
        directory,
        pools,
        Arc::new(schema),
        ReconcileConfig::default(),
    )
}

// ============================================================================
// Fake stores
// ============================================================================

#[tokio::test]
async fn test_partial_store_is_repaired_to_full_schema() {
    let schema = flat_schema(50);
    let t1 = tenant("t1");
    let store = Arc::new(FakeStore::with_relations(
        &schema,
        (0..42).map(relation_name),
    ));
    let connector = Arc::new(FakeConnector::new());
    connector.register(&t1, store.clone());
    let engine = engine(vec![t1.clone()], connector, schema);

    let report = engine.reconcile(&t1).await;

    assert_eq!(report.outcome, ReconciliationOutcome::Repaired);
    assert_eq!(report.missing_relations.len(), 8);
    assert_eq!(
        report.applied_relations,
        (42..50).map(relation_name).collect::<Vec<_>>()
    );
    assert_eq!(report.applied_indexes.len(), 8);
    assert!(report.still_missing.is_empty());
    assert_eq!(report.final_relation_count, 50);
    assert_eq!(store.relations().len(), 50);
}

#[tokio::test]
async fn test_second_pass_applies_nothing() {
    let schema = flat_schema(50);
    let t1 = tenant("t1");
    let store = Arc::new(FakeStore::with_relations(
        &schema,
        (0..42).map(relation_name),
    ));
    let connector = Arc::new(FakeConnector::new());
    connector.register(&t1, store.clone());
    let engine = engine(vec![t1.clone()], connector, schema);

    engine.reconcile(&t1).await;
    let ddl_after_first = store.applied_ddl().len();
    let second = engine.reconcile(&t1).await;

    assert_eq!(second.outcome, ReconciliationOutcome::AlreadyComplete);
    assert_eq!(second.applied_ddl_count(), 0);
    assert_eq!(second.final_relation_count, 50);
    assert_eq!(store.applied_ddl().len(), ddl_after_first);
}

#[tokio::test]
async fn test_unreachable_tenant_does_not_stop_the_others() {
    let schema = flat_schema(10);
    let healthy = tenant("t1");
    let unreachable = tenant("t2");
    let store = Arc::new(FakeStore::new());
    let connector = Arc::new(FakeConnector::new());
    connector.register(&healthy, store.clone());
    let engine = engine(
        vec![healthy.clone(), unreachable.clone()],
        connector,
        schema,
    );

    let reports = engine.reconcile_all().await.unwrap();

    assert_eq!(reports.len(), 2);
    let t1 = reports.iter().find(|r| r.tenant_id == healthy.id).unwrap();
    let t2 = reports
        .iter()
        .find(|r| r.tenant_id == unreachable.id)
        .unwrap();
    assert_eq!(t1.outcome, ReconciliationOutcome::Repaired);
    assert_eq!(t1.final_relation_count, 10);
    assert_eq!(t2.outcome, ReconciliationOutcome::Failed);
    assert!(t2.error.as_deref().unwrap_or_default().contains("t2"));

    let summary = ReconcileSummary::from_reports(&reports);
    assert_eq!(summary.tenants, 2);
    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_sweep_skips_inactive_tenants() {
    let schema = flat_schema(3);
    let active = tenant("t1");
    let suspended = suspended("t2");
    let deleted = tenant("t3").with_status(TenantStatus::Deleted);
    let connector = Arc::new(FakeConnector::new());
    connector.register(&active, Arc::new(FakeStore::new()));
    let engine = engine(
        vec![active.clone(), suspended, deleted],
        connector.clone(),
        schema,
    );

    let reports = engine.reconcile_all().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].tenant_id, active.id);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_reports_are_broadcast() {
    let schema = flat_schema(2);
    let t1 = tenant("t1");
    let connector = Arc::new(FakeConnector::new());
    connector.register(&t1, Arc::new(FakeStore::new()));
    let engine = engine(vec![t1.clone()], connector, schema);
    let mut reports = engine.subscribe();

    engine.reconcile(&t1).await;

    let report = reports.recv().await.unwrap();
    assert_eq!(report.tenant_id, t1.id);
    assert_eq!(report.outcome, ReconciliationOutcome::Repaired);
}

// ============================================================================
// SQLite end to end
// ============================================================================

#[tokio::test]
async fn test_sqlite_store_reaches_canonical_backoffice_schema() {
    let dir = tempfile::tempdir().unwrap();
    let t1 = Tenant::new("t1", "Acme", sqlite_locator(&dir, "t1"));
    let schema = backoffice_schema().unwrap();
    let canonical = schema.len();
    let engine = engine(
        vec![t1.clone()],
        Arc::new(SqlxStoreConnector::new()),
        schema,
    );

    let first = engine.reconcile(&t1).await;
    assert_eq!(first.outcome, ReconciliationOutcome::Repaired, "{first:?}");
    assert_eq!(first.applied_relations.len(), canonical);
    assert_eq!(first.final_relation_count, canonical);

    let second = engine.reconcile(&t1).await;
    assert_eq!(second.outcome, ReconciliationOutcome::AlreadyComplete);
    assert_eq!(second.applied_ddl_count(), 0);
}
