//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for any valid input.

mod common;

use common::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use backoffice_tenancy::domain::{
    CanonicalSchema, ColumnSpec, ColumnType, ReconciliationOutcome, RelationSpec, TenantId,
    WriteOperation, WriteRequest, WriteValue,
};
use backoffice_tenancy::infra::{
    BackoffKind, ConnectionPoolManager, InMemoryTenantDirectory, PoolConfig, RetryConfig,
    TenancyError,
};
use backoffice_tenancy::pipeline::{BackgroundWriteTask, NextStep};
use backoffice_tenancy::reconcile::{ReconcileConfig, ReconciliationEngine};
use backoffice_tenancy::resolution::ExemptRoutes;

// ============================================================================
// Custom Strategies
// ============================================================================

/// Acyclic relation graph: relation `i` may only reference relations `< i`.
/// Declared in a shuffled order.
fn arb_dag_relations() -> impl Strategy<Value = Vec<RelationSpec>> {
    (1usize..12)
        .prop_flat_map(|n| {
            let edges = (0..n)
                .map(|i| proptest::collection::vec(any::<bool>(), i))
                .collect::<Vec<_>>();
            edges
        })
        .prop_map(|edges| {
            edges
                .iter()
                .enumerate()
                .map(|(i, refs)| {
                    let mut relation = RelationSpec::new(format!("r{i}")).column(ColumnSpec::id());
                    for (j, linked) in refs.iter().enumerate() {
                        if *linked {
                            relation = relation.column(
                                ColumnSpec::new(format!("r{j}_id"), ColumnType::BigInt)
                                    .references(format!("r{j}")),
                            );
                        }
                    }
                    relation
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
    (
        1u32..10,
        1u64..2_000,
        1u64..60_000,
        1.0f64..4.0,
        prop_oneof![Just(BackoffKind::Exponential), Just(BackoffKind::Linear)],
    )
        .prop_map(|(attempts, initial_ms, max_ms, multiplier, kind)| {
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms.max(initial_ms)))
                .with_multiplier(multiplier)
                .with_kind(kind)
                .with_jitter(0.0)
        })
}

fn request() -> WriteRequest {
    WriteRequest {
        tenant_id: TenantId::new("t1"),
        operation: WriteOperation::insert("rel_00").value("label", WriteValue::Text("x".into())),
    }
}

// ============================================================================
// Schema ordering
// ============================================================================

proptest! {
    /// Property: every relation comes after everything it references
    #[test]
    fn schema_order_respects_dependencies(relations in arb_dag_relations()) {
        let count = relations.len();
        let schema = CanonicalSchema::new(1, relations).unwrap();
        prop_assert_eq!(schema.len(), count);

        let mut seen = BTreeSet::new();
        for relation in schema.ordered() {
            for dependency in relation.dependencies() {
                prop_assert!(seen.contains(dependency), "{} before {}", relation.name, dependency);
            }
            seen.insert(relation.name.as_str());
        }
    }

    /// Property: a reference cycle is rejected
    #[test]
    fn schema_with_back_edge_is_rejected(n in 2usize..8) {
        let mut relations: Vec<RelationSpec> = (0..n)
            .map(|i| {
                let mut r = RelationSpec::new(format!("r{i}")).column(ColumnSpec::id());
                if i > 0 {
                    r = r.column(
                        ColumnSpec::new("prev_id", ColumnType::BigInt)
                            .references(format!("r{}", i - 1)),
                    );
                }
                r
            })
            .collect();
        relations[0] = relations[0].clone().column(
            ColumnSpec::new("last_id", ColumnType::BigInt).references(format!("r{}", n - 1)),
        );

        prop_assert!(CanonicalSchema::new(1, relations).is_err());
    }
}

// ============================================================================
// Backoff
// ============================================================================

proptest! {
    /// Property: without jitter, delays never shrink and never exceed the cap
    #[test]
    fn backoff_is_non_decreasing_and_capped(config in arb_retry_config()) {
        let delays: Vec<Duration> = (1..=12).map(|a| config.delay_after_attempt(a)).collect();
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{:?}", delays);
        }
        for delay in &delays {
            prop_assert!(*delay <= config.max_delay);
        }
    }

    /// Property: a task that always fails is retried exactly `max_attempts - 1`
    /// times and then abandoned, once
    #[test]
    fn task_budget_is_exact(config in arb_retry_config()) {
        let max = config.max_attempts.max(1);
        let mut task = BackgroundWriteTask::new(request(), config);
        let error = TenancyError::Database(sqlx::Error::PoolTimedOut);

        let mut retries = 0;
        loop {
            task.begin_attempt();
            match task.fail(&error) {
                NextStep::RetryAfter(_) => retries += 1,
                NextStep::Abandon => break,
            }
            prop_assert!(task.attempt() < max);
        }

        prop_assert_eq!(retries, max - 1);
        prop_assert_eq!(task.attempt(), max);
        prop_assert!(task.state().is_terminal());
        prop_assert!(task.delays().windows(2).all(|w| w[0] <= w[1]));
    }
}

// ============================================================================
// Allow-list
// ============================================================================

proptest! {
    /// Property: only exact paths are exempt
    #[test]
    fn exempt_match_is_exact(suffix in "[a-z/]{1,8}") {
        let routes = ExemptRoutes::builtin();
        prop_assert!(routes.is_exempt("/health"));
        let extended = format!("/health{suffix}");
        prop_assert!(!routes.is_exempt(&extended));
    }
}

// ============================================================================
// Reconciliation idempotence
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: whatever subset exists, one pass completes the store and a
    /// second pass applies nothing
    #[test]
    fn reconciliation_converges_in_one_pass(present in proptest::collection::btree_set(0usize..20, 0..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let schema = flat_schema(20);
            let t1 = tenant("t1");
            let store = Arc::new(FakeStore::with_relations(
                &schema,
                present.iter().map(|i| relation_name(*i)),
            ));
            let connector = Arc::new(FakeConnector::new());
            connector.register(&t1, store.clone());
            let engine = ReconciliationEngine::new(
                Arc::new(InMemoryTenantDirectory::with_tenants([t1.clone()])),
                Arc::new(ConnectionPoolManager::new(connector, PoolConfig::default())),
                Arc::new(schema),
                ReconcileConfig::default(),
            );

            let first = engine.reconcile(&t1).await;
            let expected = if present.len() == 20 {
                ReconciliationOutcome::AlreadyComplete
            } else {
                ReconciliationOutcome::Repaired
            };
            prop_assert_eq!(first.outcome, expected);
            prop_assert_eq!(first.applied_relations.len(), 20 - present.len());
            prop_assert_eq!(first.final_relation_count, 20);

            let second = engine.reconcile(&t1).await;
            prop_assert_eq!(second.outcome, ReconciliationOutcome::AlreadyComplete);
            prop_assert_eq!(second.applied_ddl_count(), 0);
            Ok(())
        })?;
    }
}
