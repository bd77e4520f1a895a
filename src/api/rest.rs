//! REST routes for the tenancy core.

use axum::routing::{get, post};
use axum::Router;

use crate::api::handlers::{
    health_check, list_relations, metrics, readiness_check, run_reconcile, submit_write,
};
use crate::server::AppState;

/// Tenant-scoped routes under `/api`.
///
/// `/api/writes` is on the exempt list as a deferred path; everything else here
/// runs with an attached [`crate::resolution::TenantContext`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/store/relations", get(list_relations))
        .route("/writes", post(submit_write))
}

/// Shared endpoints that never touch a tenant store.
pub fn shared_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/admin/reconcile", post(run_reconcile))
}
