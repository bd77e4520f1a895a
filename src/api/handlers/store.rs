//! Tenant-scoped store diagnostics

use axum::extract::{Extension, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::RelationsResponse;
use crate::resolution::TenantContext;
use crate::server::AppState;

/// GET /api/store/relations - relations in the caller's store.
///
/// Runs behind the resolution middleware, so the handle is already attached.
pub async fn list_relations(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
) -> Result<Json<RelationsResponse>, ApiError> {
    let present = context.handle.list_relations().await?;
    let schema = state.reconciler.schema();

    let missing_canonical = schema
        .relation_names()
        .into_iter()
        .filter(|name| !present.contains(name))
        .collect();

    Ok(Json(RelationsResponse {
        tenant_id: context.tenant_id().clone(),
        schema_version: schema.version(),
        relation_count: present.len(),
        canonical_count: schema.len(),
        relations: present.into_iter().collect(),
        missing_canonical,
    }))
}
