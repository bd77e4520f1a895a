//! Fast-ack write front door

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::Json;

use crate::api::error::{claim_required, invalid_body, ApiError};
use crate::api::types::WriteBody;
use crate::domain::{Accepted, WriteRequest};
use crate::infra::TenancyError;
use crate::resolution::tenant_claim;
use crate::server::AppState;

/// POST /api/writes - queue a write and acknowledge it with 202.
///
/// The path is exempt from synchronous resolution: the worker resolves the
/// tenant, with the same checks, when it performs the write. The body is
/// checked against the canonical schema here so malformed writes fail fast.
pub async fn submit_write(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Result<Json<WriteBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let tenant_id = tenant_claim(&extensions, &headers, &state.resolution.tenant_header)
        .ok_or_else(|| claim_required("Missing tenant identity claim"))?;

    let Json(body) = body.map_err(|e| invalid_body(e.body_text()))?;
    let operation = body.into_operation();
    operation
        .prepare(state.reconciler.schema())
        .map_err(TenancyError::InvalidWrite)?;

    let accepted = state.pipeline.submit(WriteRequest {
        tenant_id,
        operation,
    })?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
