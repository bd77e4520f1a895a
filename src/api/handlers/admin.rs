//! Operator endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::TriggerResponse;
use crate::scheduler::{ReconcileSweep, TriggerOutcome};
use crate::server::AppState;

/// POST /admin/reconcile - start a reconcile sweep over every active tenant.
///
/// Shares the scheduler's running flag with the periodic sweep, so at most
/// one sweep runs at a time. The sweep runs in the background; per-tenant
/// reports go out on the reconciliation report stream.
pub async fn run_reconcile(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    match state.scheduler.trigger(ReconcileSweep::NAME) {
        TriggerOutcome::Started => {
            info!("reconcile sweep started by operator");
            Ok((
                StatusCode::ACCEPTED,
                Json(TriggerResponse {
                    task: ReconcileSweep::NAME.to_string(),
                    status: "started",
                }),
            ))
        }
        TriggerOutcome::AlreadyRunning => Err(ApiError::new(
            ErrorCode::TaskAlreadyRunning,
            "a reconcile sweep is already running",
        )
        .with_resource_id(ReconcileSweep::NAME)),
        TriggerOutcome::UnknownTask => Err(ApiError::new(
            ErrorCode::InternalError,
            "reconcile sweep is not scheduled",
        )),
    }
}
