//! Health, readiness and metrics handlers
//!
//! All three are shared resources on the exempt list; none touches a tenant
//! store.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tokio::time::Instant;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::MetricsResponse;
use crate::infra::TenantDirectory;
use crate::server::AppState;

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness probe. Performs no checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "backoffice-tenancy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe: the tenant directory backend must answer, bypassing
/// the lookup cache.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = Instant::now();
    match state.directory.ping().await {
        Ok(_) => Ok(Json(serde_json::json!({
            "status": "ready",
            "directory": {
                "connected": true,
                "response_time_ms": start.elapsed().as_millis() as u64,
            },
            "pools": {
                "cached": state.pools.cached_tenants().len(),
                "max": state.pools.config().max_pools,
            },
            "accepting_writes": !state.pipeline.is_closed(),
        }))),
        Err(e) => Err(ApiError::new(
            ErrorCode::DirectoryUnavailable,
            format!("Tenant directory unavailable: {e}"),
        )
        .with_retry_after(5)),
    }
}

/// JSON counters for pools, directory cache, write pipeline and scheduler.
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        pools: state.pools.stats(),
        directory_cache: state.directory.cache_stats(),
        pipeline: state.pipeline.stats(),
        scheduler: state.scheduler.stats(),
    })
}
