//! Tenant resolution middleware for Axum
//!
//! Checks the allow-list first, then resolves the claim and attaches a
//! [`TenantContext`] extension. The whole request, handler included, runs
//! under a single timeout.

use axum::{
    extract::{Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

use super::{ResolutionConfig, ResolutionState, TenantClaim, TenantResolver};
use crate::api::{claim_required, ApiError};
use crate::domain::TenantId;
use crate::infra::TenancyError;

/// Middleware state
#[derive(Clone)]
pub struct ResolutionLayerState {
    pub resolver: TenantResolver,
    pub config: Arc<ResolutionConfig>,
}

impl ResolutionLayerState {
    pub fn new(resolver: TenantResolver, config: ResolutionConfig) -> Self {
        Self {
            resolver,
            config: Arc::new(config),
        }
    }
}

/// Tenant resolution middleware
pub async fn resolve_tenant(
    State(state): State<ResolutionLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let budget = state.config.request_timeout;
    let path = request.uri().path().to_string();
    let span = info_span!(
        "tenant_resolution",
        path = %path,
        tenant_id = field::Empty,
        resolution = ResolutionState::Unresolved.as_str(),
    );

    let run = resolve_and_run(state, request, next).instrument(span.clone());
    match tokio::time::timeout(budget, run).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                parent: &span,
                path = %path,
                timeout_ms = budget.as_millis() as u64,
                "request timed out"
            );
            ApiError::from(TenancyError::Timeout {
                operation: "request",
                elapsed: budget,
            })
            .into_response()
        }
    }
}

async fn resolve_and_run(state: ResolutionLayerState, mut request: Request, next: Next) -> Response {
    let span = Span::current();

    if let Some(exemption) = state.config.exempt.exemption(request.uri().path()) {
        debug!(?exemption, "path exempt from tenant resolution");
        return next.run(request).await;
    }

    let Some(tenant_id) = tenant_claim(
        request.extensions(),
        request.headers(),
        &state.config.tenant_header,
    ) else {
        span.record("resolution", ResolutionState::Rejected.as_str());
        return claim_required("Missing tenant identity claim").into_response();
    };

    span.record("tenant_id", field::display(&tenant_id));
    span.record("resolution", ResolutionState::Resolving.as_str());

    match state.resolver.resolve(&tenant_id).await {
        Ok(context) => {
            span.record("resolution", ResolutionState::Attached.as_str());
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            span.record("resolution", ResolutionState::Rejected.as_str());
            if !matches!(e, TenancyError::TenantInactive { .. }) {
                info!(tenant_id = %tenant_id, reason = %e, "tenant rejected");
            }
            ApiError::from(e).into_response()
        }
    }
}

/// The tenant a request claims to act for.
///
/// The upstream claim extension wins over the trusted header.
pub fn tenant_claim(extensions: &Extensions, headers: &HeaderMap, header: &str) -> Option<TenantId> {
    if let Some(TenantClaim(id)) = extensions.get::<TenantClaim>() {
        return Some(id.clone());
    }
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(TenantId::new)
}
