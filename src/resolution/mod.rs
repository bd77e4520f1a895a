//! Tenant resolution
//!
//! Turns a tenant identity claim into a [`TenantContext`]: the directory record
//! plus the tenant's pooled store handle. The HTTP middleware and the
//! background write workers share the same [`TenantResolver`], so both apply
//! identical not-found and inactive checks.

mod allow_list;
mod middleware;

pub use allow_list::{ExemptRoutes, Exemption};
pub use middleware::{resolve_tenant, tenant_claim, ResolutionLayerState};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::{Tenant, TenantId};
use crate::infra::{
    ConnectionPoolManager, PooledConnectionHandle, Result, TenancyError, TenantDirectory,
};

/// Identity claim placed on the request by the upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantClaim(pub TenantId);

/// Per-request tenant context attached by the middleware
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub handle: Arc<PooledConnectionHandle>,
}

impl TenantContext {
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }
}

/// Per-request resolution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolving,
    Attached,
    Rejected,
}

impl ResolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Unresolved => "unresolved",
            ResolutionState::Resolving => "resolving",
            ResolutionState::Attached => "attached",
            ResolutionState::Rejected => "rejected",
        }
    }
}

/// Directory lookup followed by pool acquisition
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    pools: Arc<ConnectionPoolManager>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, pools: Arc<ConnectionPoolManager>) -> Self {
        Self { directory, pools }
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// Resolve a tenant id to an attached context.
    ///
    /// Unknown and inactive tenants are rejected before the pool manager is
    /// consulted.
    pub async fn resolve(&self, tenant_id: &TenantId) -> Result<TenantContext> {
        let tenant = self
            .directory
            .lookup(tenant_id)
            .await
            .map_err(|e| match e {
                TenancyError::DirectoryUnavailable(_) => e,
                other => TenancyError::DirectoryUnavailable(other.to_string()),
            })?
            .ok_or_else(|| TenancyError::TenantNotFound(tenant_id.clone()))?;

        if !tenant.is_active() {
            info!(
                tenant_id = %tenant.id,
                reason = tenant.status.as_str(),
                "tenant rejected"
            );
            return Err(TenancyError::TenantInactive {
                tenant_id: tenant.id,
                status: tenant.status,
            });
        }

        let handle = self.pools.acquire(&tenant).await?;
        Ok(TenantContext { tenant, handle })
    }
}

/// Middleware configuration
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Trusted header carrying the tenant id when no [`TenantClaim`] is present
    pub tenant_header: String,
    /// Blanket budget for resolution plus the downstream handler
    pub request_timeout: Duration,
    pub exempt: ExemptRoutes,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            tenant_header: "x-tenant-id".to_string(),
            request_timeout: Duration::from_secs(10),
            exempt: ExemptRoutes::builtin(),
        }
    }
}

impl ResolutionConfig {
    /// Reads `TENANT_HEADER`, `REQUEST_TIMEOUT_MS` and `TENANCY_EXTRA_EXEMPT_PATHS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tenant_header: std::env::var("TENANT_HEADER")
                .ok()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .unwrap_or(defaults.tenant_header),
            request_timeout: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            exempt: ExemptRoutes::from_env(),
        }
    }
}
