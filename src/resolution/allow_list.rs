//! Paths exempt from tenant resolution
//!
//! Matching is exact: `/health` is exempt, `/health/` and `/healthz` are not.
//! Anything not listed here goes through resolution, so a typo fails closed.

use std::collections::BTreeMap;

/// Why a path skips resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exemption {
    /// Global endpoint that never touches a tenant store
    SharedResource,
    /// Tenant-scoped, but the tenant is resolved later by a background worker
    DeferredResolution,
}

/// Declared allow-list of exempt request paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptRoutes {
    entries: BTreeMap<String, Exemption>,
}

impl ExemptRoutes {
    /// Empty list: every path is resolved
    pub fn new() -> Self {
        Self::default()
    }

    /// The service's own shared and deferred endpoints
    pub fn builtin() -> Self {
        Self::new()
            .shared("/health")
            .shared("/ready")
            .shared("/metrics")
            .shared("/admin/reconcile")
            .deferred("/api/writes")
    }

    /// Built-ins plus `TENANCY_EXTRA_EXEMPT_PATHS` (comma separated, shared).
    pub fn from_env() -> Self {
        let mut routes = Self::builtin();
        if let Ok(extra) = std::env::var("TENANCY_EXTRA_EXEMPT_PATHS") {
            for path in extra.split(',').map(str::trim).filter(|p| p.starts_with('/')) {
                routes = routes.shared(path);
            }
        }
        routes
    }

    pub fn with(mut self, path: impl Into<String>, exemption: Exemption) -> Self {
        self.entries.insert(path.into(), exemption);
        self
    }

    pub fn shared(self, path: impl Into<String>) -> Self {
        self.with(path, Exemption::SharedResource)
    }

    pub fn deferred(self, path: impl Into<String>) -> Self {
        self.with(path, Exemption::DeferredResolution)
    }

    pub fn exemption(&self, path: &str) -> Option<Exemption> {
        self.entries.get(path).copied()
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = (&str, Exemption)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), *e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_paths() {
        let routes = ExemptRoutes::builtin();
        assert_eq!(routes.exemption("/health"), Some(Exemption::SharedResource));
        assert_eq!(
            routes.exemption("/api/writes"),
            Some(Exemption::DeferredResolution)
        );
        assert_eq!(routes.exemption("/api/store/relations"), None);
    }

    #[test]
    fn test_matching_is_exact() {
        let routes = ExemptRoutes::builtin();
        assert!(!routes.is_exempt("/health/"));
        assert!(!routes.is_exempt("/healthz"));
        assert!(!routes.is_exempt("/health/../api/store/relations"));
        assert!(!routes.is_exempt("/HEALTH"));
    }

    #[test]
    fn test_custom_entries() {
        let routes = ExemptRoutes::new().shared("/catalog/currencies");
        assert!(routes.is_exempt("/catalog/currencies"));
        assert!(!routes.is_exempt("/health"));
        assert_eq!(routes.paths().count(), 1);
    }
}
