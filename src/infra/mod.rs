//! Infrastructure layer for the tenancy core
//!
//! Contains trait definitions and implementations for:
//! - Tenant directory (PostgreSQL, in-memory, cached)
//! - Tenant stores (PostgreSQL, SQLite) and the connector choosing between them
//! - Per-tenant connection pool manager and its monitor
//! - Retry/backoff policy
//! - Graceful shutdown (request draining)

mod cache;
mod connector;
mod directory;
mod error;
mod graceful_shutdown;
mod pool_manager;
mod pool_monitor;
pub mod postgres;
pub mod retry;
pub mod sqlite;
mod traits;

pub use cache::{CacheStats, CacheStatsSnapshot, LruCache, TenantCache};
pub use connector::SqlxStoreConnector;
pub use directory::{CachedTenantDirectory, InMemoryTenantDirectory};
pub use error::*;
pub use graceful_shutdown::{
    serve_with_shutdown, shutdown_signal, track_requests, GracefulShutdownConfig, RequestGuard,
    RequestTracker, ShutdownCoordinator, ShutdownSignal,
};
pub use pool_manager::{
    ConnectionPoolManager, PoolConfig, PoolManagerStats, PoolSnapshot, PooledConnectionHandle,
};
pub use pool_monitor::{
    AcquisitionOutcome, PoolHealthStatus, PoolMonitor, PoolMonitorConfig, PoolMonitorStats,
};
pub use postgres::{PgTenantDirectory, PgTenantStore};
pub use retry::{BackoffKind, Retry, RetryConfig};
pub use sqlite::SqliteTenantStore;
pub use traits::*;
