//! Back-office tenancy core
//!
//! Resolves every request to its tenant's isolated store, keeps one pooled
//! handle per tenant, repairs tenant schemas against the canonical shape and
//! performs fast-ack writes in the background.
//!
//! ## Modules
//!
//! - [`domain`] - Tenants, canonical schema, reconciliation reports, writes
//! - [`infra`] - Directory, pool manager, store backends (PostgreSQL, SQLite)
//! - [`resolution`] - Tenant resolution middleware and allow-list
//! - [`reconcile`] - Schema reconciliation engine
//! - [`pipeline`] - Fast-ack write-retry pipeline
//! - [`scheduler`] - Background maintenance scheduler
//! - [`api`] - REST API routes and error responses

pub mod api;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod pipeline;
pub mod reconcile;
pub mod resolution;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use domain::{
    Accepted, CanonicalSchema, ReconciliationOutcome, ReconciliationReport, Tenant, TenantId,
    TenantStatus, WriteOperation, WriteRequest,
};

pub use infra::{ConnectionPoolManager, PooledConnectionHandle, Result, TenancyError, TenantDirectory};
