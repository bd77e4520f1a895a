//! Error types for the tenancy core

use std::time::Duration;
use thiserror::Error;

use crate::domain::{SchemaError, TenantId, TenantStatus};

/// Errors that can occur while resolving tenants, managing pools,
/// reconciling schemas or running background writes
#[derive(Error, Debug)]
pub enum TenancyError {
    /// Tenant id is not in the directory
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    /// Tenant exists but is not active
    #[error("tenant {tenant_id} is {status}")]
    TenantInactive {
        tenant_id: TenantId,
        status: TenantStatus,
    },

    /// Tenant store could not be reached while creating its pool
    #[error("pool creation failed for tenant {tenant_id}: {reason}")]
    PoolCreationFailed { tenant_id: TenantId, reason: String },

    /// Tenant directory could not be queried
    #[error("tenant directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {}ms", elapsed.as_millis())]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// Canonical schema definition is invalid
    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    /// Write request does not fit the canonical schema
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// One tenant's reconciliation failed
    #[error("reconciliation failed for tenant {tenant_id}: {reason}")]
    ReconciliationPartialFailure { tenant_id: TenantId, reason: String },

    /// Background write retry budget exhausted
    #[error("background write for tenant {tenant_id} abandoned after {attempts} attempts: {last_error}")]
    BackgroundWriteAbandoned {
        tenant_id: TenantId,
        attempts: u32,
        last_error: String,
    },

    /// Background write queue is at capacity
    #[error("write queue is full")]
    QueueFull,

    /// Component is stopping
    #[error("shutting down")]
    ShuttingDown,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl TenancyError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TenancyError::PoolCreationFailed { .. }
            | TenancyError::DirectoryUnavailable(_)
            | TenancyError::Timeout { .. }
            | TenancyError::Internal(_) => true,
            TenancyError::Database(e) => !matches!(e, sqlx::Error::PoolClosed),
            _ => false,
        }
    }

    /// Whether the error says the store connection itself is unhealthy.
    pub fn is_connection_error(&self) -> bool {
        match self {
            TenancyError::Database(e) => crate::infra::retry::is_connection_db_error(e),
            TenancyError::PoolCreationFailed { .. } => true,
            _ => false,
        }
    }
}

/// Result type for tenancy operations
pub type Result<T> = std::result::Result<T, TenancyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TenancyError::DirectoryUnavailable("down".into()).is_transient());
        assert!(TenancyError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!TenancyError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(!TenancyError::TenantNotFound(TenantId::new("t1")).is_transient());
        assert!(!TenancyError::InvalidWrite("bad".into()).is_transient());
        assert!(!TenancyError::TenantInactive {
            tenant_id: TenantId::new("t1"),
            status: TenantStatus::Suspended
        }
        .is_transient());
    }

    #[test]
    fn test_display() {
        let err = TenancyError::TenantInactive {
            tenant_id: TenantId::new("t9"),
            status: TenantStatus::Suspended,
        };
        assert_eq!(err.to_string(), "tenant t9 is suspended");

        let err = TenancyError::Timeout {
            operation: "request",
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }
}
