//! Structured API error responses with error codes
//!
//! Every failure leaving the HTTP boundary carries a stable machine-readable
//! code, a numeric code and a human-readable message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infra::TenancyError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity errors (1xxx)
    /// No tenant identity claim on the request
    TenantClaimRequired,

    // Validation errors (3xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Write does not fit the canonical schema
    InvalidWrite,

    // Tenant errors (4xxx)
    /// Tenant id is not in the directory
    TenantNotFound,
    /// Tenant is suspended or deleted
    TenantInactive,

    // Conflict errors (5xxx)
    /// Maintenance task is already running
    TaskAlreadyRunning,

    // Infrastructure errors (8xxx)
    /// Database operation failed
    DatabaseError,
    /// Tenant store could not be reached
    StoreUnavailable,
    /// Tenant directory could not be reached
    DirectoryUnavailable,
    /// Background write queue is full
    QueueFull,
    /// Operation timed out
    Timeout,
    /// Service is shutting down
    ShuttingDown,
    /// Schema reconciliation failed for a tenant
    ReconciliationFailed,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::TenantClaimRequired => 1001,

            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::InvalidWrite => 3002,

            ErrorCode::TenantNotFound => 4001,
            ErrorCode::TenantInactive => 4002,

            ErrorCode::TaskAlreadyRunning => 5001,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::StoreUnavailable => 8002,
            ErrorCode::DirectoryUnavailable => 8003,
            ErrorCode::QueueFull => 8004,
            ErrorCode::Timeout => 8005,
            ErrorCode::ShuttingDown => 8006,
            ErrorCode::ReconciliationFailed => 8007,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::TenantClaimRequired => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidWrite => StatusCode::BAD_REQUEST,

            ErrorCode::TenantNotFound => StatusCode::NOT_FOUND,
            ErrorCode::TenantInactive => StatusCode::FORBIDDEN,

            ErrorCode::TaskAlreadyRunning => StatusCode::CONFLICT,

            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DirectoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ReconciliationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::TenantClaimRequired => "TENANT_CLAIM_REQUIRED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::InvalidWrite => "INVALID_WRITE",
            ErrorCode::TenantNotFound => "TENANT_NOT_FOUND",
            ErrorCode::TenantInactive => "TENANT_INACTIVE",
            ErrorCode::TaskAlreadyRunning => "TASK_ALREADY_RUNNING",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::DirectoryUnavailable => "DIRECTORY_UNAVAILABLE",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::ReconciliationFailed => "RECONCILIATION_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds a client should wait before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                retry_after: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        // Add error code header for easier debugging
        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from TenancyError
// ============================================================================

impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::TenantNotFound(id) => {
                ApiError::new(ErrorCode::TenantNotFound, format!("Tenant not found: {}", id))
                    .with_resource_id(id.to_string())
            }
            TenancyError::TenantInactive { tenant_id, status } => ApiError::new(
                ErrorCode::TenantInactive,
                format!("Tenant {} is {}", tenant_id, status),
            )
            .with_resource_id(tenant_id.to_string())
            .with_details(serde_json::json!({ "status": status })),
            TenancyError::PoolCreationFailed { tenant_id, .. } => ApiError::new(
                ErrorCode::StoreUnavailable,
                format!("Store for tenant {} is unavailable", tenant_id),
            )
            .with_resource_id(tenant_id.to_string())
            .with_retry_after(5),
            TenancyError::DirectoryUnavailable(_) => {
                ApiError::new(ErrorCode::DirectoryUnavailable, "Tenant directory unavailable")
                    .with_retry_after(5)
            }
            TenancyError::Database(e) => {
                ApiError::new(ErrorCode::DatabaseError, format!("Database error: {}", e))
            }
            TenancyError::Timeout { operation, elapsed } => ApiError::new(
                ErrorCode::Timeout,
                format!("{} timed out after {}ms", operation, elapsed.as_millis()),
            ),
            TenancyError::InvalidWrite(msg) => ApiError::new(ErrorCode::InvalidWrite, msg),
            TenancyError::InvalidSchema(e) => {
                ApiError::new(ErrorCode::InternalError, format!("Invalid schema: {}", e))
            }
            TenancyError::ReconciliationPartialFailure { tenant_id, reason } => {
                ApiError::new(ErrorCode::ReconciliationFailed, reason)
                    .with_resource_id(tenant_id.to_string())
            }
            TenancyError::BackgroundWriteAbandoned { tenant_id, .. } => ApiError::new(
                ErrorCode::InternalError,
                "Background write abandoned",
            )
            .with_resource_id(tenant_id.to_string()),
            TenancyError::QueueFull => {
                ApiError::new(ErrorCode::QueueFull, "Write queue is full").with_retry_after(1)
            }
            TenancyError::ShuttingDown => {
                ApiError::new(ErrorCode::ShuttingDown, "Service is shutting down")
            }
            TenancyError::Configuration(msg) => {
                ApiError::new(ErrorCode::InternalError, format!("Configuration error: {}", msg))
            }
            TenancyError::Internal(msg) => ApiError::new(ErrorCode::InternalError, msg),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Missing or malformed tenant identity claim
pub fn claim_required(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::TenantClaimRequired, message.into())
}

pub fn invalid_body(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidRequestBody, message.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TenantId, TenantStatus};
    use std::time::Duration;

    #[test]
    fn test_tenancy_errors_map_to_statuses() {
        let cases = [
            (
                TenancyError::TenantNotFound(TenantId::new("t1")),
                StatusCode::NOT_FOUND,
            ),
            (
                TenancyError::TenantInactive {
                    tenant_id: TenantId::new("t1"),
                    status: TenantStatus::Suspended,
                },
                StatusCode::FORBIDDEN,
            ),
            (
                TenancyError::PoolCreationFailed {
                    tenant_id: TenantId::new("t1"),
                    reason: "refused".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TenancyError::DirectoryUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (TenancyError::QueueFull, StatusCode::SERVICE_UNAVAILABLE),
            (
                TenancyError::Timeout {
                    operation: "request",
                    elapsed: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                TenancyError::InvalidWrite("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_store_reason_is_not_leaked() {
        let err = ApiError::from(TenancyError::PoolCreationFailed {
            tenant_id: TenantId::new("t1"),
            reason: "password authentication failed for user admin".into(),
        });
        assert!(!err.error.message.contains("password"));
    }

    #[test]
    fn test_error_code_header() {
        let response = claim_required("missing").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-error-code").unwrap(),
            "TENANT_CLAIM_REQUIRED"
        );
    }

    #[test]
    fn test_serialization_shape() {
        let err = ApiError::new(ErrorCode::QueueFull, "full").with_retry_after(1);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], "QUEUE_FULL");
        assert_eq!(json["error"]["numeric_code"], 8004);
        assert!(json["error"].get("resource_id").is_none());
    }
}
