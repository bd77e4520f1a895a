//! Shared request and response types for REST API handlers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{TenantId, WriteOperation};
use crate::infra::{CacheStatsSnapshot, PoolManagerStats};
use crate::pipeline::PipelineStats;
use crate::scheduler::TaskStats;

// ============================================================================
// Write types
// ============================================================================

/// Request body for the fast-ack write endpoint.
#[derive(Debug, Deserialize)]
pub struct WriteBody {
    pub relation: String,
    /// Column name to JSON value
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl WriteBody {
    pub fn into_operation(self) -> WriteOperation {
        WriteOperation::from_json(self.relation, self.values)
    }
}

// ============================================================================
// Store diagnostics
// ============================================================================

/// Relations present in the caller's store compared with the canonical set.
#[derive(Debug, Serialize)]
pub struct RelationsResponse {
    pub tenant_id: TenantId,
    pub schema_version: u32,
    pub relation_count: usize,
    pub canonical_count: usize,
    pub relations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_canonical: Vec<String>,
}

// ============================================================================
// Admin
// ============================================================================

/// A maintenance run was started; its outcome arrives on the report stream
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub task: String,
    pub status: &'static str,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub pools: PoolManagerStats,
    pub directory_cache: CacheStatsSnapshot,
    pub pipeline: PipelineStats,
    pub scheduler: BTreeMap<String, TaskStats>,
}
