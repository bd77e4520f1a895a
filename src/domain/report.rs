//! Per-tenant reconciliation outcome records

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconciliationOutcome {
    /// Nothing was missing; no DDL applied
    AlreadyComplete,
    /// Gaps were found and every canonical relation now exists
    Repaired,
    /// The store could not be reached or relations are still missing
    Failed,
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationOutcome::AlreadyComplete => write!(f, "already-complete"),
            ReconciliationOutcome::Repaired => write!(f, "repaired"),
            ReconciliationOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Ephemeral record of one reconcile run for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub tenant_id: TenantId,
    pub schema_version: u32,
    /// Canonical relations absent when the run started
    pub missing_relations: BTreeSet<String>,
    /// Relations created by this run, in apply order
    pub applied_relations: Vec<String>,
    /// Canonical indexes absent when the run started
    pub missing_indexes: BTreeSet<String>,
    pub applied_indexes: Vec<String>,
    /// Canonical relations still absent after the run
    pub still_missing: BTreeSet<String>,
    /// Base relations in the store after the run
    pub final_relation_count: usize,
    pub outcome: ReconciliationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ReconciliationReport {
    pub fn new(tenant_id: TenantId, schema_version: u32) -> Self {
        Self {
            tenant_id,
            schema_version,
            missing_relations: BTreeSet::new(),
            applied_relations: Vec::new(),
            missing_indexes: BTreeSet::new(),
            applied_indexes: Vec::new(),
            still_missing: BTreeSet::new(),
            final_relation_count: 0,
            outcome: ReconciliationOutcome::Failed,
            error: None,
            duration_ms: 0,
        }
    }

    /// Total DDL statements this run executed successfully.
    pub fn applied_ddl_count(&self) -> usize {
        self.applied_relations.len() + self.applied_indexes.len()
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == ReconciliationOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_format() {
        assert_eq!(
            serde_json::to_value(ReconciliationOutcome::AlreadyComplete).unwrap(),
            "already-complete"
        );
        assert_eq!(ReconciliationOutcome::Repaired.to_string(), "repaired");
    }

    #[test]
    fn test_new_report_defaults_to_failed() {
        let report = ReconciliationReport::new(TenantId::new("t1"), 3);
        assert!(report.is_failed());
        assert_eq!(report.applied_ddl_count(), 0);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("error").is_none());
    }
}
