//! Tenant pool health monitoring
//!
//! Tracks, across every tenant pool owned by the pool manager:
//! - Acquisition latency and slow acquisitions
//! - Cache hits versus pool creations
//! - Creation failures, invalidations and LRU evictions
//! - Per-pool saturation derived from live usage

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::PoolUsage;

/// Pool health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealthStatus {
    /// Pool is healthy with plenty of capacity
    #[default]
    Healthy,
    /// Pool is under moderate load but functioning
    Moderate,
    /// Pool is under heavy load, may experience delays
    Stressed,
    /// Every connection is in use
    Critical,
}

impl std::fmt::Display for PoolHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolHealthStatus::Healthy => write!(f, "healthy"),
            PoolHealthStatus::Moderate => write!(f, "moderate"),
            PoolHealthStatus::Stressed => write!(f, "stressed"),
            PoolHealthStatus::Critical => write!(f, "critical"),
        }
    }
}

impl PoolHealthStatus {
    pub fn is_stressed(&self) -> bool {
        matches!(self, PoolHealthStatus::Stressed | PoolHealthStatus::Critical)
    }
}

/// Configuration for pool health monitoring
#[derive(Debug, Clone)]
pub struct PoolMonitorConfig {
    /// Threshold for moderate status (fraction of pool in use)
    pub moderate_threshold: f64,
    /// Threshold for stressed status (fraction of pool in use)
    pub stressed_threshold: f64,
    /// Threshold for critical status (fraction of pool in use)
    pub critical_threshold: f64,
    /// Latency above which an acquisition counts as slow (ms)
    pub slow_acquisition_ms: u64,
}

impl Default for PoolMonitorConfig {
    fn default() -> Self {
        Self {
            moderate_threshold: 0.5,
            stressed_threshold: 0.8,
            critical_threshold: 0.95,
            slow_acquisition_ms: 100,
        }
    }
}

/// Manager-wide counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMonitorStats {
    pub total_acquisitions: u64,
    pub cache_hits: u64,
    pub pools_created: u64,
    pub creation_failures: u64,
    pub rejected_inactive: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub slow_acquisitions: u64,
    pub avg_acquisition_latency_ms: f64,
    pub max_acquisition_latency_ms: u64,
}

/// How an acquisition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// Served from an existing handle
    CacheHit,
    /// A new pool was created (or joined while being created)
    Created,
    /// Pool creation failed
    Failed,
    /// Tenant was not active
    Rejected,
}

#[derive(Default)]
struct MetricsCollector {
    total_acquisitions: AtomicU64,
    cache_hits: AtomicU64,
    pools_created: AtomicU64,
    creation_failures: AtomicU64,
    rejected_inactive: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    slow_acquisitions: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

/// Connection pool health monitor
#[derive(Default)]
pub struct PoolMonitor {
    config: PoolMonitorConfig,
    metrics: MetricsCollector,
}

impl PoolMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PoolMonitorConfig) -> Self {
        Self {
            config,
            metrics: MetricsCollector::default(),
        }
    }

    /// Record one `acquire` call
    pub fn record_acquisition(&self, latency: Duration, outcome: AcquisitionOutcome) {
        let latency_us = latency.as_micros() as u64;

        self.metrics.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.metrics
            .max_latency_us
            .fetch_max(latency_us, Ordering::Relaxed);

        if latency.as_millis() as u64 > self.config.slow_acquisition_ms {
            self.metrics.slow_acquisitions.fetch_add(1, Ordering::Relaxed);
        }

        // Creations and failures are counted once per connector call instead
        match outcome {
            AcquisitionOutcome::CacheHit => {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            AcquisitionOutcome::Rejected => {
                self.metrics.rejected_inactive.fetch_add(1, Ordering::Relaxed);
            }
            AcquisitionOutcome::Created | AcquisitionOutcome::Failed => {}
        }
    }

    /// Record the outcome of one connector call
    pub fn record_creation(&self, success: bool) {
        if success {
            self.metrics.pools_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invalidation(&self) {
        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Classify a pool's live usage
    pub fn assess(&self, usage: PoolUsage) -> PoolHealthStatus {
        if usage.max_connections == 0 {
            return PoolHealthStatus::Healthy;
        }
        let utilization = usage.active() as f64 / usage.max_connections as f64;
        if utilization >= self.config.critical_threshold {
            PoolHealthStatus::Critical
        } else if utilization >= self.config.stressed_threshold {
            PoolHealthStatus::Stressed
        } else if utilization >= self.config.moderate_threshold {
            PoolHealthStatus::Moderate
        } else {
            PoolHealthStatus::Healthy
        }
    }

    pub fn stats(&self) -> PoolMonitorStats {
        let m = &self.metrics;
        let total_acquisitions = m.total_acquisitions.load(Ordering::Relaxed);
        let total_latency_us = m.total_latency_us.load(Ordering::Relaxed);
        let avg_latency_ms = if total_acquisitions > 0 {
            (total_latency_us as f64 / total_acquisitions as f64) / 1000.0
        } else {
            0.0
        };

        PoolMonitorStats {
            total_acquisitions,
            cache_hits: m.cache_hits.load(Ordering::Relaxed),
            pools_created: m.pools_created.load(Ordering::Relaxed),
            creation_failures: m.creation_failures.load(Ordering::Relaxed),
            rejected_inactive: m.rejected_inactive.load(Ordering::Relaxed),
            invalidations: m.invalidations.load(Ordering::Relaxed),
            evictions: m.evictions.load(Ordering::Relaxed),
            slow_acquisitions: m.slow_acquisitions.load(Ordering::Relaxed),
            avg_acquisition_latency_ms: avg_latency_ms,
            max_acquisition_latency_ms: m.max_latency_us.load(Ordering::Relaxed) / 1000,
        }
    }

    /// Reset counters (typically called periodically)
    pub fn reset_metrics(&self) {
        let m = &self.metrics;
        for counter in [
            &m.total_acquisitions,
            &m.cache_hits,
            &m.pools_created,
            &m.creation_failures,
            &m.rejected_inactive,
            &m.invalidations,
            &m.evictions,
            &m.slow_acquisitions,
            &m.total_latency_us,
            &m.max_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(size: u32, idle: u32, max: u32) -> PoolUsage {
        PoolUsage {
            size,
            idle,
            max_connections: max,
        }
    }

    #[test]
    fn test_pool_health_status_display() {
        assert_eq!(PoolHealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(PoolHealthStatus::Critical.to_string(), "critical");
    }

    #[test]
    fn test_assess_thresholds() {
        let monitor = PoolMonitor::new();
        assert_eq!(monitor.assess(usage(1, 1, 10)), PoolHealthStatus::Healthy);
        assert_eq!(monitor.assess(usage(6, 0, 10)), PoolHealthStatus::Moderate);
        assert_eq!(monitor.assess(usage(9, 1, 10)), PoolHealthStatus::Stressed);
        assert_eq!(monitor.assess(usage(10, 0, 10)), PoolHealthStatus::Critical);
        assert_eq!(monitor.assess(usage(0, 0, 0)), PoolHealthStatus::Healthy);
        assert!(PoolHealthStatus::Critical.is_stressed());
    }

    #[test]
    fn test_acquisition_recording() {
        let monitor = PoolMonitor::new();

        monitor.record_acquisition(Duration::from_millis(50), AcquisitionOutcome::CacheHit);
        monitor.record_acquisition(Duration::from_millis(150), AcquisitionOutcome::Created);
        monitor.record_acquisition(Duration::from_millis(1), AcquisitionOutcome::Rejected);
        monitor.record_creation(true);
        monitor.record_creation(false);

        let stats = monitor.stats();
        assert_eq!(stats.total_acquisitions, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.rejected_inactive, 1);
        assert_eq!(stats.slow_acquisitions, 1);
        assert_eq!(stats.pools_created, 1);
        assert_eq!(stats.creation_failures, 1);
        assert_eq!(stats.max_acquisition_latency_ms, 150);
    }

    #[test]
    fn test_metrics_reset() {
        let monitor = PoolMonitor::new();
        monitor.record_acquisition(Duration::from_millis(50), AcquisitionOutcome::CacheHit);
        monitor.record_eviction();

        monitor.reset_metrics();
        assert_eq!(monitor.stats(), PoolMonitorStats::default());
    }
}
