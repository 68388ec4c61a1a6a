//! Per-system health tracking: rolling success rate and average
//! response time, read by priority-based fallback selection.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use zkc_core::ProofSystem;

/// A system is considered unhealthy below this success rate.
const HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Aggregate health of one proving backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub is_healthy: bool,
    /// Successes over total attempts, in [0, 1]. 1.0 with no history.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            success_rate: 1.0,
            avg_response_time_ms: 0.0,
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct HealthEntry {
    successes: u64,
    failures: u64,
    total_time_ms: u64,
    last_error: Option<String>,
}

/// Rolling per-system outcome statistics.
#[derive(Default)]
pub struct HealthTracker {
    table: DashMap<ProofSystem, HealthEntry>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, system: &ProofSystem, elapsed_ms: u64) {
        let mut entry = self.table.entry(system.clone()).or_default();
        entry.successes += 1;
        entry.total_time_ms += elapsed_ms;
    }

    pub fn record_failure(&self, system: &ProofSystem, error: impl Into<String>, elapsed_ms: u64) {
        let mut entry = self.table.entry(system.clone()).or_default();
        entry.failures += 1;
        entry.total_time_ms += elapsed_ms;
        entry.last_error = Some(error.into());
    }

    /// Health snapshot for one system. A system with no history is
    /// healthy with a perfect success rate.
    pub fn health(&self, system: &ProofSystem) -> ProviderHealth {
        match self.table.get(system) {
            None => ProviderHealth::default(),
            Some(entry) => {
                let total = entry.successes + entry.failures;
                let success_rate = if total == 0 {
                    1.0
                } else {
                    entry.successes as f64 / total as f64
                };
                ProviderHealth {
                    is_healthy: success_rate >= HEALTHY_SUCCESS_RATE,
                    success_rate,
                    avg_response_time_ms: if total == 0 {
                        0.0
                    } else {
                        entry.total_time_ms as f64 / total as f64
                    },
                    last_error: entry.last_error.clone(),
                }
            }
        }
    }

    /// Total failures recorded for one system.
    pub fn failure_count(&self, system: &ProofSystem) -> u64 {
        self.table.get(system).map(|e| e.failures).unwrap_or(0)
    }
}
