//! Host resource sampling and the concurrency recommendation.
//!
//! The manager samples logical cores, memory, and instantaneous load,
//! then computes a recommended concurrency clamped to
//! `[min_concurrency, max_concurrent_proofs]`. A manual override is
//! always clamped to the same bounds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Environment flag that halves the core-based recommendation, for
/// shared hosts where the prover must leave headroom.
const LOW_RESOURCE_ENV: &str = "ZKC_LOW_RESOURCE";

/// Bounds and sizing knobs for the concurrency recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub min_concurrency: usize,
    pub max_concurrent_proofs: usize,
    /// Working-set estimate per in-flight proof, used to cap
    /// concurrency by available memory.
    pub memory_per_proof_bytes: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 1,
            max_concurrent_proofs: 16,
            memory_per_proof_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One sample of host resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub logical_cores: usize,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// 1-minute load average divided by core count, clamped to [0, 1].
    pub cpu_usage: f64,
    /// Fraction of total memory in use, in [0, 1].
    pub memory_usage: f64,
    /// Whether the low-resource environment flag is set.
    pub low_resource_mode: bool,
}

impl ResourceSnapshot {
    /// Sample the host. Memory and load come from procfs on Linux;
    /// elsewhere conservative defaults are assumed.
    pub fn sample() -> Self {
        let logical_cores = num_cpus::get();
        let (total, available) = read_meminfo().unwrap_or((8 << 30, 4 << 30));
        let load = read_loadavg().unwrap_or(0.0);
        let low_resource_mode = std::env::var(LOW_RESOURCE_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            logical_cores,
            total_memory_bytes: total,
            available_memory_bytes: available,
            cpu_usage: (load / logical_cores.max(1) as f64).clamp(0.0, 1.0),
            memory_usage: if total > 0 {
                1.0 - available as f64 / total as f64
            } else {
                0.0
            },
            low_resource_mode,
        }
    }
}

fn read_meminfo() -> Option<(u64, u64)> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next()? {
            "MemTotal:" => total = parts.next()?.parse::<u64>().ok().map(|kb| kb * 1024),
            "MemAvailable:" => available = parts.next()?.parse::<u64>().ok().map(|kb| kb * 1024),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some((total?, available?))
}

fn read_loadavg() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Computes and maintains the recommended proof concurrency.
pub struct ConcurrencyManager {
    config: ConcurrencyConfig,
    snapshot: Arc<RwLock<ResourceSnapshot>>,
    override_value: RwLock<Option<usize>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ConcurrencyManager {
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            config,
            snapshot: Arc::new(RwLock::new(ResourceSnapshot::sample())),
            override_value: RwLock::new(None),
            monitor: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        self.snapshot.read().clone()
    }

    fn clamp(&self, value: usize) -> usize {
        value.clamp(
            self.config.min_concurrency,
            self.config.max_concurrent_proofs,
        )
    }

    /// Recommended concurrency from the latest snapshot, or the manual
    /// override if one is set. Always clamped to the configured bounds.
    pub fn recommended(&self) -> usize {
        if let Some(value) = *self.override_value.read() {
            return self.clamp(value);
        }
        let snapshot = self.snapshot.read();
        let mut by_cores = snapshot.logical_cores;
        if snapshot.low_resource_mode || snapshot.cpu_usage > 0.85 {
            by_cores = (by_cores / 2).max(1);
        }
        let by_memory = if self.config.memory_per_proof_bytes > 0 {
            (snapshot.available_memory_bytes / self.config.memory_per_proof_bytes).max(1) as usize
        } else {
            usize::MAX
        };
        self.clamp(by_cores.min(by_memory))
    }

    /// Pin the recommendation. Clamped to the configured bounds.
    pub fn set_override(&self, value: usize) {
        *self.override_value.write() = Some(value);
    }

    pub fn clear_override(&self) {
        *self.override_value.write() = None;
    }

    /// Re-sample periodically until [`ConcurrencyManager::stop_monitoring`].
    /// A second call replaces the previous monitor.
    pub fn start_monitoring(&self, interval: Duration) {
        let snapshot = Arc::clone(&self.snapshot);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                *snapshot.write() = ResourceSnapshot::sample();
            }
        });
        if let Some(previous) = self.monitor.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ConcurrencyManager {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}
