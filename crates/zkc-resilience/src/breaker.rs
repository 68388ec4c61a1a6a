//! # Per-System Circuit Breaker
//!
//! One breaker per proof system, all held in a single table:
//!
//! ```text
//! Closed --(failure_count >= failure_threshold)--> Open
//! Open   --(reset_timeout elapsed, next is_allowed)--> HalfOpen
//! HalfOpen --(successes >= half_open_success_threshold)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```
//!
//! While `Closed`, each success decrements `failure_count` by one with
//! a floor of zero — gradual recovery rather than instant reset. While
//! `HalfOpen`, `is_allowed` admits exactly the probing attempts needed
//! to reach the success threshold.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use zkc_core::{Event, EventBus, ProofSystem};

/// Breaker thresholds and timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive-failure budget before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker blocks before probing again.
    pub reset_timeout_ms: u64,
    /// Successful probes required to close from half-open.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Breaker position for one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_wallclock: Option<DateTime<Utc>>,
    half_open_successes: u32,
    /// Probes admitted since entering half-open.
    half_open_probes: u32,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_failure_wallclock: None,
            half_open_successes: 0,
            half_open_probes: 0,
        }
    }
}

/// Externally visible breaker state for one system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub half_open_success_count: u32,
}

/// The breaker table. Mutated only by the resilience layer after each
/// attempt; read by fallback-strategy selection.
pub struct CircuitBreaker {
    config: BreakerConfig,
    table: DashMap<ProofSystem, BreakerEntry>,
    bus: EventBus,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, bus: EventBus) -> Self {
        Self {
            config,
            table: DashMap::new(),
            bus,
        }
    }

    /// Whether a call to `system` may proceed. `false` only while open;
    /// an open breaker whose reset timeout has elapsed transitions to
    /// half-open here and admits the probe.
    pub fn is_allowed(&self, system: &ProofSystem) -> bool {
        let mut entry = self.table.entry(system.clone()).or_default();
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed_enough = entry
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout())
                    .unwrap_or(true);
                if elapsed_enough {
                    entry.state = BreakerState::HalfOpen;
                    entry.half_open_successes = 0;
                    entry.half_open_probes = 1;
                    drop(entry);
                    tracing::info!(system = %system, "circuit breaker half-open");
                    self.bus.emit(&Event::CircuitHalfOpen {
                        system: system.clone(),
                    });
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if entry.half_open_probes < self.config.half_open_success_threshold {
                    entry.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, system: &ProofSystem) {
        let mut entry = self.table.entry(system.clone()).or_default();
        match entry.state {
            BreakerState::Closed => {
                entry.failure_count = entry.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                entry.half_open_successes += 1;
                if entry.half_open_successes >= self.config.half_open_success_threshold {
                    *entry = BreakerEntry::default();
                    drop(entry);
                    tracing::info!(system = %system, "circuit breaker closed");
                    self.bus.emit(&Event::CircuitClosed {
                        system: system.clone(),
                    });
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, system: &ProofSystem) {
        let mut entry = self.table.entry(system.clone()).or_default();
        entry.last_failure_at = Some(Instant::now());
        entry.last_failure_wallclock = Some(Utc::now());
        let opened = match entry.state {
            BreakerState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.config.failure_threshold {
                    entry.state = BreakerState::Open;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Open;
                entry.half_open_successes = 0;
                entry.half_open_probes = 0;
                true
            }
            BreakerState::Open => false,
        };
        let failure_count = entry.failure_count;
        drop(entry);
        if opened {
            tracing::warn!(system = %system, failure_count, "circuit breaker opened");
            self.bus.emit(&Event::CircuitOpened {
                system: system.clone(),
                failure_count,
            });
        }
    }

    pub fn state(&self, system: &ProofSystem) -> BreakerState {
        self.table
            .get(system)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn snapshot(&self, system: &ProofSystem) -> BreakerSnapshot {
        self.table
            .get(system)
            .map(|e| BreakerSnapshot {
                state: e.state,
                failure_count: e.failure_count,
                last_failure_at: e.last_failure_wallclock,
                half_open_success_count: e.half_open_successes,
            })
            .unwrap_or(BreakerSnapshot {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                half_open_success_count: 0,
            })
    }

    /// Force a system back to closed. Operator escape hatch.
    pub fn reset(&self, system: &ProofSystem) {
        self.table.remove(system);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: reset_ms,
                half_open_success_threshold: 2,
            },
            EventBus::new(),
        )
    }

    fn groth16() -> ProofSystem {
        ProofSystem::new("groth16")
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let b = breaker(60_000);
        let s = groth16();
        b.record_failure(&s);
        b.record_failure(&s);
        assert_eq!(b.state(&s), BreakerState::Closed);
        assert!(b.is_allowed(&s));
        b.record_failure(&s);
        assert_eq!(b.state(&s), BreakerState::Open);
        assert!(!b.is_allowed(&s));
    }

    #[test]
    fn closed_success_decrements_gradually() {
        let b = breaker(60_000);
        let s = groth16();
        b.record_failure(&s);
        b.record_failure(&s);
        b.record_success(&s);
        assert_eq!(b.snapshot(&s).failure_count, 1);
        b.record_success(&s);
        b.record_success(&s);
        assert_eq!(b.snapshot(&s).failure_count, 0, "floor at zero");
    }

    #[tokio::test]
    async fn reset_timeout_transitions_to_half_open_then_closed() {
        let b = breaker(10);
        let s = groth16();
        for _ in 0..3 {
            b.record_failure(&s);
        }
        assert!(!b.is_allowed(&s));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.is_allowed(&s), "first probe admitted");
        assert_eq!(b.state(&s), BreakerState::HalfOpen);

        b.record_success(&s);
        assert_eq!(b.state(&s), BreakerState::HalfOpen);
        assert!(b.is_allowed(&s), "second probe admitted");
        b.record_success(&s);
        assert_eq!(b.state(&s), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let b = breaker(10);
        let s = groth16();
        for _ in 0..3 {
            b.record_failure(&s);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.is_allowed(&s));
        b.record_failure(&s);
        assert_eq!(b.state(&s), BreakerState::Open);
        assert!(!b.is_allowed(&s));
    }

    #[tokio::test]
    async fn half_open_admits_only_threshold_probes() {
        let b = breaker(10);
        let s = groth16();
        for _ in 0..3 {
            b.record_failure(&s);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.is_allowed(&s));
        assert!(b.is_allowed(&s));
        assert!(!b.is_allowed(&s), "third probe blocked");
    }

    #[test]
    fn transition_events_emitted() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let bus = EventBus::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let opened2 = opened.clone();
        let _sub = bus.subscribe(move |event| {
            if matches!(event, Event::CircuitOpened { .. }) {
                opened2.fetch_add(1, Ordering::SeqCst);
            }
        });
        let b = CircuitBreaker::new(
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            bus,
        );
        b.record_failure(&groth16());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }
}
