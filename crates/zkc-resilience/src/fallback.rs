//! # Fallback Strategies
//!
//! A closed set of strategies sharing one contract: pick the next
//! backend to try after a failure, decide whether another attempt is
//! worthwhile, and compute the delay before it. Dispatched by matching
//! on the variant — no trait objects, no inheritance.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;

use zkc_core::{EngineError, ProofSystem};

use crate::health::HealthTracker;

/// Jitter applied to exponential backoff delays: ±30%.
const BACKOFF_JITTER: f64 = 0.3;

/// How the fallback executor walks alternate backends.
#[derive(Debug, Clone)]
pub enum FallbackStrategy {
    /// Walk a static ordered chain; linear delay `base × attempt`.
    Sequential {
        chain: Vec<ProofSystem>,
        base_delay: Duration,
    },
    /// Walk the chain with `min(base × 2^attempt × (1 ± 30%), max)` delays.
    ExponentialBackoff {
        chain: Vec<ProofSystem>,
        base_delay: Duration,
        max_delay: Duration,
    },
    /// Score healthy candidates as `priority × success_rate` and pick
    /// the maximum; delay grows with the attempt count.
    Priority {
        priorities: HashMap<ProofSystem, u8>,
        base_delay: Duration,
    },
}

impl FallbackStrategy {
    /// The next backend to try, or `None` when no candidate remains.
    /// `failed` systems are always skipped, as is `current`.
    pub fn next_provider(
        &self,
        current: &ProofSystem,
        failed: &HashSet<ProofSystem>,
        health: &HealthTracker,
    ) -> Option<ProofSystem> {
        match self {
            Self::Sequential { chain, .. } | Self::ExponentialBackoff { chain, .. } => chain
                .iter()
                .find(|s| *s != current && !failed.contains(*s))
                .cloned(),
            Self::Priority { priorities, .. } => priorities
                .iter()
                .filter(|(s, _)| *s != current && !failed.contains(*s))
                .filter_map(|(s, priority)| {
                    let h = health.health(s);
                    if !h.is_healthy {
                        return None;
                    }
                    Some((s, f64::from(*priority) * h.success_rate))
                })
                .max_by(|(a_s, a), (b_s, b)| {
                    a.partial_cmp(b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        // Deterministic tie-break for equal scores.
                        .then_with(|| b_s.as_str().cmp(a_s.as_str()))
                })
                .map(|(s, _)| s.clone()),
        }
    }

    /// Whether another attempt is worthwhile after `error`.
    pub fn should_attempt_fallback(
        &self,
        error: &EngineError,
        attempt: u32,
        max_attempts: u32,
    ) -> bool {
        attempt < max_attempts && error.is_retryable()
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Sequential { base_delay, .. } => *base_delay * attempt.max(1),
            Self::ExponentialBackoff {
                base_delay,
                max_delay,
                ..
            } => {
                let exponential =
                    base_delay.as_millis() as f64 * 2f64.powi(attempt.min(16) as i32);
                let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
                let with_jitter = exponential * (1.0 + jitter);
                Duration::from_millis(
                    (with_jitter as u64).min(max_delay.as_millis() as u64),
                )
            }
            Self::Priority { base_delay, .. } => *base_delay * (attempt.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(tag: &str) -> ProofSystem {
        ProofSystem::new(tag)
    }

    #[test]
    fn sequential_skips_failed_and_current() {
        let strategy = FallbackStrategy::Sequential {
            chain: vec![system("a"), system("b"), system("c")],
            base_delay: Duration::from_millis(10),
        };
        let health = HealthTracker::new();
        let mut failed = HashSet::new();
        failed.insert(system("a"));

        let next = strategy.next_provider(&system("a"), &failed, &health);
        assert_eq!(next, Some(system("b")));

        failed.insert(system("b"));
        failed.insert(system("c"));
        assert_eq!(strategy.next_provider(&system("a"), &failed, &health), None);
    }

    #[test]
    fn sequential_delay_is_linear() {
        let strategy = FallbackStrategy::Sequential {
            chain: vec![],
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(strategy.retry_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.retry_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_delay_is_capped_and_jittered() {
        let strategy = FallbackStrategy::ExponentialBackoff {
            chain: vec![],
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        for attempt in 1..10 {
            let delay = strategy.retry_delay(attempt);
            assert!(delay <= Duration::from_millis(1_000), "capped at max_delay");
        }
        // Attempt 1: 200ms ± 30%.
        let delay = strategy.retry_delay(1).as_millis() as f64;
        assert!((140.0..=260.0).contains(&delay), "got {delay}");
    }

    #[test]
    fn priority_prefers_high_score_and_excludes_unhealthy() {
        let health = HealthTracker::new();
        // "fast" is high priority but failing; "steady" is healthy.
        let fast = system("fast");
        let steady = system("steady");
        for _ in 0..3 {
            health.record_failure(&fast, "down", 10);
        }
        health.record_success(&steady, 10);

        let strategy = FallbackStrategy::Priority {
            priorities: HashMap::from([(fast.clone(), 10), (steady.clone(), 3)]),
            base_delay: Duration::from_millis(10),
        };
        let next = strategy.next_provider(&system("primary"), &HashSet::new(), &health);
        assert_eq!(next, Some(steady));
    }

    #[test]
    fn retry_gated_on_error_class_and_budget() {
        let strategy = FallbackStrategy::Sequential {
            chain: vec![],
            base_delay: Duration::from_millis(1),
        };
        let provider_err = EngineError::provider("a", "boom");
        assert!(strategy.should_attempt_fallback(&provider_err, 1, 3));
        assert!(!strategy.should_attempt_fallback(&provider_err, 3, 3));
        assert!(!strategy.should_attempt_fallback(&EngineError::Validation("bad".into()), 1, 3));
    }
}
