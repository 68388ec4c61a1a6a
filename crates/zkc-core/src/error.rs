//! # Engine Error Taxonomy
//!
//! One structured error family for the whole engine. Classes map to
//! retry policy: validation, cycle, and composition errors are never
//! retried; provider and timeout errors are retried per the resilience
//! layer's policy; cancellation is reported distinctly so callers can
//! tell "gave up" from "failed".

use thiserror::Error;

/// Errors from the composition and orchestration engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad input shape or bounds. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Generation or verification failure reported by a backend.
    #[error("provider error ({system}): {message}")]
    Provider { system: String, message: String },

    /// A provider call or an overall run exceeded its deadline.
    /// Treated as a provider failure for fallback purposes.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The dependency graph contains a cycle. Fatal; execution refused.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Strategy-level failure, e.g. proof count exceeded or no provider
    /// registered for the target system. Fatal to the call.
    #[error("composition error: {0}")]
    Composition(String),

    /// Cooperative abort. Distinct from failure.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn provider(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            system: system.into(),
            message: message.into(),
        }
    }

    /// Whether the resilience layer may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout(_))
    }
}
