//! # Resilience Layer
//!
//! Keeps proof generation alive when a backend degrades: a per-system
//! circuit breaker blocks calls to failing backends, a health tracker
//! scores each backend's recent behavior, and a fallback executor walks
//! alternate backends under a configurable strategy until a proof lands
//! or the chain is exhausted.
//!
//! All state here is owned by the component instances and mutated only
//! through their methods; nothing reaches into ambient globals.

pub mod breaker;
pub mod exec;
pub mod fallback;
pub mod health;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use exec::{FallbackConfig, FallbackExecutor};
pub use fallback::FallbackStrategy;
pub use health::{HealthTracker, ProviderHealth};
