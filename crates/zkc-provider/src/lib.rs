//! # Provider Capability Contract
//!
//! The uniform interface every proving backend implements, and the sole
//! boundary between the composition engine and proof-system internals.
//! Any backend implementing [`ProofProvider`] plugs into every component
//! above it unmodified.
//!
//! Provider methods are never assumed non-blocking; callers always await
//! them under a caller-imposed timeout. Generation failures are reported
//! in the returned [`GenerationResult`], never raised across the boundary.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zkc_core::{EngineError, GenerationResult, ProofRequest, ProofSystem, SingleProof};

pub use mock::MockProvider;

/// Errors from provider lifecycle and verification calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Resources (e.g. proving keys) could not load.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The provider did not become ready within the deadline.
    #[error("provider not ready after {0}ms")]
    ReadinessTimeout(u64),

    /// The requested circuit is not available on this provider.
    #[error("unknown circuit: {0}")]
    CircuitNotFound(String),

    /// Verification could not be performed (distinct from "proof invalid").
    #[error("verification error: {0}")]
    Verification(String),
}

impl ProviderError {
    /// Lift into the engine taxonomy, tagging the offending system.
    pub fn into_engine(self, system: &ProofSystem) -> EngineError {
        match self {
            ProviderError::ReadinessTimeout(ms) => EngineError::Timeout(ms),
            other => EngineError::provider(system.as_str(), other.to_string()),
        }
    }
}

/// Static capability flags a provider declares. Higher layers use these
/// to select composition and verification strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Whether the backend can fold two proofs into one (recursive
    /// composition scaffolding keys off this flag).
    pub supports_recursion: bool,
    /// Whether `verify_batch` is implemented.
    pub supports_batch_verification: bool,
    /// Largest proof, in bytes, the backend will produce.
    pub max_proof_size: usize,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_recursion: false,
            supports_batch_verification: false,
            max_proof_size: 64 * 1024,
        }
    }
}

/// A circuit a provider can prove statements about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub id: String,
    pub version: String,
}

impl CircuitInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// The capability contract every proving backend implements.
#[async_trait]
pub trait ProofProvider: Send + Sync {
    /// Stable registration id, unique among providers.
    fn id(&self) -> &str;

    /// The proof system this backend implements.
    fn system(&self) -> ProofSystem;

    /// Static capability flags.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Load resources. Idempotent; a second call on an initialized
    /// provider is a no-op.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Block until the provider is ready to prove, or fail with
    /// [`ProviderError::ReadinessTimeout`].
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ProviderError>;

    /// Generate one proof. Failures are reported in the result, never
    /// as `Err` — this method is infallible at the type level.
    async fn generate_proof(&self, request: &ProofRequest) -> GenerationResult;

    /// Verify one proof. `Ok(false)` means the proof is invalid;
    /// `Err` means verification could not be performed.
    async fn verify_proof(&self, proof: &SingleProof) -> Result<bool, ProviderError>;

    /// Verify several proofs at once. `None` means the backend has no
    /// batch path and callers must fall back to per-proof verification.
    async fn verify_batch(
        &self,
        _proofs: &[SingleProof],
    ) -> Option<Result<Vec<bool>, ProviderError>> {
        None
    }

    /// Circuits this provider can prove.
    async fn available_circuits(&self) -> Vec<CircuitInfo>;

    /// Whether `circuit_id` is available.
    async fn has_circuit(&self, circuit_id: &str) -> bool {
        self.available_circuits()
            .await
            .iter()
            .any(|c| c.id == circuit_id)
    }

    /// Release resources. Idempotent.
    async fn dispose(&self);
}
