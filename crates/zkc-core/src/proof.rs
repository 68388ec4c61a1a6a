//! # Proof Records
//!
//! The immutable proof data model: [`SingleProof`] as produced by one
//! proving backend, and [`ComposedProof`] as produced by the composition
//! engine. Both are plain serde records — once constructed they are never
//! mutated, only consumed by the verification pipeline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Proof system identifier
// ---------------------------------------------------------------------------

/// Opaque identifier for a proving backend (e.g. `"groth16"`, `"plonk"`).
///
/// Used as a map key everywhere; deliberately not `Ord` — systems have no
/// meaningful ordering and code must never rely on one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofSystem(pub String);

impl ProofSystem {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProofSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProofSystem {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

// ---------------------------------------------------------------------------
// Strategy and status
// ---------------------------------------------------------------------------

/// Aggregation strategy for combining proofs into a [`ComposedProof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStrategy {
    /// Verify each proof in array order; first failure fails the composition.
    Sequential,
    /// Verify all proofs concurrently with no ordering guarantee.
    Parallel,
    /// Group proofs by system and batch-verify where the provider supports
    /// it. Invalid proofs are dropped from the composed result rather than
    /// failing the composition.
    Batch,
    /// Pair proofs bottom-up into placeholder merged proofs. Requires a
    /// provider that declares recursion support; not a real proof fold.
    Recursive,
}

impl fmt::Display for CompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Batch => write!(f, "batch"),
            Self::Recursive => write!(f, "recursive"),
        }
    }
}

/// Lifecycle status of a composed proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    Pending,
    Verified,
    Failed,
}

// ---------------------------------------------------------------------------
// Single proof
// ---------------------------------------------------------------------------

/// Provenance metadata attached to every [`SingleProof`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofMetadata {
    pub system: ProofSystem,
    pub system_version: String,
    pub circuit_id: String,
    pub circuit_version: String,
    pub generated_at: DateTime<Utc>,
    pub proof_size_bytes: usize,
    /// Relative verification cost estimate, if the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_cost: Option<u64>,
}

/// A binding asserting this proof belongs to the same logical transaction
/// as `peer_id`. The hash is an opaque SHA-256 binding of the two proof
/// identities — not a cryptographic commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofLink {
    pub peer_id: Uuid,
    pub hash: String,
}

/// One proof produced by one proving backend. Immutable once produced;
/// `id` is randomly generated and treated as globally unique within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleProof {
    pub id: Uuid,
    /// Hex-encoded proof bytes.
    pub proof_bytes: String,
    /// Ordered hex-encoded public input scalars.
    pub public_inputs: Vec<String>,
    pub metadata: ProofMetadata,
    /// Cross-proof link, if this proof was bound to a peer by the aggregator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<ProofLink>,
}

impl SingleProof {
    /// System tag shorthand.
    pub fn system(&self) -> &ProofSystem {
        &self.metadata.system
    }
}

// ---------------------------------------------------------------------------
// Composed proof
// ---------------------------------------------------------------------------

/// Summary metadata computed when a composition finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionMetadata {
    /// Distinct systems contributing proofs, in first-seen order.
    pub systems: Vec<ProofSystem>,
    /// SHA-256 over all combined public inputs.
    pub input_hash: String,
    pub proof_count: usize,
    pub composition_time_ms: u64,
    pub success: bool,
}

/// Hints precomputed at composition time so the verification pipeline can
/// plan its work without re-deriving structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationHints {
    /// Proof ids in the order they should be verified sequentially.
    pub verification_order: Vec<Uuid>,
    /// Proof ids grouped by system; groups may be verified concurrently.
    pub parallel_groups: HashMap<ProofSystem, Vec<Uuid>>,
    pub estimated_time_ms: u64,
    pub estimated_cost: u64,
    /// True when every contributing provider supports batch verification.
    pub supports_batch_verification: bool,
}

/// The result of combining one or more proofs under a strategy.
///
/// Created once by the composition engine or orchestrator, immutable
/// thereafter, and consumed by the verification pipeline. `proofs` is
/// never empty and never exceeds the configured maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedProof {
    pub id: Uuid,
    pub proofs: Vec<SingleProof>,
    pub strategy: CompositionStrategy,
    pub status: ProofStatus,
    /// All public inputs flattened in proof order.
    pub combined_public_inputs: Vec<String>,
    pub composition_metadata: CompositionMetadata,
    pub verification_hints: VerificationHints,
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A request for one proof from one circuit.
///
/// `system` and `provider_id` are both optional: the composer resolves an
/// explicit provider id first, then an explicit system, then the first
/// available registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofRequest {
    pub circuit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<ProofSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Ordered hex-encoded public input scalars.
    #[serde(default)]
    pub public_inputs: Vec<String>,
    /// Opaque witness payload handed to the provider unmodified.
    #[serde(default)]
    pub private_inputs: serde_json::Value,
    /// Per-call timeout override, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ProofRequest {
    pub fn new(circuit_id: impl Into<String>) -> Self {
        Self {
            circuit_id: circuit_id.into(),
            system: None,
            provider_id: None,
            public_inputs: Vec::new(),
            private_inputs: serde_json::Value::Null,
            timeout_ms: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<ProofSystem>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_public_inputs(mut self, inputs: Vec<String>) -> Self {
        self.public_inputs = inputs;
        self
    }
}

impl From<&str> for ProofRequest {
    fn from(circuit_id: &str) -> Self {
        Self::new(circuit_id)
    }
}

/// Uniform generation outcome. Failures are reported here, never raised
/// across the provider boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<SingleProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time_ms: u64,
    pub provider_id: String,
}

impl GenerationResult {
    pub fn ok(proof: SingleProof, time_ms: u64, provider_id: impl Into<String>) -> Self {
        Self {
            success: true,
            proof: Some(proof),
            error: None,
            time_ms,
            provider_id: provider_id.into(),
        }
    }

    pub fn err(error: impl Into<String>, time_ms: u64, provider_id: impl Into<String>) -> Self {
        Self {
            success: false,
            proof: None,
            error: Some(error.into()),
            time_ms,
            provider_id: provider_id.into(),
        }
    }
}
