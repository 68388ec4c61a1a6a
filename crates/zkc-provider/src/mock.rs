//! # Mock Provider
//!
//! A deterministic, transparent proving backend for development and
//! tests. Produces SHA-256-based "proofs" that are verifiable but carry
//! **no zero-knowledge guarantees**: `generate_proof` hashes the circuit
//! id and public inputs, `verify_proof` recomputes the same digest and
//! checks equality.
//!
//! Failure behavior is scriptable (fail the next N generations, or fail
//! every generation) so resilience-layer tests can drive a backend
//! through breaker and fallback transitions. The fallback executor can
//! also install a mock as a development-mode last-resort backend.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use zkc_core::{
    sha256_hex, GenerationResult, ProofMetadata, ProofRequest, ProofSystem, SingleProof,
};

use crate::{CircuitInfo, ProofProvider, ProviderCapabilities, ProviderError};

const MOCK_DOMAIN: &[u8] = b"zkc-mock-proof-v1";

/// Deterministic mock proving backend.
pub struct MockProvider {
    id: String,
    system: ProofSystem,
    circuits: Vec<CircuitInfo>,
    capabilities: ProviderCapabilities,
    /// Simulated proving latency per call.
    latency: Duration,
    initialized: AtomicBool,
    /// Fail the next N generation calls.
    fail_next: AtomicU32,
    /// Fail every generation call until cleared.
    always_fail: AtomicBool,
    generations: AtomicU64,
}

impl MockProvider {
    pub fn new(system: impl Into<ProofSystem>) -> Self {
        let system = system.into();
        Self {
            id: format!("mock-{system}"),
            system,
            circuits: Vec::new(),
            capabilities: ProviderCapabilities::default(),
            latency: Duration::ZERO,
            initialized: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            generations: AtomicU64::new(0),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_circuit(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.circuits.push(CircuitInfo::new(id, version));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_batch_verification(mut self, enabled: bool) -> Self {
        self.capabilities.supports_batch_verification = enabled;
        self
    }

    pub fn with_recursion(mut self, enabled: bool) -> Self {
        self.capabilities.supports_recursion = enabled;
        self
    }

    /// Start in the initialized state, skipping the explicit
    /// `initialize` handshake. Convenient for wiring mocks into pools.
    pub fn ready(self) -> Self {
        self.initialized.store(true, Ordering::SeqCst);
        self
    }

    /// Script the next `n` generation calls to fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every generation call until `set_always_fail(false)`.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Number of generation calls so far (successful or not).
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Whether `initialize` has run (and `dispose` has not).
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The digest a valid mock proof of this request carries.
    pub fn expected_proof_bytes(circuit_id: &str, public_inputs: &[String]) -> String {
        let mut parts: Vec<&[u8]> = vec![MOCK_DOMAIN, circuit_id.as_bytes()];
        for input in public_inputs {
            parts.push(input.as_bytes());
        }
        sha256_hex(&parts)
    }

    fn take_scripted_failure(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProofProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn system(&self) -> ProofSystem {
        self.system.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ProviderError> {
        let deadline = Instant::now() + timeout;
        while !self.initialized.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Err(ProviderError::ReadinessTimeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(())
    }

    async fn generate_proof(&self, request: &ProofRequest) -> GenerationResult {
        let started = Instant::now();
        self.generations.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.take_scripted_failure() {
            return GenerationResult::err(
                format!("mock provider {} scripted failure", self.id),
                started.elapsed().as_millis() as u64,
                &self.id,
            );
        }

        let circuit = match self.circuits.iter().find(|c| c.id == request.circuit_id) {
            Some(c) => c,
            None => {
                return GenerationResult::err(
                    ProviderError::CircuitNotFound(request.circuit_id.clone()).to_string(),
                    started.elapsed().as_millis() as u64,
                    &self.id,
                )
            }
        };

        let proof_bytes = Self::expected_proof_bytes(&request.circuit_id, &request.public_inputs);
        let proof = SingleProof {
            id: Uuid::new_v4(),
            proof_bytes: proof_bytes.clone(),
            public_inputs: request.public_inputs.clone(),
            metadata: ProofMetadata {
                system: self.system.clone(),
                system_version: "mock-1".to_string(),
                circuit_id: circuit.id.clone(),
                circuit_version: circuit.version.clone(),
                generated_at: Utc::now(),
                proof_size_bytes: proof_bytes.len() / 2,
                verification_cost: Some(1),
            },
            link: None,
        };

        GenerationResult::ok(proof, started.elapsed().as_millis() as u64, &self.id)
    }

    async fn verify_proof(&self, proof: &SingleProof) -> Result<bool, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency / 4).await;
        }
        let expected =
            Self::expected_proof_bytes(&proof.metadata.circuit_id, &proof.public_inputs);
        Ok(proof.proof_bytes == expected)
    }

    async fn verify_batch(
        &self,
        proofs: &[SingleProof],
    ) -> Option<Result<Vec<bool>, ProviderError>> {
        if !self.capabilities.supports_batch_verification {
            return None;
        }
        let mut results = Vec::with_capacity(proofs.len());
        for proof in proofs {
            match self.verify_proof(proof).await {
                Ok(valid) => results.push(valid),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(results))
    }

    async fn available_circuits(&self) -> Vec<CircuitInfo> {
        self.circuits.clone()
    }

    async fn dispose(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }
}
