//! # Proof Composer
//!
//! The registry-backed front of the composition engine. Providers
//! register per system with a priority and an enabled flag; requests
//! resolve to a provider by explicit id, then explicit system, then the
//! highest-priority enabled registration. Generated proofs are cached
//! by request digest so identical requests within a run do not hit the
//! backend twice.
//!
//! `compose` validates bounds and cancellation, then dispatches to the
//! [`aggregator`](crate::aggregator) primitives per strategy, emitting
//! `composition:*` events throughout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinSet;
use uuid::Uuid;

use zkc_core::{
    input_hash, sha256_hex, CancellationToken, ComposedProof, CompositionMetadata,
    CompositionStrategy, EngineError, Event, EventBus, GenerationResult, ProofRequest, ProofStatus,
    ProofSystem, SingleProof, VerificationHints,
};
use zkc_provider::ProofProvider;

use crate::aggregator::{self, AggregationContext, RetryPolicy};

const CACHE_DOMAIN: &[u8] = b"zkc-request-digest-v1";

/// Rough per-unit verification time used for hint estimates, ms.
const ESTIMATED_MS_PER_COST_UNIT: u64 = 5;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Upper bound on proofs per composition.
    pub max_proofs: usize,
    /// Generate batches concurrently instead of sequentially.
    pub parallel_generation: bool,
    /// Concurrency bound for parallel generation.
    pub max_parallel_generation: usize,
    /// How long to wait for a resolved provider to become ready.
    pub readiness_timeout_ms: u64,
    /// Cache generated proofs by request digest.
    pub enable_cache: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_proofs: 32,
            parallel_generation: false,
            max_parallel_generation: 4,
            readiness_timeout_ms: 5_000,
            enable_cache: true,
        }
    }
}

/// Per-composition options.
#[derive(Clone, Default)]
pub struct ComposeOptions {
    pub cancel: CancellationToken,
    pub retry: RetryPolicy,
    /// Bind the two proofs of a pair composition to each other before
    /// verification.
    pub link_pairs: bool,
}

struct Registration {
    provider: Arc<dyn ProofProvider>,
    priority: u8,
    enabled: bool,
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

pub struct ProofComposer {
    config: ComposerConfig,
    registry: DashMap<ProofSystem, Registration>,
    cache: DashMap<String, SingleProof>,
    bus: EventBus,
}

impl ProofComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self {
            config,
            registry: DashMap::new(),
            cache: DashMap::new(),
            bus: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Register a provider for its system. Replaces any existing
    /// registration for the same system.
    pub fn register_provider(&self, provider: Arc<dyn ProofProvider>, priority: u8) {
        let system = provider.system();
        tracing::info!(system = %system, provider_id = provider.id(), priority, "provider registered");
        self.registry.insert(
            system,
            Registration {
                provider,
                priority,
                enabled: true,
            },
        );
    }

    /// Enable or disable a registration. Returns false when the system
    /// is unknown.
    pub fn set_provider_enabled(&self, system: &ProofSystem, enabled: bool) -> bool {
        match self.registry.get_mut(system) {
            Some(mut reg) => {
                reg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, system: &ProofSystem) -> bool {
        self.registry.remove(system).is_some()
    }

    pub fn registered_systems(&self) -> Vec<ProofSystem> {
        self.registry.iter().map(|r| r.key().clone()).collect()
    }

    /// Resolve the provider a request should run on: explicit provider
    /// id first, then explicit system, then the highest-priority
    /// enabled registration (system tag as deterministic tie-break).
    pub fn resolve(&self, request: &ProofRequest) -> Result<Arc<dyn ProofProvider>, EngineError> {
        if let Some(id) = &request.provider_id {
            return self
                .registry
                .iter()
                .find(|r| r.enabled && r.provider.id() == id)
                .map(|r| Arc::clone(&r.provider))
                .ok_or_else(|| {
                    EngineError::Composition(format!("no enabled provider with id {id}"))
                });
        }
        if let Some(system) = &request.system {
            let reg = self.registry.get(system).ok_or_else(|| {
                EngineError::Composition(format!("no provider registered for {system}"))
            })?;
            if !reg.enabled {
                return Err(EngineError::Composition(format!(
                    "provider for {system} is disabled"
                )));
            }
            return Ok(Arc::clone(&reg.provider));
        }
        self.registry
            .iter()
            .filter(|r| r.enabled)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.key().as_str().cmp(a.key().as_str()))
            })
            .map(|r| Arc::clone(&r.provider))
            .ok_or_else(|| EngineError::Composition("no enabled provider registered".to_string()))
    }

    fn provider_for_system(&self, system: &ProofSystem) -> Option<Arc<dyn ProofProvider>> {
        self.registry
            .get(system)
            .filter(|r| r.enabled)
            .map(|r| Arc::clone(&r.provider))
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    fn request_digest(request: &ProofRequest) -> String {
        let private = request.private_inputs.to_string();
        let mut parts: Vec<&[u8]> = vec![CACHE_DOMAIN, request.circuit_id.as_bytes()];
        if let Some(system) = &request.system {
            parts.push(system.as_str().as_bytes());
        }
        if let Some(id) = &request.provider_id {
            parts.push(id.as_bytes());
        }
        for input in &request.public_inputs {
            parts.push(input.as_bytes());
        }
        parts.push(private.as_bytes());
        sha256_hex(&parts)
    }

    /// Generate one proof. All failures are reported in the result.
    pub async fn generate_proof(&self, request: &ProofRequest) -> GenerationResult {
        let started = Instant::now();
        let provider = match self.resolve(request) {
            Ok(p) => p,
            Err(e) => return GenerationResult::err(e.to_string(), 0, "composer"),
        };

        let digest = Self::request_digest(request);
        if self.config.enable_cache {
            if let Some(cached) = self.cache.get(&digest) {
                tracing::debug!(circuit = %request.circuit_id, "generation cache hit");
                return GenerationResult::ok(cached.clone(), 0, provider.id());
            }
        }

        let readiness = Duration::from_millis(self.config.readiness_timeout_ms);
        if let Err(e) = provider.wait_until_ready(readiness).await {
            return GenerationResult::err(
                e.to_string(),
                started.elapsed().as_millis() as u64,
                provider.id(),
            );
        }
        if !provider.has_circuit(&request.circuit_id).await {
            return GenerationResult::err(
                format!("unknown circuit: {}", request.circuit_id),
                started.elapsed().as_millis() as u64,
                provider.id(),
            );
        }

        let result = provider.generate_proof(request).await;
        if self.config.enable_cache && result.success {
            if let Some(proof) = &result.proof {
                self.cache.insert(digest, proof.clone());
            }
        }
        result
    }

    /// Generate a batch of proofs, sequentially or with bounded
    /// concurrency per the config. Results keep request order.
    pub async fn generate_proofs(self: &Arc<Self>, requests: &[ProofRequest]) -> Vec<GenerationResult> {
        if !self.config.parallel_generation || requests.len() <= 1 {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.generate_proof(request).await);
            }
            return results;
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_parallel_generation.max(1),
        ));
        let mut set: JoinSet<(usize, GenerationResult)> = JoinSet::new();
        for (index, request) in requests.iter().cloned().enumerate() {
            let composer = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                // Closed only on runtime shutdown.
                let _permit = semaphore.acquire_owned().await;
                (index, composer.generate_proof(&request).await)
            });
        }

        let mut slots: Vec<Option<GenerationResult>> = vec![None; requests.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "generation task failed"),
            }
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    GenerationResult::err("generation task panicked", 0, "composer")
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Composition
    // -----------------------------------------------------------------------

    /// Combine proofs under `strategy`. Validates bounds, verifies per
    /// the strategy's semantics, and returns an immutable composed
    /// proof with precomputed verification hints.
    ///
    /// Batch compositions tolerate invalid proofs: the composed proof
    /// carries only the proofs that verified, with
    /// `composition_metadata.success == false` and a `Failed` status
    /// when any were dropped.
    pub async fn compose(
        &self,
        mut proofs: Vec<SingleProof>,
        strategy: CompositionStrategy,
        options: ComposeOptions,
    ) -> Result<ComposedProof, EngineError> {
        if proofs.is_empty() {
            return Err(EngineError::Validation(
                "composition requires at least one proof".to_string(),
            ));
        }
        if proofs.len() > self.config.max_proofs {
            return Err(EngineError::Validation(format!(
                "{} proofs exceeds the maximum of {}",
                proofs.len(),
                self.config.max_proofs
            )));
        }
        options.cancel.check()?;

        let composition_id = Uuid::new_v4();
        let started = Instant::now();
        self.bus.emit(&Event::CompositionStarted {
            composition_id,
            strategy,
            proof_count: proofs.len(),
        });

        if options.link_pairs && proofs.len() == 2 {
            let (left, right) = proofs.split_at_mut(1);
            aggregator::link_proofs(&mut left[0], &mut right[0]);
        }

        let ctx = self.aggregation_context(composition_id, proofs.len(), &options);
        let outcome = self.run_strategy(&mut proofs, strategy, &ctx).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(all_valid) => {
                let composed =
                    self.build_composed(composition_id, proofs, strategy, elapsed, all_valid);
                self.bus.emit(&Event::CompositionCompleted {
                    composition_id,
                    success: all_valid,
                    time_ms: elapsed,
                });
                Ok(composed)
            }
            Err(error) => {
                tracing::warn!(%composition_id, %strategy, %error, "composition failed");
                self.bus.emit(&Event::CompositionFailed {
                    composition_id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    fn aggregation_context(
        &self,
        composition_id: Uuid,
        total: usize,
        options: &ComposeOptions,
    ) -> AggregationContext {
        let registry_lookup = {
            // Snapshot the enabled providers; registry churn during a
            // composition does not affect it.
            let providers: HashMap<ProofSystem, Arc<dyn ProofProvider>> = self
                .registry
                .iter()
                .filter(|r| r.enabled)
                .map(|r| (r.key().clone(), Arc::clone(&r.provider)))
                .collect();
            move |system: &ProofSystem| providers.get(system).cloned()
        };
        let bus = self.bus.clone();
        AggregationContext::new(registry_lookup)
            .with_cancel(options.cancel.clone())
            .with_retry(options.retry)
            .with_progress(move |progress| {
                bus.emit(&Event::CompositionProgress {
                    composition_id,
                    completed: progress.completed,
                    total,
                });
            })
    }

    /// Run one strategy over `proofs`, mutating the vector into the set
    /// that makes up the composed proof. Returns whether every input
    /// proof verified: sequential and parallel fail hard on an invalid
    /// proof, while batch drops invalid proofs from the set and reports
    /// `false` so the composed proof carries the valid subset.
    async fn run_strategy(
        &self,
        proofs: &mut Vec<SingleProof>,
        strategy: CompositionStrategy,
        ctx: &AggregationContext,
    ) -> Result<bool, EngineError> {
        match strategy {
            CompositionStrategy::Sequential => {
                aggregator::verify_sequential(proofs, ctx).await?;
                Ok(true)
            }
            CompositionStrategy::Parallel => {
                aggregator::verify_parallel(proofs, ctx).await?;
                Ok(true)
            }
            CompositionStrategy::Batch => {
                let verdicts = aggregator::verify_batch_grouped(proofs, ctx).await?;
                let all_valid = verdicts.iter().all(|v| *v);
                if !all_valid {
                    let mut keep = verdicts.iter().copied();
                    proofs.retain(|_| keep.next().unwrap_or(false));
                }
                Ok(all_valid)
            }
            CompositionStrategy::Recursive => {
                let target = proofs[0].system().clone();
                let originals = std::mem::take(proofs);
                let folded = aggregator::fold_recursive(originals, &target, ctx).await?;
                *proofs = vec![folded];
                Ok(true)
            }
        }
    }

    fn build_composed(
        &self,
        composition_id: Uuid,
        proofs: Vec<SingleProof>,
        strategy: CompositionStrategy,
        elapsed_ms: u64,
        all_valid: bool,
    ) -> ComposedProof {
        let combined_public_inputs: Vec<String> = proofs
            .iter()
            .flat_map(|p| p.public_inputs.iter().cloned())
            .collect();

        // Distinct systems in first-seen order.
        let mut systems: Vec<ProofSystem> = Vec::new();
        for proof in &proofs {
            if !systems.contains(proof.system()) {
                systems.push(proof.system().clone());
            }
        }

        let estimated_cost: u64 = proofs
            .iter()
            .map(|p| p.metadata.verification_cost.unwrap_or(1))
            .sum();
        let supports_batch = systems.iter().all(|s| {
            self.provider_for_system(s)
                .map(|p| p.capabilities().supports_batch_verification)
                .unwrap_or(false)
        });

        let mut parallel_groups: HashMap<ProofSystem, Vec<Uuid>> = HashMap::new();
        for proof in &proofs {
            parallel_groups
                .entry(proof.system().clone())
                .or_default()
                .push(proof.id);
        }

        ComposedProof {
            id: composition_id,
            combined_public_inputs: combined_public_inputs.clone(),
            composition_metadata: CompositionMetadata {
                systems,
                input_hash: input_hash(&combined_public_inputs),
                proof_count: proofs.len(),
                composition_time_ms: elapsed_ms,
                success: all_valid,
            },
            verification_hints: VerificationHints {
                verification_order: proofs.iter().map(|p| p.id).collect(),
                parallel_groups,
                estimated_time_ms: estimated_cost * ESTIMATED_MS_PER_COST_UNIT,
                estimated_cost,
                supports_batch_verification: supports_batch,
            },
            proofs,
            strategy,
            status: if all_valid {
                ProofStatus::Verified
            } else {
                ProofStatus::Failed
            },
        }
    }

    // -----------------------------------------------------------------------
    // Aggregation and conversion
    // -----------------------------------------------------------------------

    /// Fold proofs into one placeholder proof on `target_system`,
    /// optionally verifying each input first. The result is a digest
    /// chain, not a real recursive proof.
    pub async fn aggregate(
        &self,
        proofs: Vec<SingleProof>,
        target_system: &ProofSystem,
        pre_verify: bool,
        options: ComposeOptions,
    ) -> Result<SingleProof, EngineError> {
        let composition_id = Uuid::new_v4();
        let ctx = self.aggregation_context(composition_id, proofs.len(), &options);
        if pre_verify {
            aggregator::verify_sequential(&proofs, &ctx).await?;
        }
        aggregator::fold_recursive(proofs, target_system, &ctx).await
    }

    /// Convert a proof to `target_system`. Only same-system passthrough
    /// is supported; cross-system conversion is an extension point.
    pub fn convert(
        &self,
        proof: SingleProof,
        target_system: &ProofSystem,
    ) -> Result<SingleProof, EngineError> {
        if proof.system() == target_system {
            Ok(proof)
        } else {
            Err(EngineError::Composition(format!(
                "cannot convert {} proof to {target_system}",
                proof.system()
            )))
        }
    }

    /// Which systems each registered system's proofs can be converted
    /// to. Currently same-system only.
    pub fn compatibility_matrix(&self) -> HashMap<ProofSystem, Vec<ProofSystem>> {
        self.registry
            .iter()
            .map(|r| (r.key().clone(), vec![r.key().clone()]))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Initialize every registered provider concurrently. The first
    /// failure is returned; remaining providers still finish.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let systems = self.registered_systems();
        self.initialize_systems(&systems, true).await
    }

    /// Initialize the providers registered for `systems`, concurrently
    /// or in registration order. Systems without an enabled registration
    /// are skipped. With `parallel`, the first failure is returned but
    /// remaining providers still finish.
    pub async fn initialize_systems(
        &self,
        systems: &[ProofSystem],
        parallel: bool,
    ) -> Result<(), EngineError> {
        let providers: Vec<(ProofSystem, Arc<dyn ProofProvider>)> = systems
            .iter()
            .filter_map(|s| self.provider_for_system(s).map(|p| (s.clone(), p)))
            .collect();

        if !parallel {
            for (system, provider) in providers {
                provider
                    .initialize()
                    .await
                    .map_err(|e| e.into_engine(&system))?;
            }
            return Ok(());
        }

        let mut set: JoinSet<Result<(), EngineError>> = JoinSet::new();
        for (system, provider) in providers {
            set.spawn(async move {
                provider
                    .initialize()
                    .await
                    .map_err(|e| e.into_engine(&system))
            });
        }
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(EngineError::Composition(format!(
                        "initialize task failed: {e}"
                    )));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispose every provider concurrently, then clear the registry,
    /// the proof cache, and all event listeners.
    pub async fn dispose(&self) {
        let mut set: JoinSet<()> = JoinSet::new();
        for reg in self.registry.iter() {
            let provider = Arc::clone(&reg.provider);
            set.spawn(async move { provider.dispose().await });
        }
        while set.join_next().await.is_some() {}
        self.registry.clear();
        self.cache.clear();
        self.bus.clear();
    }
}
