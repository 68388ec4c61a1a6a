//! # Verification Pipeline
//!
//! Verifies a [`ComposedProof`] end to end: plans the order from the
//! composition's hints, picks a mode (strict sequential, batch by
//! system, or bounded-parallel), consults the TTL result cache, checks
//! cross-proof links, and reports per-proof and per-system outcomes.
//!
//! An invalid proof is a *verdict*, reported in the result; `Err` is
//! reserved for infrastructure failures (missing provider, timeout,
//! verifier error, cancellation).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use zkc_compose::verify_link;
use zkc_core::{
    sha256_hex, CancellationToken, ComposedProof, EngineError, ProofSystem, SingleProof,
};
use zkc_provider::ProofProvider;

use crate::cache::{CacheStats, VerificationCache};

const RECEIPT_DOMAIN: &[u8] = b"zkc-verification-receipt-v1";

// ---------------------------------------------------------------------------
// Configuration and context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub enable_parallel: bool,
    /// Concurrency bound for parallel verification.
    pub max_concurrent: usize,
    pub enable_batch: bool,
    /// Deadline per provider verification call, milliseconds.
    pub verification_timeout_ms: u64,
    pub enable_cache: bool,
    pub cache_ttl_ms: u64,
    /// Verify strictly in order and stop at the first invalid proof.
    pub strict_mode: bool,
    /// Emit a digest receipt over the verified ids on success.
    pub generate_verification_proof: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_concurrent: 4,
            enable_batch: true,
            verification_timeout_ms: 30_000,
            enable_cache: true,
            cache_ttl_ms: 60_000,
            strict_mode: false,
            generate_verification_proof: false,
        }
    }
}

/// Progress notification after each verified proof.
#[derive(Debug, Clone, Copy)]
pub struct VerifyProgress {
    pub completed: usize,
    pub total: usize,
}

type Lookup = Arc<dyn Fn(&ProofSystem) -> Option<Arc<dyn ProofProvider>> + Send + Sync>;
type ProgressFn = Arc<dyn Fn(VerifyProgress) + Send + Sync>;

/// Caller-supplied collaboration points for one verification run.
#[derive(Clone)]
pub struct VerifyContext {
    lookup: Lookup,
    on_progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl VerifyContext {
    pub fn new(
        lookup: impl Fn(&ProofSystem) -> Option<Arc<dyn ProofProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            lookup: Arc::new(lookup),
            on_progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context over a single provider, matched by system.
    pub fn from_provider(provider: Arc<dyn ProofProvider>) -> Self {
        let system = provider.system();
        Self::new(move |s| {
            if *s == system {
                Some(Arc::clone(&provider))
            } else {
                None
            }
        })
    }

    pub fn with_progress(
        mut self,
        on_progress: impl Fn(VerifyProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn provider_for(&self, system: &ProofSystem) -> Result<Arc<dyn ProofProvider>, EngineError> {
        (self.lookup)(system)
            .ok_or_else(|| EngineError::Composition(format!("no provider available for {system}")))
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(cb) = &self.on_progress {
            cb(VerifyProgress { completed, total });
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How the pipeline verified a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    Sequential,
    Parallel,
    Batch,
}

/// Outcome for one proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofVerification {
    pub proof_id: Uuid,
    pub system: ProofSystem,
    pub valid: bool,
    pub from_cache: bool,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total: usize,
    pub valid: usize,
}

/// Full pipeline outcome for one composed proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub composed_id: Uuid,
    pub valid: bool,
    pub mode: VerifyMode,
    pub proof_results: Vec<ProofVerification>,
    pub per_system: HashMap<ProofSystem, SystemStats>,
    /// `None` for single-proof compositions (nothing to link).
    pub links_valid: Option<bool>,
    /// Digest over the verified ids, when configured and valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct VerificationPipeline {
    config: VerifyConfig,
    cache: Arc<VerificationCache>,
}

impl VerificationPipeline {
    pub fn new(config: VerifyConfig) -> Self {
        let cache = Arc::new(VerificationCache::new(Duration::from_millis(
            config.cache_ttl_ms,
        )));
        Self { config, cache }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Verify a composed proof end to end.
    pub async fn verify(
        &self,
        composed: &ComposedProof,
        ctx: &VerifyContext,
    ) -> Result<VerificationReport, EngineError> {
        let started = Instant::now();
        ctx.cancel.check()?;

        let ordered = self.plan_order(composed);
        let mode = self.pick_mode(composed);
        tracing::debug!(
            composed_id = %composed.id,
            ?mode,
            proof_count = ordered.len(),
            "verifying composition"
        );

        let proof_results = match mode {
            VerifyMode::Sequential => self.verify_sequential(&ordered, ctx).await?,
            VerifyMode::Parallel => self.verify_parallel(&ordered, ctx).await?,
            VerifyMode::Batch => self.verify_grouped(&ordered, ctx).await?,
        };

        let links_valid = check_links(&composed.proofs);
        let mut per_system: HashMap<ProofSystem, SystemStats> = HashMap::new();
        for result in &proof_results {
            let stats = per_system.entry(result.system.clone()).or_default();
            stats.total += 1;
            if result.valid {
                stats.valid += 1;
            }
        }

        let all_verified =
            proof_results.len() == ordered.len() && proof_results.iter().all(|r| r.valid);
        let valid = all_verified && links_valid != Some(false);

        let receipt = if self.config.generate_verification_proof && valid {
            let mut parts: Vec<&[u8]> = vec![RECEIPT_DOMAIN, composed.id.as_bytes()];
            for result in &proof_results {
                parts.push(result.proof_id.as_bytes());
            }
            Some(sha256_hex(&parts))
        } else {
            None
        };

        Ok(VerificationReport {
            composed_id: composed.id,
            valid,
            mode,
            proof_results,
            per_system,
            links_valid,
            receipt,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Verify one proof directly, through the cache.
    pub async fn verify_single(
        &self,
        proof: &SingleProof,
        ctx: &VerifyContext,
    ) -> Result<bool, EngineError> {
        ctx.cancel.check()?;
        let result = self.verify_one(proof, ctx).await?;
        Ok(result.valid)
    }

    /// Verify several independent proofs, batching by system where the
    /// provider has a batch path. Verdicts keep input order.
    pub async fn verify_batch(
        &self,
        proofs: &[SingleProof],
        ctx: &VerifyContext,
    ) -> Result<Vec<bool>, EngineError> {
        let ordered: Vec<&SingleProof> = proofs.iter().collect();
        let results = self.verify_grouped(&ordered, ctx).await?;
        let verdicts: HashMap<Uuid, bool> = results.into_iter().map(|r| (r.proof_id, r.valid)).collect();
        Ok(proofs
            .iter()
            .map(|p| verdicts.get(&p.id).copied().unwrap_or(false))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    fn plan_order<'a>(&self, composed: &'a ComposedProof) -> Vec<&'a SingleProof> {
        let by_id: HashMap<Uuid, &SingleProof> =
            composed.proofs.iter().map(|p| (p.id, p)).collect();
        let mut ordered: Vec<&SingleProof> = composed
            .verification_hints
            .verification_order
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        // Hints that do not cover every proof are completed from the
        // composition itself.
        if ordered.len() != composed.proofs.len() {
            for proof in &composed.proofs {
                if !ordered.iter().any(|p| p.id == proof.id) {
                    ordered.push(proof);
                }
            }
        }
        ordered
    }

    fn pick_mode(&self, composed: &ComposedProof) -> VerifyMode {
        if self.config.strict_mode {
            VerifyMode::Sequential
        } else if self.config.enable_batch
            && composed.verification_hints.supports_batch_verification
        {
            VerifyMode::Batch
        } else if self.config.enable_parallel && composed.proofs.len() > 1 {
            VerifyMode::Parallel
        } else {
            VerifyMode::Sequential
        }
    }

    // -----------------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------------

    async fn verify_one(
        &self,
        proof: &SingleProof,
        ctx: &VerifyContext,
    ) -> Result<ProofVerification, EngineError> {
        if self.config.enable_cache {
            if let Some(valid) = self.cache.get(&proof.id) {
                return Ok(ProofVerification {
                    proof_id: proof.id,
                    system: proof.system().clone(),
                    valid,
                    from_cache: true,
                    time_ms: 0,
                });
            }
        }
        let provider = ctx.provider_for(proof.system())?;
        let verdict = call_verifier(
            &provider,
            proof,
            Duration::from_millis(self.config.verification_timeout_ms),
        )
        .await?;
        if self.config.enable_cache {
            self.cache.insert(proof.id, verdict.valid);
        }
        Ok(verdict)
    }

    async fn verify_sequential(
        &self,
        ordered: &[&SingleProof],
        ctx: &VerifyContext,
    ) -> Result<Vec<ProofVerification>, EngineError> {
        let mut results = Vec::with_capacity(ordered.len());
        for (index, proof) in ordered.iter().enumerate() {
            ctx.cancel.check()?;
            let result = self.verify_one(proof, ctx).await?;
            let valid = result.valid;
            results.push(result);
            ctx.report(index + 1, ordered.len());
            if self.config.strict_mode && !valid {
                tracing::debug!(proof_id = %proof.id, "strict mode, stopping at first invalid proof");
                break;
            }
        }
        Ok(results)
    }

    async fn verify_parallel(
        &self,
        ordered: &[&SingleProof],
        ctx: &VerifyContext,
    ) -> Result<Vec<ProofVerification>, EngineError> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent.max(1)));
        let timeout = Duration::from_millis(self.config.verification_timeout_ms);
        let mut set: JoinSet<(usize, Result<ProofVerification, EngineError>)> = JoinSet::new();

        for (index, proof) in ordered.iter().enumerate() {
            // Resolve up front so a missing registration fails fast.
            let provider = ctx.provider_for(proof.system())?;
            let proof = (*proof).clone();
            let cache = Arc::clone(&self.cache);
            let enable_cache = self.config.enable_cache;
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if enable_cache {
                    if let Some(valid) = cache.get(&proof.id) {
                        return (
                            index,
                            Ok(ProofVerification {
                                proof_id: proof.id,
                                system: proof.system().clone(),
                                valid,
                                from_cache: true,
                                time_ms: 0,
                            }),
                        );
                    }
                }
                let outcome = call_verifier(&provider, &proof, timeout).await;
                if enable_cache {
                    if let Ok(v) = &outcome {
                        cache.insert(proof.id, v.valid);
                    }
                }
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ProofVerification>> = (0..ordered.len()).map(|_| None).collect();
        let mut completed = 0usize;
        while let Some(joined) = set.join_next().await {
            ctx.cancel.check()?;
            let (index, outcome) = joined
                .map_err(|e| EngineError::Composition(format!("verification task failed: {e}")))?;
            slots[index] = Some(outcome?);
            completed += 1;
            ctx.report(completed, ordered.len());
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn verify_grouped(
        &self,
        ordered: &[&SingleProof],
        ctx: &VerifyContext,
    ) -> Result<Vec<ProofVerification>, EngineError> {
        // Group by system in first-seen order.
        let mut order: Vec<ProofSystem> = Vec::new();
        let mut groups: HashMap<ProofSystem, Vec<&SingleProof>> = HashMap::new();
        for proof in ordered {
            let entry = groups.entry(proof.system().clone()).or_default();
            if entry.is_empty() {
                order.push(proof.system().clone());
            }
            entry.push(proof);
        }

        let mut results = Vec::with_capacity(ordered.len());
        let mut completed = 0usize;
        for system in order {
            ctx.cancel.check()?;
            let provider = ctx.provider_for(&system)?;
            let group = &groups[&system];

            // Serve cached verdicts; only the misses hit the provider.
            let mut misses: Vec<&SingleProof> = Vec::new();
            for proof in group {
                if self.config.enable_cache {
                    if let Some(valid) = self.cache.get(&proof.id) {
                        results.push(ProofVerification {
                            proof_id: proof.id,
                            system: system.clone(),
                            valid,
                            from_cache: true,
                            time_ms: 0,
                        });
                        continue;
                    }
                }
                misses.push(proof);
            }

            if misses.is_empty() {
                completed += group.len();
                ctx.report(completed, ordered.len());
                continue;
            }

            let owned: Vec<SingleProof> = misses.iter().map(|p| (*p).clone()).collect();
            let batch_started = Instant::now();
            match provider.verify_batch(&owned).await {
                Some(Ok(verdicts)) => {
                    let time_ms = batch_started.elapsed().as_millis() as u64;
                    for (proof, valid) in misses.iter().zip(verdicts) {
                        if self.config.enable_cache {
                            self.cache.insert(proof.id, valid);
                        }
                        results.push(ProofVerification {
                            proof_id: proof.id,
                            system: system.clone(),
                            valid,
                            from_cache: false,
                            time_ms,
                        });
                    }
                }
                // No batch path, or it errored: per-proof fallback.
                other => {
                    if let Some(Err(error)) = other {
                        tracing::debug!(system = %system, %error, "batch path failed, falling back");
                    }
                    for proof in &misses {
                        let verdict = call_verifier(
                            &provider,
                            proof,
                            Duration::from_millis(self.config.verification_timeout_ms),
                        )
                        .await?;
                        if self.config.enable_cache {
                            self.cache.insert(proof.id, verdict.valid);
                        }
                        results.push(verdict);
                    }
                }
            }
            completed += group.len();
            ctx.report(completed, ordered.len());
        }
        Ok(results)
    }
}

async fn call_verifier(
    provider: &Arc<dyn ProofProvider>,
    proof: &SingleProof,
    timeout: Duration,
) -> Result<ProofVerification, EngineError> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, provider.verify_proof(proof)).await {
        Ok(Ok(valid)) => Ok(ProofVerification {
            proof_id: proof.id,
            system: proof.system().clone(),
            valid,
            from_cache: false,
            time_ms: started.elapsed().as_millis() as u64,
        }),
        Ok(Err(error)) => Err(error.into_engine(proof.system())),
        Err(_) => Err(EngineError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Link consistency across a composition. `None` for single-proof
/// compositions; otherwise every present link must bind to a proof in
/// the set and verify both ways.
fn check_links(proofs: &[SingleProof]) -> Option<bool> {
    if proofs.len() < 2 {
        return None;
    }
    let by_id: HashMap<Uuid, &SingleProof> = proofs.iter().map(|p| (p.id, p)).collect();
    for proof in proofs {
        if let Some(link) = &proof.link {
            match by_id.get(&link.peer_id) {
                Some(peer) if verify_link(proof, peer) => {}
                _ => return Some(false),
            }
        }
    }
    Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkc_compose::{ComposeOptions, ComposerConfig, ProofComposer};
    use zkc_core::{CompositionStrategy, ProofRequest};
    use zkc_provider::MockProvider;

    fn mock(batch: bool) -> Arc<MockProvider> {
        Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .with_batch_verification(batch)
                .ready(),
        )
    }

    async fn composed_with(provider: Arc<MockProvider>, count: usize) -> ComposedProof {
        let composer = ProofComposer::new(ComposerConfig::default());
        composer.register_provider(provider as Arc<dyn ProofProvider>, 1);
        let mut proofs = Vec::new();
        for i in 0..count {
            let request =
                ProofRequest::new("transfer").with_public_inputs(vec![format!("{i:02x}")]);
            proofs.push(composer.generate_proof(&request).await.proof.unwrap());
        }
        composer
            .compose(proofs, CompositionStrategy::Sequential, ComposeOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn parallel_mode_verifies_all_proofs() {
        let provider = mock(false);
        let composed = composed_with(provider.clone(), 3).await;
        let pipeline = VerificationPipeline::new(VerifyConfig::default());
        let ctx = VerifyContext::from_provider(provider);

        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.mode, VerifyMode::Parallel);
        assert_eq!(report.proof_results.len(), 3);
        let stats = report.per_system[&ProofSystem::new("groth16")];
        assert_eq!((stats.total, stats.valid), (3, 3));
    }

    #[tokio::test]
    async fn batch_mode_used_when_hints_allow() {
        let provider = mock(true);
        let composed = composed_with(provider.clone(), 3).await;
        assert!(composed.verification_hints.supports_batch_verification);

        let pipeline = VerificationPipeline::new(VerifyConfig::default());
        let ctx = VerifyContext::from_provider(provider);
        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.mode, VerifyMode::Batch);
    }

    #[tokio::test]
    async fn strict_mode_stops_at_first_invalid_proof() {
        let provider = mock(false);
        let mut composed = composed_with(provider.clone(), 3).await;
        composed.proofs[0].proof_bytes = "00".repeat(32);

        let pipeline = VerificationPipeline::new(VerifyConfig {
            strict_mode: true,
            enable_cache: false,
            ..VerifyConfig::default()
        });
        let ctx = VerifyContext::from_provider(provider);
        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.mode, VerifyMode::Sequential);
        assert_eq!(report.proof_results.len(), 1, "stopped after the first verdict");
    }

    #[tokio::test]
    async fn repeat_verification_is_served_from_cache() {
        let provider = mock(false);
        let composed = composed_with(provider.clone(), 2).await;
        let pipeline = VerificationPipeline::new(VerifyConfig::default());
        let ctx = VerifyContext::from_provider(provider);

        let first = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(first.proof_results.iter().all(|r| !r.from_cache));
        let second = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(second.proof_results.iter().all(|r| r.from_cache));

        let stats = pipeline.cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_proof_composition_skips_link_validation() {
        let provider = mock(false);
        let composed = composed_with(provider.clone(), 1).await;
        let pipeline = VerificationPipeline::new(VerifyConfig::default());
        let ctx = VerifyContext::from_provider(provider);

        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.links_valid, None);
    }

    #[tokio::test]
    async fn tampered_link_invalidates_the_composition() {
        let provider = mock(false);
        let composer = ProofComposer::new(ComposerConfig::default());
        composer.register_provider(provider.clone() as Arc<dyn ProofProvider>, 1);
        let mut proofs = Vec::new();
        for i in 0..2 {
            let request =
                ProofRequest::new("transfer").with_public_inputs(vec![format!("{i:02x}")]);
            proofs.push(composer.generate_proof(&request).await.proof.unwrap());
        }
        let options = ComposeOptions {
            link_pairs: true,
            ..ComposeOptions::default()
        };
        let mut composed = composer
            .compose(proofs, CompositionStrategy::Sequential, options)
            .await
            .unwrap();
        // Point the first proof's link at a proof outside the set.
        composed.proofs[0].link.as_mut().unwrap().peer_id = Uuid::new_v4();

        let pipeline = VerificationPipeline::new(VerifyConfig::default());
        let ctx = VerifyContext::from_provider(provider);
        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.links_valid, Some(false));
    }

    #[tokio::test]
    async fn receipt_emitted_only_when_configured_and_valid() {
        let provider = mock(false);
        let composed = composed_with(provider.clone(), 2).await;
        let pipeline = VerificationPipeline::new(VerifyConfig {
            generate_verification_proof: true,
            ..VerifyConfig::default()
        });
        let ctx = VerifyContext::from_provider(provider);

        let report = pipeline.verify(&composed, &ctx).await.unwrap();
        assert!(report.valid);
        let receipt = report.receipt.unwrap();
        assert_eq!(receipt.len(), 64);
    }

    #[tokio::test]
    async fn verify_batch_keeps_input_order() {
        let provider = mock(true);
        let composer = ProofComposer::new(ComposerConfig::default());
        composer.register_provider(provider.clone() as Arc<dyn ProofProvider>, 1);
        let mut proofs = Vec::new();
        for i in 0..3 {
            let request =
                ProofRequest::new("transfer").with_public_inputs(vec![format!("{i:02x}")]);
            proofs.push(composer.generate_proof(&request).await.proof.unwrap());
        }
        proofs[1].proof_bytes = "00".repeat(32);

        let pipeline = VerificationPipeline::new(VerifyConfig {
            enable_cache: false,
            ..VerifyConfig::default()
        });
        let ctx = VerifyContext::from_provider(provider);
        let verdicts = pipeline.verify_batch(&proofs, &ctx).await.unwrap();
        assert_eq!(verdicts, vec![true, false, true]);
    }

    #[tokio::test]
    async fn verification_timeout_is_an_error_not_a_verdict() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .with_latency(Duration::from_millis(200))
                .ready(),
        );
        let composer = ProofComposer::new(ComposerConfig::default());
        composer.register_provider(provider.clone() as Arc<dyn ProofProvider>, 1);
        let proof = composer
            .generate_proof(&ProofRequest::new("transfer"))
            .await
            .proof
            .unwrap();

        let pipeline = VerificationPipeline::new(VerifyConfig {
            verification_timeout_ms: 10,
            enable_cache: false,
            ..VerifyConfig::default()
        });
        let ctx = VerifyContext::from_provider(provider);
        let err = pipeline.verify_single(&proof, &ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }
}
