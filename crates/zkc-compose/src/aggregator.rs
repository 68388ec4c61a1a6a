//! # Aggregation Primitives
//!
//! Strategy-level verification and folding over a provider lookup:
//! sequential, parallel, and batch-grouped verification with retry on
//! transient verifier errors, cross-proof link creation and checking,
//! and the bottom-up recursive fold scaffold.
//!
//! Everything here is a free function over an [`AggregationContext`];
//! the composer drives these, and so can callers that manage their own
//! provider set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use uuid::Uuid;

use zkc_core::{
    sha256_hex, CancellationToken, EngineError, ProofLink, ProofMetadata, ProofSystem, SingleProof,
};
use zkc_provider::ProofProvider;

const LINK_DOMAIN: &[u8] = b"zkc-proof-link-v1";
const FOLD_DOMAIN: &[u8] = b"zkc-recursive-fold-v1";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Retry policy for verifier errors. An invalid proof is never retried;
/// only `Err` outcomes (verification could not be performed) are.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Exponential delay growth; linear when false.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.base_delay * 2u32.saturating_pow(attempt.min(16))
        } else {
            self.base_delay * attempt.max(1)
        }
    }
}

/// Progress notification delivered after each verified proof, or after
/// each fold depth during recursive aggregation.
#[derive(Debug, Clone, Copy)]
pub struct AggregationProgress {
    pub completed: usize,
    pub total: usize,
    /// Fold depth, for recursive aggregation only.
    pub depth: Option<u32>,
}

type Lookup = Arc<dyn Fn(&ProofSystem) -> Option<Arc<dyn ProofProvider>> + Send + Sync>;
type ProgressFn = Arc<dyn Fn(AggregationProgress) + Send + Sync>;

/// Shared inputs for one aggregation run.
#[derive(Clone)]
pub struct AggregationContext {
    lookup: Lookup,
    on_progress: Option<ProgressFn>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl AggregationContext {
    pub fn new(
        lookup: impl Fn(&ProofSystem) -> Option<Arc<dyn ProofProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            lookup: Arc::new(lookup),
            on_progress: None,
            cancel: CancellationToken::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_progress(
        mut self,
        on_progress: impl Fn(AggregationProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn provider_for(&self, system: &ProofSystem) -> Result<Arc<dyn ProofProvider>, EngineError> {
        (self.lookup)(system)
            .ok_or_else(|| EngineError::Composition(format!("no provider registered for {system}")))
    }

    fn report(&self, progress: AggregationProgress) {
        if let Some(cb) = &self.on_progress {
            cb(progress);
        }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify one proof, retrying verifier errors per `policy`.
pub async fn verify_with_retry(
    provider: &Arc<dyn ProofProvider>,
    proof: &SingleProof,
    policy: &RetryPolicy,
) -> Result<bool, EngineError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.verify_proof(proof).await {
            Ok(valid) => return Ok(valid),
            Err(error) if attempt < policy.max_attempts => {
                tracing::debug!(
                    proof_id = %proof.id,
                    attempt,
                    %error,
                    "verifier error, retrying"
                );
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            Err(error) => return Err(error.into_engine(proof.system())),
        }
    }
}

fn invalid(proof: &SingleProof) -> EngineError {
    EngineError::Composition(format!(
        "proof {} ({}) failed verification",
        proof.id,
        proof.system()
    ))
}

/// Verify each proof in array order; the first invalid proof fails the
/// whole run.
pub async fn verify_sequential(
    proofs: &[SingleProof],
    ctx: &AggregationContext,
) -> Result<(), EngineError> {
    for (index, proof) in proofs.iter().enumerate() {
        ctx.cancel.check()?;
        let provider = ctx.provider_for(proof.system())?;
        if !verify_with_retry(&provider, proof, &ctx.retry).await? {
            return Err(invalid(proof));
        }
        ctx.report(AggregationProgress {
            completed: index + 1,
            total: proofs.len(),
            depth: None,
        });
    }
    Ok(())
}

/// Verify all proofs concurrently. Completion order is not defined; any
/// invalid proof fails the run.
pub async fn verify_parallel(
    proofs: &[SingleProof],
    ctx: &AggregationContext,
) -> Result<(), EngineError> {
    // Resolve providers up front so a missing registration fails before
    // any verification is started.
    let mut set: JoinSet<Result<(), EngineError>> = JoinSet::new();
    for proof in proofs {
        let provider = ctx.provider_for(proof.system())?;
        let proof = proof.clone();
        let retry = ctx.retry;
        set.spawn(async move {
            if verify_with_retry(&provider, &proof, &retry).await? {
                Ok(())
            } else {
                Err(invalid(&proof))
            }
        });
    }

    let total = proofs.len();
    let mut completed = 0usize;
    while let Some(joined) = set.join_next().await {
        ctx.cancel.check()?;
        joined.map_err(|e| EngineError::Composition(format!("verification task failed: {e}")))??;
        completed += 1;
        ctx.report(AggregationProgress {
            completed,
            total,
            depth: None,
        });
    }
    Ok(())
}

/// Group proofs by system and use the provider's batch path where it
/// has one, falling back to per-proof verification otherwise.
///
/// Unlike the sequential and parallel paths, an invalid proof does not
/// abort the run: the returned vector carries one verdict per input
/// proof, in input order, so callers can keep the valid subset. `Err`
/// is reserved for infrastructure failures (missing provider, verifier
/// errors after retries, cancellation).
pub async fn verify_batch_grouped(
    proofs: &[SingleProof],
    ctx: &AggregationContext,
) -> Result<Vec<bool>, EngineError> {
    // Group indices by system, preserving first-seen order.
    let mut order: Vec<ProofSystem> = Vec::new();
    let mut groups: HashMap<ProofSystem, Vec<(usize, &SingleProof)>> = HashMap::new();
    for (index, proof) in proofs.iter().enumerate() {
        let entry = groups.entry(proof.system().clone()).or_default();
        if entry.is_empty() {
            order.push(proof.system().clone());
        }
        entry.push((index, proof));
    }

    let total = proofs.len();
    let mut completed = 0usize;
    let mut verdicts = vec![false; total];
    for system in order {
        ctx.cancel.check()?;
        let provider = ctx.provider_for(&system)?;
        let group = &groups[&system];
        let owned: Vec<SingleProof> = group.iter().map(|(_, p)| (*p).clone()).collect();

        match provider.verify_batch(&owned).await {
            Some(Ok(results)) => {
                for ((index, proof), valid) in group.iter().zip(results) {
                    if !valid {
                        tracing::debug!(proof_id = %proof.id, system = %system, "batch verdict: invalid");
                    }
                    verdicts[*index] = valid;
                }
            }
            // Batch path errored or does not exist: per-proof fallback.
            Some(Err(error)) => {
                tracing::debug!(system = %system, %error, "batch verification failed, falling back");
                for (index, proof) in group {
                    verdicts[*index] = verify_with_retry(&provider, proof, &ctx.retry).await?;
                }
            }
            None => {
                for (index, proof) in group {
                    verdicts[*index] = verify_with_retry(&provider, proof, &ctx.retry).await?;
                }
            }
        }

        completed += group.len();
        ctx.report(AggregationProgress {
            completed,
            total,
            depth: None,
        });
    }
    Ok(verdicts)
}

// ---------------------------------------------------------------------------
// Cross-proof links
// ---------------------------------------------------------------------------

fn link_hash(a: &SingleProof, b: &SingleProof) -> String {
    sha256_hex(&[
        LINK_DOMAIN,
        a.id.as_bytes(),
        a.system().as_str().as_bytes(),
        b.id.as_bytes(),
        b.system().as_str().as_bytes(),
    ])
}

/// Bind two proofs to each other with a shared link hash. The hash is
/// an identity binding, not a cryptographic commitment.
pub fn link_proofs(a: &mut SingleProof, b: &mut SingleProof) {
    let hash = link_hash(a, b);
    a.link = Some(ProofLink {
        peer_id: b.id,
        hash: hash.clone(),
    });
    b.link = Some(ProofLink { peer_id: a.id, hash });
}

/// Whether `a` and `b` carry a consistent mutual link.
pub fn verify_link(a: &SingleProof, b: &SingleProof) -> bool {
    match (&a.link, &b.link) {
        (Some(la), Some(lb)) => {
            let expected = link_hash(a, b);
            la.peer_id == b.id && lb.peer_id == a.id && la.hash == expected && lb.hash == expected
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Recursive fold scaffold
// ---------------------------------------------------------------------------

/// Pair proofs bottom-up into placeholder merged proofs until one
/// remains. Requires a `target` provider declaring recursion support.
/// The merged payload is a digest chain, **not** a real proof fold.
pub async fn fold_recursive(
    proofs: Vec<SingleProof>,
    target: &ProofSystem,
    ctx: &AggregationContext,
) -> Result<SingleProof, EngineError> {
    let provider = ctx.provider_for(target)?;
    if !provider.capabilities().supports_recursion {
        return Err(EngineError::Composition(format!(
            "provider for {target} does not support recursion"
        )));
    }
    if proofs.is_empty() {
        return Err(EngineError::Validation(
            "cannot fold an empty proof list".to_string(),
        ));
    }

    let total = proofs.len();
    let mut layer = proofs;
    let mut depth = 0u32;
    while layer.len() > 1 {
        ctx.cancel.check()?;
        depth += 1;
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        let mut iter = layer.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(merge_pair(&a, &b, target)),
                // Odd proof carries up a level unmerged.
                None => next.push(a),
            }
        }
        layer = next;
        ctx.report(AggregationProgress {
            completed: total - layer.len() + 1,
            total,
            depth: Some(depth),
        });
    }
    // Non-empty input: the loop always leaves exactly one proof.
    layer
        .pop()
        .ok_or_else(|| EngineError::Composition("recursive fold produced no proof".to_string()))
}

fn merge_pair(a: &SingleProof, b: &SingleProof, target: &ProofSystem) -> SingleProof {
    let proof_bytes = sha256_hex(&[
        FOLD_DOMAIN,
        a.proof_bytes.as_bytes(),
        b.proof_bytes.as_bytes(),
    ]);
    let mut public_inputs = a.public_inputs.clone();
    public_inputs.extend(b.public_inputs.iter().cloned());
    let size = proof_bytes.len() / 2;
    SingleProof {
        id: Uuid::new_v4(),
        proof_bytes,
        public_inputs,
        metadata: ProofMetadata {
            system: target.clone(),
            system_version: "fold-1".to_string(),
            circuit_id: "recursive-fold".to_string(),
            circuit_version: "1".to_string(),
            generated_at: Utc::now(),
            proof_size_bytes: size,
            verification_cost: Some(
                a.metadata.verification_cost.unwrap_or(1) + b.metadata.verification_cost.unwrap_or(1),
            ),
        },
        link: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkc_core::ProofRequest;
    use zkc_provider::MockProvider;

    async fn proof_from(provider: &MockProvider, inputs: Vec<String>) -> SingleProof {
        provider
            .generate_proof(&ProofRequest::new("transfer").with_public_inputs(inputs))
            .await
            .proof
            .unwrap()
    }

    fn ctx_for(provider: Arc<dyn ProofProvider>) -> AggregationContext {
        let system = provider.system();
        AggregationContext::new(move |s| {
            if *s == system {
                Some(Arc::clone(&provider))
            } else {
                None
            }
        })
    }

    #[tokio::test]
    async fn sequential_rejects_tampered_proof() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        let good = proof_from(&provider, vec!["0a".into()]).await;
        let mut bad = proof_from(&provider, vec!["0b".into()]).await;
        bad.proof_bytes = "ff".repeat(32);

        let ctx = ctx_for(provider);
        assert!(verify_sequential(&[good.clone()], &ctx).await.is_ok());
        let err = verify_sequential(&[good, bad], &ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Composition(_)));
    }

    #[tokio::test]
    async fn parallel_reports_progress_for_every_proof() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        let mut proofs = Vec::new();
        for i in 0..4 {
            proofs.push(proof_from(&provider, vec![format!("{i:02x}")]).await);
        }
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let ctx = ctx_for(provider).with_progress(move |p| {
            seen2.store(p.completed, Ordering::SeqCst);
        });
        verify_parallel(&proofs, &ctx).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn batch_falls_back_without_a_batch_path() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        assert!(!provider.capabilities().supports_batch_verification);
        let proofs = vec![
            proof_from(&provider, vec!["01".into()]).await,
            proof_from(&provider, vec!["02".into()]).await,
        ];
        let ctx = ctx_for(provider);
        let verdicts = verify_batch_grouped(&proofs, &ctx).await.unwrap();
        assert_eq!(verdicts, vec![true, true]);
    }

    #[tokio::test]
    async fn batch_reports_per_proof_verdicts_instead_of_failing() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .with_batch_verification(true)
                .ready(),
        );
        let good_a = proof_from(&provider, vec!["01".into()]).await;
        let mut bad = proof_from(&provider, vec!["02".into()]).await;
        bad.proof_bytes = "ff".repeat(32);
        let good_b = proof_from(&provider, vec!["03".into()]).await;

        let ctx = ctx_for(provider);
        let verdicts = verify_batch_grouped(&[good_a, bad, good_b], &ctx)
            .await
            .unwrap();
        assert_eq!(verdicts, vec![true, false, true]);
    }

    #[tokio::test]
    async fn missing_provider_is_a_composition_error() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        let proof = proof_from(&provider, vec!["01".into()]).await;
        let ctx = AggregationContext::new(|_| None);
        let err = verify_sequential(&[proof], &ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Composition(_)));
    }

    #[test]
    fn linked_proofs_verify_and_tampering_breaks_the_link() {
        let meta = ProofMetadata {
            system: ProofSystem::new("groth16"),
            system_version: "1".into(),
            circuit_id: "transfer".into(),
            circuit_version: "1".into(),
            generated_at: Utc::now(),
            proof_size_bytes: 32,
            verification_cost: None,
        };
        let mut a = SingleProof {
            id: Uuid::new_v4(),
            proof_bytes: "aa".repeat(32),
            public_inputs: vec![],
            metadata: meta.clone(),
            link: None,
        };
        let mut b = SingleProof {
            id: Uuid::new_v4(),
            proof_bytes: "bb".repeat(32),
            public_inputs: vec![],
            metadata: meta,
            link: None,
        };
        assert!(!verify_link(&a, &b), "unlinked proofs do not verify");

        link_proofs(&mut a, &mut b);
        assert!(verify_link(&a, &b));

        let mut c = b.clone();
        c.id = Uuid::new_v4();
        assert!(!verify_link(&a, &c), "peer id mismatch breaks the link");
    }

    #[tokio::test]
    async fn recursive_fold_requires_recursion_capability() {
        let plain = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        let proofs = vec![
            proof_from(&plain, vec!["01".into()]).await,
            proof_from(&plain, vec!["02".into()]).await,
        ];
        let ctx = ctx_for(plain);
        let err = fold_recursive(proofs, &ProofSystem::new("groth16"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Composition(_)));
    }

    #[tokio::test]
    async fn recursive_fold_collapses_to_one_proof() {
        let recursive = Arc::new(
            MockProvider::new("nova")
                .with_circuit("transfer", "1.0.0")
                .with_recursion(true)
                .ready(),
        );
        let mut proofs = Vec::new();
        for i in 0..3 {
            proofs.push(proof_from(&recursive, vec![format!("{i:02x}")]).await);
        }
        let all_inputs: Vec<String> = proofs
            .iter()
            .flat_map(|p| p.public_inputs.clone())
            .collect();

        let ctx = ctx_for(recursive);
        let folded = fold_recursive(proofs, &ProofSystem::new("nova"), &ctx)
            .await
            .unwrap();
        assert_eq!(folded.metadata.circuit_id, "recursive-fold");
        assert_eq!(folded.public_inputs, all_inputs);
    }
}
