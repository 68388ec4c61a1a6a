//! # Orchestrator
//!
//! Drives a full workflow through a staged state machine:
//!
//! ```text
//! Idle -> Planning -> Initializing -> Generating -> Validating
//!      -> Composing -> { Completed | Failed | Cancelled }
//! ```
//!
//! Planning is side-effect free; the staged run races a deadline and is
//! wrapped in an outer retry loop (distinct from per-provider retries
//! in the resilience layer). The cancellation token is checked between
//! stages and before every retry sleep. Every transition and retry is
//! appended to the audit log, and the outcome is always a structured
//! [`OrchestrationResult`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use zkc_compose::{ComposeOptions, ProofComposer};
use zkc_core::{
    CancellationToken, ComposedProof, CompositionStrategy, EngineError, NoopTelemetry,
    ProofRequest, ProofSystem, SingleProof, TelemetryCollector,
};

use crate::audit::{AuditLog, AuditLogEntry};
use crate::templates::{builtin_templates, WorkflowTemplate};

// ---------------------------------------------------------------------------
// States and configuration
// ---------------------------------------------------------------------------

/// Workflow position. Terminal states are `Completed`, `Failed`, and
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    Idle,
    Planning,
    Initializing,
    Generating,
    Validating,
    Composing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Initializing => "initializing",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Composing => "composing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(tag)
    }
}

/// Outer retry policy for whole-workflow attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Exponential delay with ±25% jitter, capped at `max_delay_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms as f64 * 2f64.powi(attempt.min(16) as i32);
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        let ms = (exponential * (1.0 + jitter)) as u64;
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline per workflow attempt, milliseconds.
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    /// Record state transitions, retries, and outcomes in the audit log.
    pub enable_audit_log: bool,
    /// Treat every request as a dry run unless it says otherwise.
    pub dry_run_default: bool,
    /// Run the cross-proof validator (when one is configured) before
    /// composing.
    pub validate_before_compose: bool,
    /// A validator rejection fails the workflow. When false the
    /// rejection is recorded and the workflow continues.
    pub strict_validation: bool,
    /// Initialize the plan's required providers concurrently instead of
    /// in order.
    pub parallel_init: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            retry: RetryConfig::default(),
            enable_audit_log: true,
            dry_run_default: false,
            validate_before_compose: true,
            strict_validation: true,
            parallel_init: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests, plans, results
// ---------------------------------------------------------------------------

/// What to orchestrate: a named template, or explicit proof requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub requests: Vec<ProofRequest>,
    /// Overrides the template's strategy when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<CompositionStrategy>,
    #[serde(default)]
    pub public_inputs: Vec<String>,
    #[serde(default)]
    pub private_inputs: serde_json::Value,
    /// Plan and validate only; no provider is invoked.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl OrchestrationRequest {
    pub fn from_template(name: impl Into<String>) -> Self {
        Self {
            template: Some(name.into()),
            requests: Vec::new(),
            strategy: None,
            public_inputs: Vec::new(),
            private_inputs: serde_json::Value::Null,
            dry_run: false,
            timeout_ms: None,
        }
    }

    pub fn from_requests(requests: Vec<ProofRequest>, strategy: CompositionStrategy) -> Self {
        Self {
            template: None,
            requests,
            strategy: Some(strategy),
            public_inputs: Vec::new(),
            private_inputs: serde_json::Value::Null,
            dry_run: false,
            timeout_ms: None,
        }
    }

    pub fn with_public_inputs(mut self, inputs: Vec<String>) -> Self {
        self.public_inputs = inputs;
        self
    }

    pub fn with_strategy(mut self, strategy: CompositionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Ephemeral planning output. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionPlan {
    pub id: Uuid,
    pub proof_requests: Vec<ProofRequest>,
    /// Systems the plan requires registrations for.
    pub required_providers: Vec<ProofSystem>,
    pub strategy: CompositionStrategy,
    pub estimated_time_ms: u64,
    pub valid: bool,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Structured outcome of one orchestration. Never a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composed_proof: Option<ComposedProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: OrchestrationState,
    pub retries: u32,
    pub duration_ms: u64,
    /// Audit entries recorded up to this outcome.
    pub audit: Vec<AuditLogEntry>,
}

/// Operator-facing snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub state: OrchestrationState,
    pub audit_entries: usize,
    pub registered_templates: usize,
}

/// Cross-system consistency check run before composing, when configured.
#[async_trait]
pub trait CrossProofValidator: Send + Sync {
    async fn validate(&self, proofs: &[SingleProof]) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Rough per-proof generation estimate used by planning, ms.
const ESTIMATED_MS_PER_REQUEST: u64 = 50;

pub struct Orchestrator {
    composer: Arc<ProofComposer>,
    config: OrchestratorConfig,
    templates: DashMap<String, WorkflowTemplate>,
    audit: AuditLog,
    state: Mutex<OrchestrationState>,
    /// Token of the execution currently in flight, for `cancel`.
    active: Mutex<Option<CancellationToken>>,
    telemetry: Arc<dyn TelemetryCollector>,
    validator: Option<Arc<dyn CrossProofValidator>>,
}

impl Orchestrator {
    pub fn new(composer: Arc<ProofComposer>, config: OrchestratorConfig) -> Self {
        let templates = DashMap::new();
        for template in builtin_templates() {
            templates.insert(template.name.clone(), template);
        }
        Self {
            composer,
            config,
            templates,
            audit: AuditLog::new(),
            state: Mutex::new(OrchestrationState::Idle),
            active: Mutex::new(None),
            telemetry: Arc::new(NoopTelemetry::default()),
            validator: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CrossProofValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Register or replace a template at runtime.
    pub fn register_template(&self, template: WorkflowTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.key().clone()).collect()
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: *self.state.lock(),
            audit_entries: self.audit.len(),
            registered_templates: self.templates.len(),
        }
    }

    /// Cancel the execution currently in flight, if any. Returns whether
    /// a running execution was told to stop.
    pub fn cancel(&self) -> bool {
        match &*self.active.lock() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn record(&self, event: &str, details: serde_json::Value) {
        if self.config.enable_audit_log {
            self.audit.append(event, details);
        }
    }

    fn record_timed(&self, event: &str, details: serde_json::Value, duration_ms: u64) {
        if self.config.enable_audit_log {
            self.audit.append_timed(event, details, Some(duration_ms));
        }
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Build and validate a plan. Side-effect free: no provider is
    /// touched and no state changes.
    pub fn plan(&self, request: &OrchestrationRequest) -> CompositionPlan {
        let mut errors = Vec::new();
        let mut recommendations = Vec::new();

        let (proof_requests, strategy) = match &request.template {
            Some(name) => match self.templates.get(name) {
                Some(template) => {
                    let expanded =
                        template.expand(&request.public_inputs, &request.private_inputs);
                    let strategy = request.strategy.unwrap_or(template.strategy);
                    (expanded, strategy)
                }
                None => {
                    errors.push(format!("unknown template: {name}"));
                    (Vec::new(), request.strategy.unwrap_or(CompositionStrategy::Sequential))
                }
            },
            None => (
                request.requests.clone(),
                request.strategy.unwrap_or(CompositionStrategy::Sequential),
            ),
        };

        if proof_requests.is_empty() && errors.is_empty() {
            errors.push("request contains no proof requests".to_string());
        }

        // Resolve every request so the required set also covers requests
        // that pick their provider by priority.
        let mut required_providers: Vec<ProofSystem> = Vec::new();
        for proof_request in &proof_requests {
            match self.composer.resolve(proof_request) {
                Ok(provider) => {
                    let system = provider.system();
                    if !required_providers.contains(&system) {
                        required_providers.push(system);
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    if !errors.contains(&message) {
                        errors.push(message);
                    }
                }
            }
        }

        if proof_requests.len() >= 4 && strategy == CompositionStrategy::Sequential {
            recommendations.push(
                "parallel or batch strategy may reduce latency for this proof count".to_string(),
            );
        }

        CompositionPlan {
            id: Uuid::new_v4(),
            estimated_time_ms: proof_requests.len() as u64 * ESTIMATED_MS_PER_REQUEST,
            proof_requests,
            required_providers,
            strategy,
            valid: errors.is_empty(),
            errors,
            recommendations,
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a workflow to a terminal state.
    pub async fn execute(
        &self,
        request: &OrchestrationRequest,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let started = Instant::now();

        if request.dry_run || self.config.dry_run_default {
            return self.dry_run(request, started);
        }

        *self.active.lock() = Some(cancel.clone());
        let result = self.execute_attempts(request, cancel, started).await;
        *self.active.lock() = None;
        result
    }

    async fn execute_attempts(
        &self,
        request: &OrchestrationRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> OrchestrationResult {
        let timeout = Duration::from_millis(request.timeout_ms.unwrap_or(self.config.timeout_ms));
        let mut retries = 0u32;
        loop {
            let outcome = tokio::time::timeout(timeout, self.run_stages(request, cancel)).await;
            let error = match outcome {
                Ok(Ok(composed)) => {
                    self.transition(OrchestrationState::Completed);
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.record_timed(
                        "orchestration_completed",
                        json!({ "retries": retries }),
                        duration_ms,
                    );
                    self.telemetry
                        .record("orchestrator.duration_ms", duration_ms as f64);
                    self.telemetry.record("orchestrator.retries", retries as f64);
                    return OrchestrationResult {
                        success: true,
                        composed_proof: Some(composed),
                        error: None,
                        state: OrchestrationState::Completed,
                        retries,
                        duration_ms,
                        audit: self.audit.entries(),
                    };
                }
                Ok(Err(error)) => error,
                Err(_) => EngineError::Timeout(timeout.as_millis() as u64),
            };

            if matches!(error, EngineError::Cancelled) || cancel.is_cancelled() {
                return self.terminal(OrchestrationState::Cancelled, &error, retries, started);
            }
            if error.is_retryable() && retries < self.config.retry.max_retries {
                retries += 1;
                tracing::info!(attempt = retries, %error, "retrying orchestration");
                self.record(
                    "orchestration_retry",
                    json!({ "attempt": retries, "error": error.to_string() }),
                );
                if cancel.check().is_err() {
                    return self.terminal(
                        OrchestrationState::Cancelled,
                        &EngineError::Cancelled,
                        retries,
                        started,
                    );
                }
                tokio::time::sleep(self.config.retry.delay(retries)).await;
                continue;
            }
            return self.terminal(OrchestrationState::Failed, &error, retries, started);
        }
    }

    fn dry_run(&self, request: &OrchestrationRequest, started: Instant) -> OrchestrationResult {
        let plan = self.plan(request);
        self.record(
            "dry_run",
            json!({
                "plan_id": plan.id,
                "valid": plan.valid,
                "errors": plan.errors,
                "recommendations": plan.recommendations,
            }),
        );
        OrchestrationResult {
            success: plan.valid,
            composed_proof: None,
            error: if plan.valid {
                None
            } else {
                Some(plan.errors.join("; "))
            },
            state: OrchestrationState::Completed,
            retries: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            audit: self.audit.entries(),
        }
    }

    async fn run_stages(
        &self,
        request: &OrchestrationRequest,
        cancel: &CancellationToken,
    ) -> Result<ComposedProof, EngineError> {
        self.transition(OrchestrationState::Planning);
        let plan = self.plan(request);
        if !plan.valid {
            return Err(EngineError::Validation(plan.errors.join("; ")));
        }
        cancel.check()?;

        self.transition(OrchestrationState::Initializing);
        self.composer
            .initialize_systems(&plan.required_providers, self.config.parallel_init)
            .await?;
        cancel.check()?;

        self.transition(OrchestrationState::Generating);
        let stage_started = Instant::now();
        let results = self.composer.generate_proofs(&plan.proof_requests).await;
        self.telemetry.record(
            "orchestrator.generation_ms",
            stage_started.elapsed().as_millis() as f64,
        );
        let mut proofs = Vec::with_capacity(results.len());
        for result in results {
            if !result.success {
                return Err(EngineError::provider(
                    result.provider_id,
                    result
                        .error
                        .unwrap_or_else(|| "generation failed".to_string()),
                ));
            }
            let proof = result.proof.ok_or_else(|| {
                EngineError::provider(result.provider_id, "success result without proof")
            })?;
            proofs.push(proof);
        }
        cancel.check()?;

        self.transition(OrchestrationState::Validating);
        if self.config.validate_before_compose {
            if let Some(validator) = &self.validator {
                if let Err(error) = validator.validate(&proofs).await {
                    if self.config.strict_validation {
                        return Err(error);
                    }
                    tracing::warn!(%error, "cross-proof validation rejected, continuing");
                    self.record("validation_warning", json!({ "error": error.to_string() }));
                }
            }
        }
        cancel.check()?;

        self.transition(OrchestrationState::Composing);
        self.composer
            .compose(
                proofs,
                plan.strategy,
                ComposeOptions {
                    cancel: cancel.clone(),
                    ..ComposeOptions::default()
                },
            )
            .await
    }

    fn transition(&self, to: OrchestrationState) {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            *state = to;
            from
        };
        tracing::debug!(%from, %to, "state transition");
        self.record(
            "state_transition",
            json!({ "from": from.to_string(), "to": to.to_string() }),
        );
    }

    fn terminal(
        &self,
        state: OrchestrationState,
        error: &EngineError,
        retries: u32,
        started: Instant,
    ) -> OrchestrationResult {
        self.transition(state);
        let duration_ms = started.elapsed().as_millis() as u64;
        self.record_timed(
            "orchestration_finished",
            json!({ "state": state.to_string(), "error": error.to_string(), "retries": retries }),
            duration_ms,
        );
        self.telemetry
            .record("orchestrator.duration_ms", duration_ms as f64);
        tracing::warn!(%state, %error, retries, "orchestration did not complete");
        OrchestrationResult {
            success: false,
            composed_proof: None,
            error: Some(error.to_string()),
            state,
            retries,
            duration_ms,
            audit: self.audit.entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkc_compose::ComposerConfig;
    use zkc_provider::{MockProvider, ProofProvider};

    fn transfer_provider() -> Arc<MockProvider> {
        Arc::new(
            MockProvider::new("groth16")
                .with_circuit("note-commitment", "1.0.0")
                .with_circuit("nullifier", "1.0.0")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        )
    }

    fn orchestrator_with(provider: Arc<MockProvider>) -> Orchestrator {
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider as Arc<dyn ProofProvider>, 1);
        Orchestrator::new(composer, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn template_workflow_runs_to_completed() {
        let provider = transfer_provider();
        let orchestrator = orchestrator_with(provider.clone());
        let request = OrchestrationRequest::from_template("shielded-transfer")
            .with_public_inputs(vec!["0a".into()]);

        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state, OrchestrationState::Completed);
        assert_eq!(result.retries, 0);
        let composed = result.composed_proof.unwrap();
        assert_eq!(composed.composition_metadata.proof_count, 2);

        let events: Vec<String> = orchestrator
            .audit()
            .entries()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert!(events.contains(&"state_transition".to_string()));
        assert!(events.contains(&"orchestration_completed".to_string()));
    }

    #[tokio::test]
    async fn dry_run_invokes_no_provider_and_never_retries() {
        let provider = transfer_provider();
        let orchestrator = orchestrator_with(provider.clone());
        let request = OrchestrationRequest::from_template("shielded-transfer").dry_run();

        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.retries, 0);
        assert!(result.composed_proof.is_none());
        assert_eq!(provider.generation_count(), 0, "no provider invoked");
    }

    #[tokio::test]
    async fn unknown_template_fails_without_retry() {
        let orchestrator = orchestrator_with(transfer_provider());
        let request = OrchestrationRequest::from_template("no-such-template");

        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.state, OrchestrationState::Failed);
        assert_eq!(result.retries, 0, "validation errors are not retried");
        assert!(result.error.unwrap().contains("unknown template"));
    }

    #[tokio::test]
    async fn transient_provider_failure_is_retried() {
        let provider = transfer_provider();
        provider.fail_next(1);
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider.clone() as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                retry: RetryConfig {
                    max_retries: 2,
                    base_delay_ms: 1,
                    max_delay_ms: 10,
                },
                ..OrchestratorConfig::default()
            },
        );

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.retries, 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_to_cancelled() {
        let orchestrator = orchestrator_with(transfer_provider());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &cancel).await;
        assert!(!result.success);
        assert_eq!(result.state, OrchestrationState::Cancelled);
    }

    #[tokio::test]
    async fn deadline_overrun_reports_timeout() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .with_latency(Duration::from_millis(100))
                .ready(),
        );
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                retry: RetryConfig {
                    max_retries: 0,
                    base_delay_ms: 1,
                    max_delay_ms: 1,
                },
                ..OrchestratorConfig::default()
            },
        );

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        )
        .with_timeout_ms(10);
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.state, OrchestrationState::Failed);
        assert!(result.error.unwrap().contains("timed out"));
    }

    struct RejectAll;

    #[async_trait]
    impl CrossProofValidator for RejectAll {
        async fn validate(&self, _proofs: &[SingleProof]) -> Result<(), EngineError> {
            Err(EngineError::Validation(
                "cross-proof inputs do not match".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn validator_rejection_fails_before_composing() {
        let provider = transfer_provider();
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(composer, OrchestratorConfig::default())
            .with_validator(Arc::new(RejectAll));

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("cross-proof"));
    }

    #[tokio::test]
    async fn only_the_plans_required_providers_are_initialized() {
        let groth = Arc::new(MockProvider::new("groth16").with_circuit("transfer", "1.0.0"));
        let plonk = Arc::new(MockProvider::new("plonk").with_circuit("transfer", "1.0.0"));
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(Arc::clone(&groth) as Arc<dyn ProofProvider>, 2);
        composer.register_provider(Arc::clone(&plonk) as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(composer, OrchestratorConfig::default());

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer").with_system("groth16")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(groth.is_initialized());
        assert!(!plonk.is_initialized(), "unused provider left untouched");
    }

    #[tokio::test]
    async fn cancel_aborts_the_execution_in_flight() {
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .with_latency(Duration::from_millis(100))
                .ready(),
        );
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider as Arc<dyn ProofProvider>, 1);
        let orchestrator = Arc::new(Orchestrator::new(composer, OrchestratorConfig::default()));
        assert!(!orchestrator.cancel(), "nothing in flight yet");

        let task = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let request = OrchestrationRequest::from_requests(
                    vec![ProofRequest::new("transfer")],
                    CompositionStrategy::Sequential,
                );
                orchestrator.execute(&request, &CancellationToken::new()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orchestrator.cancel());

        let result = task.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.state, OrchestrationState::Cancelled);
        assert!(!orchestrator.cancel(), "run is over, nothing left to stop");
    }

    #[tokio::test]
    async fn disabled_audit_log_records_nothing() {
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(transfer_provider() as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                enable_audit_log: false,
                ..OrchestratorConfig::default()
            },
        );

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(orchestrator.audit().is_empty());
        assert!(result.audit.is_empty());
    }

    #[tokio::test]
    async fn dry_run_default_plans_without_invoking_providers() {
        let provider = transfer_provider();
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(provider.clone() as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                dry_run_default: true,
                ..OrchestratorConfig::default()
            },
        );

        let request = OrchestrationRequest::from_template("shielded-transfer");
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success);
        assert!(result.composed_proof.is_none());
        assert_eq!(provider.generation_count(), 0);
    }

    #[tokio::test]
    async fn lenient_validation_records_a_warning_and_continues() {
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(transfer_provider() as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                strict_validation: false,
                ..OrchestratorConfig::default()
            },
        )
        .with_validator(Arc::new(RejectAll));

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        let events: Vec<String> = result.audit.into_iter().map(|e| e.event).collect();
        assert!(events.contains(&"validation_warning".to_string()));
    }

    #[tokio::test]
    async fn validator_is_skipped_when_validation_is_disabled() {
        let composer = Arc::new(ProofComposer::new(ComposerConfig::default()));
        composer.register_provider(transfer_provider() as Arc<dyn ProofProvider>, 1);
        let orchestrator = Orchestrator::new(
            composer,
            OrchestratorConfig {
                validate_before_compose: false,
                ..OrchestratorConfig::default()
            },
        )
        .with_validator(Arc::new(RejectAll));

        let request = OrchestrationRequest::from_requests(
            vec![ProofRequest::new("transfer")],
            CompositionStrategy::Sequential,
        );
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
        let events: Vec<String> = result.audit.into_iter().map(|e| e.event).collect();
        assert!(!events.contains(&"validation_warning".to_string()));
    }

    #[tokio::test]
    async fn custom_templates_register_at_runtime() {
        use crate::templates::{TemplateStep, WorkflowTemplate};
        let orchestrator = orchestrator_with(transfer_provider());
        assert_eq!(orchestrator.template_names().len(), 4);

        orchestrator.register_template(WorkflowTemplate::new(
            "single-transfer",
            "One transfer proof",
            CompositionStrategy::Sequential,
            vec![TemplateStep::new("transfer")],
        ));
        assert_eq!(orchestrator.template_names().len(), 5);

        let request = OrchestrationRequest::from_template("single-transfer");
        let result = orchestrator.execute(&request, &CancellationToken::new()).await;
        assert!(result.success, "{:?}", result.error);
    }
}
