//! # Fallback Executor
//!
//! Drives one logical proof request across backends: try the primary if
//! its breaker allows, record the outcome into the breaker and health
//! tables, then walk the active strategy's candidates until a proof
//! lands, the retry budget is exhausted, or the strategy runs out of
//! candidates. A development-mode mock backend can be installed as a
//! last resort after the strategy gives up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use zkc_core::{
    EngineError, Event, EventBus, ProofRequest, ProofSystem, SingleProof, SwitchReason,
};
use zkc_provider::ProofProvider;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::fallback::FallbackStrategy;
use crate::health::HealthTracker;

/// Fallback behavior for one executor.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub primary: ProofSystem,
    pub fallback_chain: Vec<ProofSystem>,
    /// When false, a primary failure is final — no chain walk.
    pub retry_on_failure: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Deadline per provider call.
    pub call_timeout_ms: u64,
}

impl FallbackConfig {
    pub fn new(primary: impl Into<ProofSystem>) -> Self {
        Self {
            primary: primary.into(),
            fallback_chain: Vec::new(),
            retry_on_failure: true,
            max_retries: 5,
            retry_delay_ms: 100,
            max_delay_ms: 10_000,
            exponential_backoff: false,
            call_timeout_ms: 60_000,
        }
    }

    pub fn with_chain(mut self, chain: Vec<ProofSystem>) -> Self {
        self.fallback_chain = chain;
        self
    }

    fn default_strategy(&self) -> FallbackStrategy {
        if self.exponential_backoff {
            FallbackStrategy::ExponentialBackoff {
                chain: self.fallback_chain.clone(),
                base_delay: Duration::from_millis(self.retry_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            }
        } else {
            FallbackStrategy::Sequential {
                chain: self.fallback_chain.clone(),
                base_delay: Duration::from_millis(self.retry_delay_ms),
            }
        }
    }
}

/// Walks a request across providers until one produces a proof.
pub struct FallbackExecutor {
    config: FallbackConfig,
    strategy: FallbackStrategy,
    providers: HashMap<ProofSystem, Arc<dyn ProofProvider>>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    /// Tried only after the strategy returns no candidate.
    dev_fallback: Option<ProofSystem>,
    bus: EventBus,
}

impl FallbackExecutor {
    pub fn new(config: FallbackConfig, breaker_config: BreakerConfig, bus: EventBus) -> Self {
        let strategy = config.default_strategy();
        Self {
            config,
            strategy,
            providers: HashMap::new(),
            breaker: Arc::new(CircuitBreaker::new(breaker_config, bus.clone())),
            health: Arc::new(HealthTracker::new()),
            dev_fallback: None,
            bus,
        }
    }

    /// Replace the strategy derived from the config.
    pub fn with_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProofProvider>) {
        self.providers.insert(provider.system(), provider);
    }

    /// Install a development-mode last-resort backend.
    pub fn with_dev_fallback(mut self, provider: Arc<dyn ProofProvider>) -> Self {
        let system = provider.system();
        self.providers.insert(system.clone(), provider);
        self.dev_fallback = Some(system);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Drive `request` across backends. Returns the first successful
    /// proof, or the last error once retries or candidates run out.
    pub async fn execute(&self, request: &ProofRequest) -> Result<SingleProof, EngineError> {
        let request_id = Uuid::new_v4();
        self.bus.emit(&Event::FallbackStarted {
            request_id,
            primary: self.config.primary.clone(),
        });

        let mut failed: HashSet<ProofSystem> = HashSet::new();
        let mut current = self.config.primary.clone();
        let mut attempt = 0u32;
        let mut used_dev_fallback = false;
        let mut last_error =
            EngineError::provider(self.config.primary.as_str(), "no provider attempted");

        loop {
            attempt += 1;
            let mut switch_reason = SwitchReason::ProviderFailure;

            if self.breaker.is_allowed(&current) {
                match self.attempt_provider(&current, request, request_id).await {
                    Ok(proof) => {
                        self.bus.emit(&Event::FallbackSucceeded {
                            request_id,
                            system: current.clone(),
                            attempts: attempt,
                        });
                        return Ok(proof);
                    }
                    Err(error) => {
                        if matches!(error, EngineError::Timeout(_)) {
                            switch_reason = SwitchReason::Timeout;
                        }
                        last_error = error;
                    }
                }
            } else {
                tracing::debug!(system = %current, "skipping provider, circuit open");
                switch_reason = SwitchReason::CircuitOpen;
                last_error = EngineError::provider(current.as_str(), "circuit breaker open");
            }

            failed.insert(current.clone());

            let may_retry = self.config.retry_on_failure
                && self.strategy.should_attempt_fallback(
                    &last_error,
                    attempt,
                    self.config.max_retries,
                );
            if !may_retry {
                break;
            }

            let next = self
                .strategy
                .next_provider(&current, &failed, &self.health)
                .or_else(|| {
                    // Strategy is out of candidates; fall back to the
                    // development mock once, if one is installed.
                    self.dev_fallback
                        .clone()
                        .filter(|s| !used_dev_fallback && !failed.contains(s))
                });
            match next {
                Some(next) => {
                    if Some(&next) == self.dev_fallback.as_ref() {
                        used_dev_fallback = true;
                    }
                    self.bus.emit(&Event::FallbackProviderSwitched {
                        request_id,
                        from: current.clone(),
                        to: next.clone(),
                        reason: switch_reason,
                    });
                    tokio::time::sleep(self.strategy.retry_delay(attempt)).await;
                    current = next;
                }
                None => break,
            }
        }

        self.bus.emit(&Event::FallbackExhausted {
            request_id,
            attempts: attempt,
        });
        tracing::warn!(
            primary = %self.config.primary,
            attempts = attempt,
            "fallback exhausted"
        );
        Err(last_error)
    }

    async fn attempt_provider(
        &self,
        system: &ProofSystem,
        request: &ProofRequest,
        request_id: Uuid,
    ) -> Result<SingleProof, EngineError> {
        let provider = match self.providers.get(system) {
            Some(p) => p,
            None => {
                let error = format!("no provider registered for {system}");
                self.health.record_failure(system, &error, 0);
                self.bus.emit(&Event::FallbackProviderFailed {
                    request_id,
                    system: system.clone(),
                    error: error.clone(),
                });
                return Err(EngineError::provider(system.as_str(), error));
            }
        };

        let call_timeout = Duration::from_millis(self.config.call_timeout_ms);
        let started = Instant::now();
        let outcome = tokio::time::timeout(call_timeout, provider.generate_proof(request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (error_message, engine_error) = match outcome {
            Ok(result) if result.success => {
                self.breaker.record_success(system);
                self.health.record_success(system, elapsed_ms);
                let proof = result.proof.ok_or_else(|| {
                    EngineError::provider(system.as_str(), "success result without proof")
                })?;
                return Ok(proof);
            }
            Ok(result) => {
                let message = result
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string());
                let err = EngineError::provider(system.as_str(), &message);
                (message, err)
            }
            Err(_) => {
                let message = format!("provider call timed out after {}ms", call_timeout.as_millis());
                (message, EngineError::Timeout(call_timeout.as_millis() as u64))
            }
        };

        self.breaker.record_failure(system);
        self.health.record_failure(system, &error_message, elapsed_ms);
        self.bus.emit(&Event::FallbackProviderFailed {
            request_id,
            system: system.clone(),
            error: error_message,
        });
        Err(engine_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use zkc_provider::MockProvider;

    fn failing(tag: &str) -> Arc<dyn ProofProvider> {
        let p = MockProvider::new(tag).with_circuit("transfer", "1.0.0").ready();
        p.set_always_fail(true);
        Arc::new(p)
    }

    fn working(tag: &str) -> Arc<dyn ProofProvider> {
        Arc::new(MockProvider::new(tag).with_circuit("transfer", "1.0.0").ready())
    }

    fn request() -> ProofRequest {
        ProofRequest::new("transfer").with_public_inputs(vec!["0a".into()])
    }

    fn config() -> FallbackConfig {
        let mut c = FallbackConfig::new("a").with_chain(vec![
            ProofSystem::new("b"),
            ProofSystem::new("c"),
        ]);
        c.retry_delay_ms = 1;
        c.max_retries = 5;
        c
    }

    #[tokio::test]
    async fn walks_chain_until_success_with_ordered_events() {
        let bus = EventBus::new();
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = bus.subscribe(move |e| sink.lock().push(e.clone()));

        let mut executor = FallbackExecutor::new(config(), BreakerConfig::default(), bus);
        executor.register_provider(failing("a"));
        executor.register_provider(failing("b"));
        executor.register_provider(working("c"));

        let proof = executor.execute(&request()).await.unwrap();
        assert_eq!(proof.metadata.system, ProofSystem::new("c"));

        let log = events.lock();
        let names: Vec<&'static str> = log
            .iter()
            .filter_map(|e| match e {
                Event::FallbackStarted { .. } => Some("started"),
                Event::FallbackProviderFailed { .. } => Some("failed"),
                Event::FallbackProviderSwitched { .. } => Some("switched"),
                Event::FallbackSucceeded { .. } => Some("success"),
                Event::FallbackExhausted { .. } => Some("exhausted"),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "started", "failed", "switched", "failed", "switched", "success"
            ]
        );
        // First failure is the primary.
        match &log[1] {
            Event::FallbackProviderFailed { system, .. } => {
                assert_eq!(system, &ProofSystem::new("a"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error() {
        let bus = EventBus::new();
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = bus.subscribe(move |e| sink.lock().push(e.clone()));

        let mut executor = FallbackExecutor::new(config(), BreakerConfig::default(), bus);
        executor.register_provider(failing("a"));
        executor.register_provider(failing("b"));
        executor.register_provider(failing("c"));

        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, Event::FallbackExhausted { .. })));
    }

    #[tokio::test]
    async fn no_chain_walk_when_retry_disabled() {
        let mut cfg = config();
        cfg.retry_on_failure = false;
        let mut executor =
            FallbackExecutor::new(cfg, BreakerConfig::default(), EventBus::new());
        executor.register_provider(failing("a"));
        executor.register_provider(working("b"));

        assert!(executor.execute(&request()).await.is_err());
    }

    #[tokio::test]
    async fn dev_fallback_used_after_chain_exhausted() {
        let mut cfg = FallbackConfig::new("a").with_chain(vec![]);
        cfg.retry_delay_ms = 1;
        let mut executor =
            FallbackExecutor::new(cfg, BreakerConfig::default(), EventBus::new());
        executor.register_provider(failing("a"));
        let executor = executor.with_dev_fallback(working("dev-mock"));

        let proof = executor.execute(&request()).await.unwrap();
        assert_eq!(proof.metadata.system, ProofSystem::new("dev-mock"));
    }

    #[tokio::test]
    async fn open_breaker_skips_provider_without_calling_it() {
        let cfg = {
            let mut c = FallbackConfig::new("a").with_chain(vec![ProofSystem::new("b")]);
            c.retry_delay_ms = 1;
            c
        };
        let breaker_cfg = BreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 60_000,
            half_open_success_threshold: 1,
        };
        let mut executor = FallbackExecutor::new(cfg, breaker_cfg, EventBus::new());

        let primary = Arc::new(MockProvider::new("a").with_circuit("transfer", "1.0.0").ready());
        primary.set_always_fail(true);
        let primary_handle = Arc::clone(&primary);
        executor.register_provider(primary);
        executor.register_provider(working("b"));

        // First run trips the breaker for "a".
        executor.execute(&request()).await.unwrap();
        let calls_after_first = primary_handle.generation_count();
        assert_eq!(calls_after_first, 1);

        // Second run: breaker open, primary never called again.
        executor.execute(&request()).await.unwrap();
        assert_eq!(primary_handle.generation_count(), calls_after_first);
    }
}
