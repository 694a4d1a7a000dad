//! # Provider retry harness
//!
//! ## Responsibility
//! Wrap one [`Provider`] with bounded retries, a per-call timeout, a shared
//! rate limit, cost accounting, and latency metrics. Route agent roles to
//! harnesses through a [`ProviderPool`].
//!
//! ## Guarantees
//! - Fatal and content-policy errors are returned after exactly one attempt
//! - Transient, rate-limited, and timed-out calls are retried with
//!   exponential backoff plus jitter up to the configured attempt count
//! - A provider `retry_after` hint pauses every caller of that provider
//! - Every attempt is bounded by the provider's timeout
//!
//! ## NOT Responsible For
//! - Parsing or validating completion text (see: `agent`)

use super::{CostLedger, Provider, ProviderError, ProviderRequest, ProviderResponse};
use crate::config::{EditorialConfig, ProviderConfig, ProviderKind, ResilienceConfig, RoleRouting};
use crate::resilience::{RateLimiter, RetryDecision, RetryFailure, RetryPolicy};
use crate::OrchestratorError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry/timeout/rate-limit wrapper around one provider.
pub struct ProviderHarness {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    timeout: Duration,
    limiter: RateLimiter,
    ledger: Arc<CostLedger>,
    max_tokens: u32,
    temperature: f32,
    context_window_tokens: usize,
    max_retry_after: Duration,
}

impl ProviderHarness {
    /// Wrap `provider` with `policy` and no rate limit.
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            timeout: Duration::from_secs(60),
            limiter: RateLimiter::new(Duration::from_secs(60)),
            ledger: Arc::new(CostLedger::new()),
            max_tokens: 2048,
            temperature: 0.4,
            context_window_tokens: 128_000,
            max_retry_after: Duration::from_secs(60),
        }
    }

    /// Build a harness for a configured provider.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        config: &ProviderConfig,
        resilience: &ResilienceConfig,
        limiter: RateLimiter,
        ledger: Arc<CostLedger>,
    ) -> Self {
        limiter.set_limit(provider.id(), config.requests_per_minute as usize);
        ledger.set_rates(provider.id(), config.cost_per_1k_input, config.cost_per_1k_output);
        let policy = RetryPolicy::exponential_capped(
            resilience.retry_attempts,
            Duration::from_millis(resilience.retry_base_ms),
            Duration::from_millis(resilience.retry_max_ms),
        )
        .with_jitter();
        Self {
            provider,
            policy,
            timeout: config.timeout(),
            limiter,
            ledger,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            context_window_tokens: config.context_window_tokens,
            max_retry_after: resilience.run_timeout(),
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap provider `retry_after` hints at `cap`.
    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    /// Provider id.
    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Model id.
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Context window of the underlying model.
    pub fn context_window_tokens(&self) -> usize {
        self.context_window_tokens
    }

    /// Cost ledger this harness records into.
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Request with this provider's default sampling settings.
    pub fn request(&self, system_prompt: &str, user_prompt: &str) -> ProviderRequest {
        ProviderRequest::new(system_prompt, user_prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }

    /// Call the provider with retries.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ProviderError`] of the last attempt together
    /// with the number of attempts made.
    pub async fn call(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, RetryFailure<ProviderError>> {
        let started = Instant::now();
        let provider_id = self.provider.id().to_string();
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let key = provider_id.as_str();

        let result = self
            .policy
            .retry_classified(
                || async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    self.limiter.acquire(key).await;
                    match tokio::time::timeout(self.timeout, self.provider.generate(request)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(self.timeout)),
                    }
                },
                |e| self.classify(e),
            )
            .await;

        let elapsed = started.elapsed();
        crate::metrics::record_provider_latency(&provider_id, elapsed);
        let made = attempts.load(Ordering::Relaxed);
        for _ in 1..made {
            crate::metrics::inc_provider_retry(&provider_id);
        }

        match result {
            Ok(completion) => {
                self.ledger.record(&provider_id, completion.usage);
                debug!(
                    provider = %provider_id,
                    attempts = made,
                    latency_ms = elapsed.as_millis() as u64,
                    output_tokens = completion.usage.output_tokens,
                    "provider call succeeded"
                );
                Ok(ProviderResponse {
                    provider_id,
                    model_id: request
                        .model_id
                        .clone()
                        .unwrap_or_else(|| self.provider.model().to_string()),
                    text: completion.text,
                    usage: completion.usage,
                    latency: elapsed,
                    attempts: made,
                })
            }
            Err(failure) => {
                warn!(
                    provider = %provider_id,
                    attempts = failure.attempts,
                    error_kind = failure.error.kind(),
                    error = %failure.error,
                    "provider call failed"
                );
                Err(failure)
            }
        }
    }

    fn classify(&self, error: &ProviderError) -> RetryDecision {
        match error {
            ProviderError::RateLimited {
                retry_after: Some(hint),
                ..
            } => {
                let hint = (*hint).min(self.max_retry_after);
                self.limiter.defer(self.provider.id(), hint);
                RetryDecision::RetryAfter(hint)
            }
            e if e.is_retryable() => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        }
    }
}

/// Role-routed set of harnesses built from configuration.
pub struct ProviderPool {
    harnesses: HashMap<String, Arc<ProviderHarness>>,
    routing: RoleRouting,
    ledger: Arc<CostLedger>,
}

impl ProviderPool {
    /// Pool that sends every role to `harness`.
    pub fn single(harness: ProviderHarness) -> Self {
        let id = harness.provider_id().to_string();
        let ledger = Arc::clone(&harness.ledger);
        let mut harnesses = HashMap::new();
        harnesses.insert(id.clone(), Arc::new(harness));
        Self {
            harnesses,
            routing: RoleRouting {
                default_provider: id,
                overrides: Default::default(),
            },
            ledger,
        }
    }

    /// Empty pool with the given routing table.
    pub fn new(routing: RoleRouting, ledger: Arc<CostLedger>) -> Self {
        Self {
            harnesses: HashMap::new(),
            routing,
            ledger,
        }
    }

    /// Add (or replace) a harness under its provider id.
    pub fn insert(&mut self, harness: ProviderHarness) {
        self.harnesses
            .insert(harness.provider_id().to_string(), Arc::new(harness));
    }

    /// Build every configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] when an HTTP provider's API
    /// key variable is unset.
    pub fn from_config(config: &EditorialConfig) -> Result<Self, OrchestratorError> {
        let ledger = Arc::new(CostLedger::new());
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let mut pool = Self::new(config.roles.clone(), Arc::clone(&ledger));

        for (id, pc) in &config.providers {
            let provider: Arc<dyn Provider> = match pc.kind {
                ProviderKind::OpenAi => Arc::new(super::OpenAiProvider::from_config(id, pc)?),
                ProviderKind::Anthropic => {
                    Arc::new(super::AnthropicProvider::from_config(id, pc)?)
                }
                ProviderKind::Simulated => {
                    Arc::new(super::SimulatedProvider::new(id.clone(), pc.model.clone()))
                }
            };
            pool.insert(ProviderHarness::from_config(
                provider,
                pc,
                &config.resilience,
                limiter.clone(),
                Arc::clone(&ledger),
            ));
        }
        Ok(pool)
    }

    /// Harness serving `role_tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Fatal`] when the routed provider is not in the pool.
    pub fn for_role(&self, role_tag: &str) -> Result<Arc<ProviderHarness>, ProviderError> {
        let id = self.routing.provider_for(role_tag);
        self.harnesses
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Fatal(format!("no provider '{id}' for role {role_tag}")))
    }

    /// Shared cost ledger.
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }
}
