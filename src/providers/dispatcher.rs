// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider call execution: bounded concurrency, per-call timeout, retry
//! with backoff and circuit breaker gating.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{HealthStatus, RetryPolicy, SignatureProvider};
use crate::domain::{ProviderResult, ProviderType, SignatureChallenge};
use crate::metrics::SharedMetrics;
use crate::resilience::CircuitBreakerRegistry;

pub const CIRCUIT_OPEN_ERROR_CODE: &str = "CIRCUIT_OPEN";
pub const NOT_CONFIGURED_ERROR_CODE: &str = "PROVIDER_NOT_CONFIGURED";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            max_concurrency: 32,
        }
    }
}

pub struct ProviderDispatcher {
    providers: HashMap<ProviderType, Arc<dyn SignatureProvider>>,
    breakers: Arc<CircuitBreakerRegistry>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
    metrics: SharedMetrics,
}

impl ProviderDispatcher {
    pub fn new(
        config: DispatcherConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            breakers,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            metrics,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SignatureProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    pub fn providers(&self) -> Vec<ProviderType> {
        let mut providers: Vec<_> = self.providers.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Send `challenge` through its provider. Never fails: every outcome,
    /// including an open breaker or a missing provider, is a `ProviderResult`.
    pub async fn dispatch(&self, challenge: &SignatureChallenge, recipient: &str) -> ProviderResult {
        let provider_type = challenge.provider();
        let label = provider_type.as_str();
        let Some(provider) = self.providers.get(&provider_type) else {
            return ProviderResult::failure(
                NOT_CONFIGURED_ERROR_CODE,
                format!("no {provider_type} provider configured"),
            );
        };

        let max_attempts = self.config.retry.max_attempts();
        let mut last = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.metrics.provider_retry(label);
            }

            let result = {
                let _permit = match self.permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ProviderResult::failure("DISPATCHER_CLOSED", "dispatcher shut down");
                    }
                };

                if !self.breakers.try_acquire(provider_type) {
                    debug!(provider = %provider_type, attempt, "Breaker rejected provider call");
                    return ProviderResult::failure(
                        CIRCUIT_OPEN_ERROR_CODE,
                        format!("circuit breaker for {provider_type} is open"),
                    );
                }

                self.call_once(provider.as_ref(), challenge, recipient).await
            };

            self.breakers.record_result(provider_type, result.is_success());

            if result.is_success() {
                if attempt > 1 {
                    self.metrics.provider_retry_succeeded(label);
                    info!(
                        provider = %provider_type,
                        challenge_id = %challenge.id(),
                        attempt,
                        "Provider call succeeded after retry"
                    );
                    return ProviderResult::success_after_retry(
                        result.provider_challenge_id().unwrap_or_default(),
                        result.provider_proof().unwrap_or_default(),
                        attempt,
                    );
                }
                return result;
            }

            if result.is_permanent_failure() {
                warn!(
                    provider = %provider_type,
                    challenge_id = %challenge.id(),
                    error_code = ?result.error_code(),
                    "Provider reported a permanent failure"
                );
                return result;
            }

            warn!(
                provider = %provider_type,
                challenge_id = %challenge.id(),
                attempt,
                max_attempts,
                error_code = ?result.error_code(),
                timed_out = result.timed_out(),
                "Provider call failed"
            );

            if attempt < max_attempts {
                let delay = self.config.retry.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            last = Some(result);
        }

        let last = last.unwrap_or_else(|| ProviderResult::failure("UNKNOWN", "no attempt made"));
        if max_attempts > 1 {
            self.metrics.provider_retry_exhausted(label);
            ProviderResult::retry_exhausted(&last, max_attempts)
        } else {
            last
        }
    }

    async fn call_once(
        &self,
        provider: &dyn SignatureProvider,
        challenge: &SignatureChallenge,
        recipient: &str,
    ) -> ProviderResult {
        let label = provider.provider_type().as_str();
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.call_timeout,
            provider.send_challenge(challenge, recipient),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.metrics.provider_timeout(label);
                ProviderResult::timeout(self.config.call_timeout)
            }
        };

        let outcome = if result.is_success() {
            "success"
        } else if result.timed_out() {
            "timeout"
        } else {
            "failure"
        };
        self.metrics
            .observe_provider_call(label, outcome, started.elapsed().as_secs_f64());
        result
    }

    /// Health of every registered provider, checked concurrently.
    pub async fn health_report(&self) -> Vec<HealthStatus> {
        let limit = self.config.call_timeout;
        let mut checks = JoinSet::new();
        for (provider_type, provider) in &self.providers {
            let provider = Arc::clone(provider);
            let provider_type = *provider_type;
            checks.spawn(async move {
                match tokio::time::timeout(limit, provider.health_check()).await {
                    Ok(status) => status,
                    Err(_) => HealthStatus::down(
                        provider_type,
                        format!("health check exceeded {} ms", limit.as_millis()),
                    ),
                }
            });
        }

        let mut report = Vec::with_capacity(self.providers.len());
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(status) => report.push(status),
                Err(e) => warn!(error = %e, "Health check task failed"),
            }
        }
        report.sort_by_key(|s| s.provider.as_str());
        report
    }
}
