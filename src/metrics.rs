// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Prometheus Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `signature_requests_created_total` | Counter | |
//! | `signature_requests_completed_total` | Counter | `channel` |
//! | `signature_requests_aborted_total` | Counter | `reason` |
//! | `signature_requests_expired_total` | Counter | |
//! | `signature_challenges_sent_total` | Counter | `channel` |
//! | `signature_challenges_completed_total` | Counter | `channel` |
//! | `signature_challenges_failed_total` | Counter | `channel` |
//! | `provider_retry_attempts_total` | Counter | `provider` |
//! | `provider_retry_success_total` | Counter | `provider` |
//! | `provider_retry_exhausted_total` | Counter | `provider` |
//! | `provider_timeouts_total` | Counter | `provider` |
//! | `provider_call_duration_seconds` | Histogram | `provider`, `outcome` |
//! | `circuit_breaker_transitions_total` | Counter | `provider`, `state` |
//! | `circuit_breaker_state` | Gauge | `provider` |
//! | `degraded_mode_triggers_total` | Counter | |
//! | `degraded_mode_active` | Gauge | |
//! | `routing_fallback_total` | Counter | `from`, `to` |
//! | `outbox_pending_events` | Gauge | |
//!
//! Every service owns an `Arc<Metrics>` built from its own [`Registry`], so
//! tests never share counters.

use std::sync::Arc;

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Upper bounds for provider call latency (seconds).
pub const PROVIDER_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

pub type SharedMetrics = Arc<Metrics>;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    requests_created: Counter,
    requests_completed: CounterVec,
    requests_aborted: CounterVec,
    requests_expired: Counter,

    challenges_sent: CounterVec,
    challenges_completed: CounterVec,
    challenges_failed: CounterVec,

    provider_retry_attempts: CounterVec,
    provider_retry_success: CounterVec,
    provider_retry_exhausted: CounterVec,
    provider_timeouts: CounterVec,
    provider_call_duration: HistogramVec,

    circuit_transitions: CounterVec,
    circuit_state: GaugeVec,

    degraded_triggers: Counter,
    degraded_active: Gauge,

    fallback_total: CounterVec,
    outbox_pending: Gauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> MetricsResult<Counter> {
    let metric = Counter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> MetricsResult<CounterVec> {
    let metric = CounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> MetricsResult<Gauge> {
    let metric = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl Metrics {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();

        let provider_call_duration = HistogramVec::new(
            HistogramOpts::new(
                "provider_call_duration_seconds",
                "Latency of a single provider call attempt",
            )
            .buckets(PROVIDER_LATENCY_BUCKETS.to_vec()),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(provider_call_duration.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Breaker state per provider (0 closed, 1 open, 2 half-open, 3 forced open)",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            requests_created: counter(&registry, "signature_requests_created_total", "Signature requests created")?,
            requests_completed: counter_vec(
                &registry,
                "signature_requests_completed_total",
                "Signature requests signed, by completing channel",
                &["channel"],
            )?,
            requests_aborted: counter_vec(
                &registry,
                "signature_requests_aborted_total",
                "Signature requests aborted, by reason",
                &["reason"],
            )?,
            requests_expired: counter(&registry, "signature_requests_expired_total", "Signature requests expired")?,
            challenges_sent: counter_vec(
                &registry,
                "signature_challenges_sent_total",
                "Challenges delivered to a provider",
                &["channel"],
            )?,
            challenges_completed: counter_vec(
                &registry,
                "signature_challenges_completed_total",
                "Challenges verified by the customer",
                &["channel"],
            )?,
            challenges_failed: counter_vec(
                &registry,
                "signature_challenges_failed_total",
                "Challenges whose delivery failed",
                &["channel"],
            )?,
            provider_retry_attempts: counter_vec(
                &registry,
                "provider_retry_attempts_total",
                "Provider call retries (attempts after the first)",
                &["provider"],
            )?,
            provider_retry_success: counter_vec(
                &registry,
                "provider_retry_success_total",
                "Provider calls that succeeded after at least one retry",
                &["provider"],
            )?,
            provider_retry_exhausted: counter_vec(
                &registry,
                "provider_retry_exhausted_total",
                "Provider calls that failed on every attempt",
                &["provider"],
            )?,
            provider_timeouts: counter_vec(
                &registry,
                "provider_timeouts_total",
                "Provider call attempts that hit the time limit",
                &["provider"],
            )?,
            provider_call_duration,
            circuit_transitions: counter_vec(
                &registry,
                "circuit_breaker_transitions_total",
                "Circuit breaker state transitions",
                &["provider", "state"],
            )?,
            circuit_state,
            degraded_triggers: counter(&registry, "degraded_mode_triggers_total", "Entries into degraded mode")?,
            degraded_active: gauge(&registry, "degraded_mode_active", "1 while the system is degraded")?,
            fallback_total: counter_vec(
                &registry,
                "routing_fallback_total",
                "Channel fallbacks taken by the routing engine",
                &["from", "to"],
            )?,
            outbox_pending: gauge(&registry, "outbox_pending_events", "Outbox events not yet relayed")?,
            registry,
        })
    }

    pub fn shared() -> MetricsResult<SharedMetrics> {
        Ok(Arc::new(Self::new()?))
    }

    // ========================================================================
    // Signature lifecycle
    // ========================================================================

    pub fn request_created(&self) {
        self.requests_created.inc();
    }

    pub fn request_completed(&self, channel: &str) {
        self.requests_completed.with_label_values(&[channel]).inc();
    }

    pub fn request_aborted(&self, reason: &str) {
        self.requests_aborted.with_label_values(&[reason]).inc();
    }

    pub fn request_expired(&self) {
        self.requests_expired.inc();
    }

    pub fn challenge_sent(&self, channel: &str) {
        self.challenges_sent.with_label_values(&[channel]).inc();
    }

    pub fn challenge_completed(&self, channel: &str) {
        self.challenges_completed.with_label_values(&[channel]).inc();
    }

    pub fn challenge_failed(&self, channel: &str) {
        self.challenges_failed.with_label_values(&[channel]).inc();
    }

    // ========================================================================
    // Provider calls
    // ========================================================================

    pub fn provider_retry(&self, provider: &str) {
        self.provider_retry_attempts.with_label_values(&[provider]).inc();
    }

    pub fn provider_retry_succeeded(&self, provider: &str) {
        self.provider_retry_success.with_label_values(&[provider]).inc();
    }

    pub fn provider_retry_exhausted(&self, provider: &str) {
        self.provider_retry_exhausted.with_label_values(&[provider]).inc();
    }

    pub fn provider_timeout(&self, provider: &str) {
        self.provider_timeouts.with_label_values(&[provider]).inc();
    }

    pub fn observe_provider_call(&self, provider: &str, outcome: &str, seconds: f64) {
        self.provider_call_duration
            .with_label_values(&[provider, outcome])
            .observe(seconds);
    }

    // ========================================================================
    // Resilience
    // ========================================================================

    pub fn circuit_transition(&self, provider: &str, state: &str, state_code: u8) {
        self.circuit_transitions.with_label_values(&[provider, state]).inc();
        self.circuit_state
            .with_label_values(&[provider])
            .set(f64::from(state_code));
    }

    pub fn degraded_mode_entered(&self) {
        self.degraded_triggers.inc();
        self.degraded_active.set(1.0);
    }

    pub fn degraded_mode_exited(&self) {
        self.degraded_active.set(0.0);
    }

    pub fn fallback(&self, from: &str, to: &str) {
        self.fallback_total.with_label_values(&[from, to]).inc();
    }

    pub fn set_outbox_pending(&self, pending: u64) {
        self.outbox_pending.set(pending as f64);
    }

    // ========================================================================
    // Readers (tests and health endpoints)
    // ========================================================================

    pub fn requests_created_count(&self) -> f64 {
        self.requests_created.get()
    }

    pub fn requests_completed_count(&self, channel: &str) -> f64 {
        self.requests_completed.with_label_values(&[channel]).get()
    }

    pub fn requests_expired_count(&self) -> f64 {
        self.requests_expired.get()
    }

    pub fn retry_attempts_count(&self, provider: &str) -> f64 {
        self.provider_retry_attempts.with_label_values(&[provider]).get()
    }

    pub fn retry_exhausted_count(&self, provider: &str) -> f64 {
        self.provider_retry_exhausted.with_label_values(&[provider]).get()
    }

    pub fn timeouts_count(&self, provider: &str) -> f64 {
        self.provider_timeouts.with_label_values(&[provider]).get()
    }

    pub fn circuit_transitions_count(&self, provider: &str, state: &str) -> f64 {
        self.circuit_transitions.with_label_values(&[provider, state]).get()
    }

    pub fn degraded_triggers_count(&self) -> f64 {
        self.degraded_triggers.get()
    }

    pub fn degraded_active(&self) -> f64 {
        self.degraded_active.get()
    }

    pub fn fallback_count(&self, from: &str, to: &str) -> f64 {
        self.fallback_total.with_label_values(&[from, to]).get()
    }

    pub fn outbox_pending(&self) -> f64 {
        self.outbox_pending.get()
    }

    /// Prometheus text exposition of every metric in this registry.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.request_created();
        assert_eq!(a.requests_created_count(), 1.0);
        assert_eq!(b.requests_created_count(), 0.0);
    }

    #[test]
    fn degraded_gauge_follows_mode() {
        let metrics = Metrics::new().unwrap();
        metrics.degraded_mode_entered();
        assert_eq!(metrics.degraded_active(), 1.0);
        assert_eq!(metrics.degraded_triggers_count(), 1.0);
        metrics.degraded_mode_exited();
        assert_eq!(metrics.degraded_active(), 0.0);
        assert_eq!(metrics.degraded_triggers_count(), 1.0);
    }

    #[test]
    fn encode_text_lists_labelled_series() {
        let metrics = Metrics::new().unwrap();
        metrics.fallback("SMS", "VOICE");
        metrics.circuit_transition("SMS", "OPEN", 1);
        metrics.set_outbox_pending(4);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("routing_fallback_total{from=\"SMS\",to=\"VOICE\"} 1"));
        assert!(text.contains("circuit_breaker_transitions_total{provider=\"SMS\",state=\"OPEN\"} 1"));
        assert!(text.contains("outbox_pending_events 4"));
    }
}
