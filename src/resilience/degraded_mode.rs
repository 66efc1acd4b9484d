// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Degraded Mode Manager
//!
//! System-wide control loop. Every `evaluation_interval` it samples the worst
//! provider error rate and the number of open breakers and decides the mode:
//!
//! | From | Condition | To |
//! |------|-----------|----|
//! | NORMAL | open breakers >= `circuit_open_threshold` | DEGRADED (immediately) |
//! | NORMAL | max error rate > `error_rate_threshold` for `min_duration` | DEGRADED |
//! | DEGRADED | max error rate < `recovery_threshold` and open breakers below threshold for `recovery_duration` | NORMAL |
//! | MAINTENANCE | never changed by evaluation | |
//!
//! Both sustain timers reset the moment their condition stops holding.
//! While DEGRADED every new request is parked, so no call ever reaches an
//! OPEN breaker; the evaluator half-opens breakers whose wait has elapsed
//! itself, which lets the open count fall. FORCED_OPEN breakers stay open.
//! Operator overrides may run concurrently with the evaluation task; the
//! mode is an atomic and every transition happens under the detection lock.
//!
//! Mode changes are broadcast on a `watch` channel; the recovery poller
//! listens there for the return to NORMAL.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::circuit_breaker::CircuitBreakerRegistry;
use crate::config::ConfigError;
use crate::metrics::SharedMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SystemMode {
    Normal = 0,
    Degraded = 1,
    Maintenance = 2,
}

impl SystemMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SystemMode::Degraded,
            2 => SystemMode::Maintenance,
            _ => SystemMode::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Normal => "NORMAL",
            SystemMode::Degraded => "DEGRADED",
            SystemMode::Maintenance => "MAINTENANCE",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DegradedModeConfig {
    pub error_rate_threshold: f64,
    pub min_duration: Duration,
    pub recovery_threshold: f64,
    pub recovery_duration: Duration,
    pub circuit_open_threshold: usize,
    pub evaluation_interval: Duration,
}

impl Default for DegradedModeConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.80,
            min_duration: Duration::from_secs(120),
            recovery_threshold: 0.50,
            recovery_duration: Duration::from_secs(300),
            circuit_open_threshold: 3,
            evaluation_interval: Duration::from_secs(30),
        }
    }
}

impl DegradedModeConfig {
    /// Rejects configurations without hysteresis or with nonsensical bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("DEGRADED_ERROR_RATE_THRESHOLD", self.error_rate_threshold),
            ("DEGRADED_RECOVERY_THRESHOLD", self.recovery_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.recovery_threshold >= self.error_rate_threshold {
            return Err(ConfigError::Invalid {
                name: "DEGRADED_RECOVERY_THRESHOLD",
                reason: format!(
                    "recovery threshold {} must be lower than entry threshold {}",
                    self.recovery_threshold, self.error_rate_threshold
                ),
            });
        }
        for (name, value) in [
            ("DEGRADED_MIN_DURATION_SECS", self.min_duration),
            ("DEGRADED_RECOVERY_DURATION_SECS", self.recovery_duration),
            ("DEGRADED_EVALUATION_INTERVAL_SECS", self.evaluation_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.circuit_open_threshold == 0 {
            return Err(ConfigError::Invalid {
                name: "DEGRADED_CIRCUIT_OPEN_THRESHOLD",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    pub max_error_rate: f64,
    pub open_circuits: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: SystemMode,
    pub to: SystemMode,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModeStatus {
    pub mode: SystemMode,
    pub reason: Option<String>,
    pub degraded_since: Option<DateTime<Utc>>,
    pub high_error_rate_detected_at: Option<DateTime<Utc>>,
    pub low_error_rate_sustained_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DetectionState {
    reason: Option<String>,
    degraded_since: Option<DateTime<Utc>>,
    high_error_rate_detected_at: Option<DateTime<Utc>>,
    low_error_rate_sustained_at: Option<DateTime<Utc>>,
}

pub struct DegradedModeManager {
    config: DegradedModeConfig,
    mode: AtomicU8,
    detection: Mutex<DetectionState>,
    mode_tx: watch::Sender<SystemMode>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: SharedMetrics,
}

impl DegradedModeManager {
    pub fn new(
        config: DegradedModeConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: SharedMetrics,
    ) -> Self {
        let (mode_tx, _) = watch::channel(SystemMode::Normal);
        Self {
            config,
            mode: AtomicU8::new(SystemMode::Normal as u8),
            detection: Mutex::new(DetectionState::default()),
            mode_tx,
            breakers,
            metrics,
        }
    }

    pub fn config(&self) -> &DegradedModeConfig {
        &self.config
    }

    pub fn current_mode(&self) -> SystemMode {
        SystemMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn is_normal(&self) -> bool {
        self.current_mode() == SystemMode::Normal
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemMode> {
        self.mode_tx.subscribe()
    }

    pub fn status(&self) -> ModeStatus {
        let state = self.lock();
        ModeStatus {
            mode: self.current_mode(),
            reason: state.reason.clone(),
            degraded_since: state.degraded_since,
            high_error_rate_detected_at: state.high_error_rate_detected_at,
            low_error_rate_sustained_at: state.low_error_rate_sustained_at,
        }
    }

    pub fn sample_at(&self, now: DateTime<Utc>) -> HealthSample {
        HealthSample {
            max_error_rate: self.breakers.tracker().max_error_rate_at(now),
            open_circuits: self.breakers.open_count(),
        }
    }

    pub fn evaluate_at(&self, now: DateTime<Utc>) -> Option<ModeTransition> {
        if self.current_mode() == SystemMode::Degraded {
            let reactivated = self.breakers.reactivate_elapsed_at(now);
            if !reactivated.is_empty() {
                debug!(count = reactivated.len(), "Open breakers moved to half-open while degraded");
            }
        }
        let sample = self.sample_at(now);
        self.evaluate_sample(sample, now)
    }

    /// Apply one sample to the detection timers.
    pub fn evaluate_sample(&self, sample: HealthSample, now: DateTime<Utc>) -> Option<ModeTransition> {
        let mut state = self.lock();
        let mode = self.current_mode();
        debug!(
            mode = %mode,
            max_error_rate = sample.max_error_rate,
            open_circuits = sample.open_circuits,
            "Evaluating system health"
        );

        match mode {
            SystemMode::Normal => {
                state.low_error_rate_sustained_at = None;

                if sample.open_circuits >= self.config.circuit_open_threshold {
                    let reason = format!("{} circuit breakers open", sample.open_circuits);
                    return Some(self.transition(&mut state, SystemMode::Degraded, Some(reason), now));
                }

                if sample.max_error_rate > self.config.error_rate_threshold {
                    let since = *state.high_error_rate_detected_at.get_or_insert(now);
                    if sustained(since, now, self.config.min_duration) {
                        let reason = format!(
                            "provider error rate {:.0}% above {:.0}% for {}s",
                            sample.max_error_rate * 100.0,
                            self.config.error_rate_threshold * 100.0,
                            (now - since).num_seconds()
                        );
                        return Some(self.transition(&mut state, SystemMode::Degraded, Some(reason), now));
                    }
                } else {
                    state.high_error_rate_detected_at = None;
                }
                None
            }
            SystemMode::Degraded => {
                state.high_error_rate_detected_at = None;

                let healthy = sample.max_error_rate < self.config.recovery_threshold
                    && sample.open_circuits < self.config.circuit_open_threshold;
                if !healthy {
                    state.low_error_rate_sustained_at = None;
                    return None;
                }
                let since = *state.low_error_rate_sustained_at.get_or_insert(now);
                if sustained(since, now, self.config.recovery_duration) {
                    return Some(self.transition(&mut state, SystemMode::Normal, None, now));
                }
                None
            }
            SystemMode::Maintenance => None,
        }
    }

    /// Operator override. Idempotent: entering again only replaces the reason.
    pub fn enter_degraded_mode(&self, reason: impl Into<String>) -> Option<ModeTransition> {
        let reason = reason.into();
        let mut state = self.lock();
        if self.current_mode() == SystemMode::Degraded {
            info!(reason = %reason, "Degraded mode reason updated");
            state.reason = Some(reason);
            return None;
        }
        Some(self.transition(&mut state, SystemMode::Degraded, Some(reason), Utc::now()))
    }

    /// Operator override back to NORMAL from DEGRADED or MAINTENANCE.
    pub fn exit_degraded_mode(&self) -> Option<ModeTransition> {
        let mut state = self.lock();
        if self.current_mode() == SystemMode::Normal {
            return None;
        }
        Some(self.transition(&mut state, SystemMode::Normal, None, Utc::now()))
    }

    pub fn enter_maintenance(&self, reason: impl Into<String>) -> Option<ModeTransition> {
        let reason = reason.into();
        let mut state = self.lock();
        if self.current_mode() == SystemMode::Maintenance {
            state.reason = Some(reason);
            return None;
        }
        Some(self.transition(&mut state, SystemMode::Maintenance, Some(reason), Utc::now()))
    }

    /// Evaluation loop. Spawn once at startup.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.evaluation_interval.as_secs(),
            "Degraded mode evaluator starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.evaluation_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Degraded mode evaluator shutting down");
                    return;
                }
            }
            self.evaluate_at(Utc::now());
        }
    }

    fn transition(
        &self,
        state: &mut DetectionState,
        to: SystemMode,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ModeTransition {
        let from = self.current_mode();
        self.mode.store(to as u8, Ordering::Release);

        state.high_error_rate_detected_at = None;
        state.low_error_rate_sustained_at = None;
        match to {
            SystemMode::Normal => {
                state.reason = None;
                state.degraded_since = None;
                self.metrics.degraded_mode_exited();
                info!(from = %from, "System returned to normal mode");
            }
            SystemMode::Degraded | SystemMode::Maintenance => {
                state.reason = reason.clone();
                state.degraded_since = Some(now);
                if to == SystemMode::Degraded {
                    self.metrics.degraded_mode_entered();
                } else {
                    self.metrics.degraded_mode_exited();
                }
                warn!(
                    from = %from,
                    to = %to,
                    reason = reason.as_deref().unwrap_or_default(),
                    "System mode changed"
                );
            }
        }
        self.mode_tx.send_replace(to);

        ModeTransition {
            from,
            to,
            reason,
            at: now,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetectionState> {
        self.detection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sustained(since: DateTime<Utc>, now: DateTime<Utc>, required: Duration) -> bool {
    (now - since)
        .to_std()
        .map(|elapsed| elapsed >= required)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::domain::ProviderType;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::resilience::health::ProviderHealthTracker;

    fn manager() -> DegradedModeManager {
        let metrics = Metrics::shared().unwrap();
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            metrics.clone(),
        ));
        DegradedModeManager::new(DegradedModeConfig::default(), breakers, metrics)
    }

    fn rate(max_error_rate: f64) -> HealthSample {
        HealthSample {
            max_error_rate,
            open_circuits: 0,
        }
    }

    /// Feed `sample` every 30s for `secs` seconds starting at `start`.
    fn feed(
        m: &DegradedModeManager,
        sample: HealthSample,
        start: DateTime<Utc>,
        secs: i64,
    ) -> Vec<ModeTransition> {
        (0..=secs / 30)
            .filter_map(|i| m.evaluate_sample(sample, start + chrono::Duration::seconds(i * 30)))
            .collect()
    }

    #[test]
    fn sustained_high_error_rate_enters_then_hysteresis_exits() {
        let m = manager();
        let t0 = Utc::now();

        let entered = feed(&m, rate(0.85), t0, 130);
        assert_eq!(entered.len(), 1);
        assert_eq!(entered[0].to, SystemMode::Degraded);
        assert_eq!(entered[0].at, t0 + chrono::Duration::seconds(120));
        assert_eq!(m.current_mode(), SystemMode::Degraded);
        assert!(m.status().degraded_since.is_some());

        let t1 = t0 + chrono::Duration::seconds(150);
        let exited = feed(&m, rate(0.40), t1, 310);
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].to, SystemMode::Normal);
        assert_eq!(exited[0].at, t1 + chrono::Duration::seconds(300));
        assert!(m.is_normal());
    }

    #[test]
    fn short_spike_does_not_enter() {
        let m = manager();
        let t0 = Utc::now();
        assert!(feed(&m, rate(0.95), t0, 90).is_empty());
        assert!(m.is_normal());
    }

    #[test]
    fn one_healthy_sample_resets_entry_timer() {
        let m = manager();
        let t0 = Utc::now();
        let s = |secs| t0 + chrono::Duration::seconds(secs);

        assert!(m.evaluate_sample(rate(0.9), s(0)).is_none());
        assert!(m.evaluate_sample(rate(0.9), s(90)).is_none());
        assert!(m.evaluate_sample(rate(0.1), s(100)).is_none());
        assert!(m.status().high_error_rate_detected_at.is_none());
        assert!(m.evaluate_sample(rate(0.9), s(130)).is_none());
        // 120s after the restart, not after the first sample.
        assert!(m.evaluate_sample(rate(0.9), s(200)).is_none());
        assert!(m.evaluate_sample(rate(0.9), s(250)).is_some());
    }

    #[test]
    fn rate_at_threshold_is_not_above_it() {
        let m = manager();
        let t0 = Utc::now();
        assert!(feed(&m, rate(0.80), t0, 600).is_empty());
    }

    #[test]
    fn open_breakers_enter_immediately() {
        let m = manager();
        let t = m.evaluate_sample(
            HealthSample {
                max_error_rate: 0.0,
                open_circuits: 3,
            },
            Utc::now(),
        );
        assert_eq!(t.unwrap().to, SystemMode::Degraded);
    }

    #[test]
    fn recovery_interrupted_by_bad_sample_restarts() {
        let m = manager();
        m.enter_degraded_mode("drill");
        let t0 = Utc::now();
        let s = |secs| t0 + chrono::Duration::seconds(secs);

        assert!(m.evaluate_sample(rate(0.3), s(0)).is_none());
        assert!(m.evaluate_sample(rate(0.6), s(200)).is_none());
        assert!(m.evaluate_sample(rate(0.3), s(260)).is_none());
        assert!(m.evaluate_sample(rate(0.3), s(500)).is_none());
        assert!(m.evaluate_sample(rate(0.3), s(560)).is_some());
    }

    #[test]
    fn breaker_triggered_degradation_exits_without_traffic() {
        let metrics = Metrics::shared().unwrap();
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            metrics.clone(),
        ));
        let m = DegradedModeManager::new(DegradedModeConfig::default(), breakers.clone(), metrics);
        let t0 = Utc::now();
        for provider in [ProviderType::Sms, ProviderType::Push, ProviderType::Voice] {
            for _ in 0..10 {
                breakers.record_result_at(provider, false, t0);
            }
        }
        assert_eq!(breakers.open_count(), 3);
        assert_eq!(m.evaluate_at(t0).unwrap().to, SystemMode::Degraded);

        // An hour of evaluations with every request parked.
        let exit = (1..=120)
            .filter_map(|i| m.evaluate_at(t0 + chrono::Duration::seconds(i * 30)))
            .find(|t| t.to == SystemMode::Normal);
        assert!(exit.is_some());
        assert!(m.is_normal());
        assert_eq!(breakers.open_count(), 0);
        assert_eq!(breakers.state(ProviderType::Sms), CircuitState::HalfOpen);

        // Half-open breakers do not count towards re-entry.
        assert!(m.evaluate_at(t0 + chrono::Duration::seconds(3630)).is_none());
        assert!(m.is_normal());
    }

    #[test]
    fn forced_open_breakers_hold_degraded_mode() {
        let metrics = Metrics::shared().unwrap();
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            metrics.clone(),
        ));
        let m = DegradedModeManager::new(DegradedModeConfig::default(), breakers.clone(), metrics);
        for provider in [ProviderType::Sms, ProviderType::Push, ProviderType::Voice] {
            breakers.force_open(provider);
        }
        let t0 = Utc::now();
        assert!(m.evaluate_at(t0).is_some());
        assert!((1..=40)
            .filter_map(|i| m.evaluate_at(t0 + chrono::Duration::seconds(i * 30)))
            .next()
            .is_none());
        assert_eq!(m.current_mode(), SystemMode::Degraded);
    }

    #[test]
    fn manual_enter_is_idempotent_and_updates_reason() {
        let m = manager();
        assert!(m.enter_degraded_mode("provider outage").is_some());
        assert!(m.enter_degraded_mode("still out").is_none());
        let status = m.status();
        assert_eq!(status.mode, SystemMode::Degraded);
        assert_eq!(status.reason.as_deref(), Some("still out"));

        assert!(m.exit_degraded_mode().is_some());
        assert!(m.exit_degraded_mode().is_none());
    }

    #[test]
    fn maintenance_is_sticky_under_evaluation() {
        let m = manager();
        m.enter_maintenance("db migration");
        let t0 = Utc::now();
        assert!(feed(&m, rate(0.0), t0, 900).is_empty());
        assert!(feed(&m, HealthSample { max_error_rate: 1.0, open_circuits: 4 }, t0, 300).is_empty());
        assert_eq!(m.current_mode(), SystemMode::Maintenance);
        assert_eq!(m.exit_degraded_mode().unwrap().to, SystemMode::Normal);
    }

    #[test]
    fn subscribers_see_mode_changes() {
        let m = manager();
        let rx = m.subscribe();
        m.enter_degraded_mode("x");
        assert_eq!(*rx.borrow(), SystemMode::Degraded);
        m.exit_degraded_mode();
        assert_eq!(*rx.borrow(), SystemMode::Normal);
    }

    #[test]
    fn validation_requires_hysteresis() {
        let mut config = DegradedModeConfig::default();
        assert!(config.validate().is_ok());

        config.recovery_threshold = 0.80;
        assert!(config.validate().is_err());
        config.recovery_threshold = 0.90;
        assert!(config.validate().is_err());

        let mut config = DegradedModeConfig::default();
        config.error_rate_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = DegradedModeConfig::default();
        config.min_duration = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = DegradedModeConfig::default();
        config.circuit_open_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn entry_counts_trigger_metric() {
        let metrics = Metrics::shared().unwrap();
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            metrics.clone(),
        ));
        let m = DegradedModeManager::new(DegradedModeConfig::default(), breakers, metrics.clone());
        m.enter_degraded_mode("a");
        m.exit_degraded_mode();
        m.enter_degraded_mode("b");
        assert_eq!(metrics.degraded_triggers_count(), 2.0);
        assert_eq!(metrics.degraded_active(), 1.0);
    }
}
