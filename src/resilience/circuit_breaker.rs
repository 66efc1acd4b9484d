// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Per-provider Circuit Breakers
//!
//! ```text
//! CLOSED ──failure rate >= threshold (min calls)──▶ OPEN
//! OPEN ──wait elapsed / operator probe──▶ HALF_OPEN
//! HALF_OPEN ──permitted trial calls all succeed──▶ CLOSED
//! HALF_OPEN ──any trial failure──▶ OPEN
//! any ──operator force-open──▶ FORCED_OPEN   (only probe/reset leave it)
//! any ──operator reset──▶ CLOSED
//! ```
//!
//! State lives in atomics so many in-flight calls can consult and update a
//! breaker without locking. The failure rate is read from the shared
//! [`ProviderHealthTracker`] window.
//!
//! Transitions are fanned out to [`CircuitBreakerListener`]s. Listener errors
//! are logged and dropped; they never change breaker state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::health::{HealthSnapshot, ProviderHealthTracker};
use crate::domain::{DomainEvent, ProviderType};
use crate::metrics::SharedMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
    ForcedOpen = 3,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            3 => CircuitState::ForcedOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::ForcedOpen => "FORCED_OPEN",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open | CircuitState::ForcedOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0-1.0) at which a CLOSED breaker opens.
    pub failure_rate_threshold: f64,
    /// Calls required in the window before the rate is trusted.
    pub minimum_calls: u64,
    pub wait_in_open: Duration,
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            wait_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionKind {
    Opened { failure_rate: f64 },
    HalfOpened,
    Closed { open_duration: chrono::Duration },
    FailedRecovery,
    ForcedOpen,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitTransition {
    pub provider: ProviderType,
    pub from: CircuitState,
    pub to: CircuitState,
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
}

impl CircuitTransition {
    pub fn to_event(&self) -> DomainEvent {
        let provider = self.provider;
        let occurred_at = self.at;
        match self.kind {
            TransitionKind::Opened { failure_rate } => DomainEvent::CircuitBreakerOpened {
                provider,
                failure_rate,
                occurred_at,
            },
            // Forced opens are reported as opens; the rate explains nothing here.
            TransitionKind::ForcedOpen => DomainEvent::CircuitBreakerOpened {
                provider,
                failure_rate: 0.0,
                occurred_at,
            },
            TransitionKind::HalfOpened => DomainEvent::CircuitBreakerHalfOpen {
                provider,
                occurred_at,
            },
            TransitionKind::Closed { open_duration } => DomainEvent::CircuitBreakerClosed {
                provider,
                open_duration_ms: open_duration.num_milliseconds(),
                occurred_at,
            },
            TransitionKind::FailedRecovery => DomainEvent::CircuitBreakerFailedRecovery {
                provider,
                occurred_at,
            },
            TransitionKind::Reset => DomainEvent::CircuitBreakerReset {
                provider,
                occurred_at,
            },
        }
    }
}

/// Reacts to breaker transitions. Implementations must not block for long;
/// they run on the caller's thread.
pub trait CircuitBreakerListener: Send + Sync {
    fn on_transition(
        &self,
        transition: &CircuitTransition,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

const NOT_OPENED: i64 = i64::MIN;

pub struct CircuitBreaker {
    provider: ProviderType,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    /// Last transition into OPEN; drives the wait before HALF_OPEN.
    opened_at_ms: AtomicI64,
    /// First transition away from CLOSED; drives the reported outage length.
    outage_started_ms: AtomicI64,
    half_open_permits: AtomicU32,
    half_open_successes: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderType, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_ms: AtomicI64::new(NOT_OPENED),
            outage_started_ms: AtomicI64::new(NOT_OPENED),
            half_open_permits: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
        }
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a call would currently be admitted, without consuming a
    /// half-open trial permit.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.wait_elapsed(now),
            CircuitState::ForcedOpen => false,
        }
    }

    /// Admit or reject one call. An OPEN breaker whose wait has elapsed moves
    /// to HALF_OPEN here and hands out the first trial permit.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> (bool, Option<CircuitTransition>) {
        match self.state() {
            CircuitState::Closed => (true, None),
            CircuitState::ForcedOpen => (false, None),
            CircuitState::Open => {
                if !self.wait_elapsed(now) {
                    return (false, None);
                }
                let transition = self.to_half_open(CircuitState::Open, now);
                let permitted = self.take_half_open_permit();
                (permitted, transition)
            }
            CircuitState::HalfOpen => (self.take_half_open_permit(), None),
        }
    }

    /// Feed one call outcome. `snapshot` is the provider's window after the
    /// outcome was recorded.
    pub fn on_result_at(
        &self,
        success: bool,
        snapshot: &HealthSnapshot,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        match self.state() {
            CircuitState::Closed => {
                if success
                    || snapshot.calls() < self.config.minimum_calls
                    || snapshot.error_rate < self.config.failure_rate_threshold
                {
                    return None;
                }
                self.swap(CircuitState::Closed, CircuitState::Open)?;
                self.opened_at_ms.store(now.timestamp_millis(), Ordering::Release);
                self.outage_started_ms.store(now.timestamp_millis(), Ordering::Release);
                Some(self.transition(
                    CircuitState::Closed,
                    CircuitState::Open,
                    TransitionKind::Opened {
                        failure_rate: snapshot.error_rate,
                    },
                    now,
                ))
            }
            CircuitState::HalfOpen if !success => {
                self.swap(CircuitState::HalfOpen, CircuitState::Open)?;
                self.opened_at_ms.store(now.timestamp_millis(), Ordering::Release);
                Some(self.transition(
                    CircuitState::HalfOpen,
                    CircuitState::Open,
                    TransitionKind::FailedRecovery,
                    now,
                ))
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes < self.config.permitted_calls_in_half_open {
                    return None;
                }
                self.swap(CircuitState::HalfOpen, CircuitState::Closed)?;
                let open_duration = self.outage_duration(now);
                self.clear_markers();
                Some(self.transition(
                    CircuitState::HalfOpen,
                    CircuitState::Closed,
                    TransitionKind::Closed { open_duration },
                    now,
                ))
            }
            // Late results from calls admitted before the breaker opened.
            CircuitState::Open | CircuitState::ForcedOpen => None,
        }
    }

    /// Operator probe: OPEN or FORCED_OPEN -> HALF_OPEN immediately.
    pub fn probe_at(&self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let from = self.state();
        if !from.is_open() {
            return None;
        }
        self.to_half_open(from, now)
    }

    /// OPEN -> HALF_OPEN once the wait has elapsed, without handing out a
    /// trial permit. FORCED_OPEN is left to the operator.
    pub fn reactivate_at(&self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        if self.state() != CircuitState::Open || !self.wait_elapsed(now) {
            return None;
        }
        self.to_half_open(CircuitState::Open, now)
    }

    pub fn force_open_at(&self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let from = CircuitState::from_u8(
            self.state
                .swap(CircuitState::ForcedOpen as u8, Ordering::AcqRel),
        );
        if from == CircuitState::ForcedOpen {
            return None;
        }
        self.opened_at_ms.store(now.timestamp_millis(), Ordering::Release);
        if from == CircuitState::Closed {
            self.outage_started_ms.store(now.timestamp_millis(), Ordering::Release);
        }
        Some(self.transition(from, CircuitState::ForcedOpen, TransitionKind::ForcedOpen, now))
    }

    pub fn reset_at(&self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let from = CircuitState::from_u8(self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel));
        self.clear_markers();
        if from == CircuitState::Closed {
            return None;
        }
        Some(self.transition(from, CircuitState::Closed, TransitionKind::Reset, now))
    }

    fn to_half_open(&self, from: CircuitState, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.swap(from, CircuitState::HalfOpen)?;
        self.half_open_permits.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        Some(self.transition(from, CircuitState::HalfOpen, TransitionKind::HalfOpened, now))
    }

    fn take_half_open_permit(&self) -> bool {
        let granted = self.half_open_permits.fetch_add(1, Ordering::AcqRel);
        if granted < self.config.permitted_calls_in_half_open {
            true
        } else {
            self.half_open_permits.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn wait_elapsed(&self, now: DateTime<Utc>) -> bool {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        let wait_ms = i64::try_from(self.config.wait_in_open.as_millis()).unwrap_or(i64::MAX);
        opened == NOT_OPENED || now.timestamp_millis().saturating_sub(opened) >= wait_ms
    }

    fn outage_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.outage_started_ms.load(Ordering::Acquire) {
            NOT_OPENED => chrono::Duration::zero(),
            started => chrono::Duration::milliseconds(now.timestamp_millis().saturating_sub(started)),
        }
    }

    fn clear_markers(&self) {
        self.opened_at_ms.store(NOT_OPENED, Ordering::Release);
        self.outage_started_ms.store(NOT_OPENED, Ordering::Release);
        self.half_open_permits.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
    }

    /// Compare-and-swap; `None` when another caller already moved the state.
    fn swap(&self, from: CircuitState, to: CircuitState) -> Option<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ())
    }

    fn transition(
        &self,
        from: CircuitState,
        to: CircuitState,
        kind: TransitionKind,
        at: DateTime<Utc>,
    ) -> CircuitTransition {
        CircuitTransition {
            provider: self.provider,
            from,
            to,
            kind,
            at,
        }
    }
}

/// Breaker status as reported to operators.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub provider: ProviderType,
    pub circuit_state: CircuitState,
    pub error_rate: f64,
    pub calls_in_window: u64,
}

/// One breaker per provider plus the shared health window.
pub struct CircuitBreakerRegistry {
    breakers: HashMap<ProviderType, CircuitBreaker>,
    tracker: Arc<ProviderHealthTracker>,
    listeners: RwLock<Vec<Arc<dyn CircuitBreakerListener>>>,
    metrics: SharedMetrics,
}

impl CircuitBreakerRegistry {
    pub fn new(
        config: CircuitBreakerConfig,
        tracker: Arc<ProviderHealthTracker>,
        metrics: SharedMetrics,
    ) -> Self {
        let breakers = ProviderType::ALL
            .into_iter()
            .map(|p| (p, CircuitBreaker::new(p, config.clone())))
            .collect();
        Self {
            breakers,
            tracker,
            listeners: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn tracker(&self) -> &Arc<ProviderHealthTracker> {
        &self.tracker
    }

    pub fn state(&self, provider: ProviderType) -> CircuitState {
        self.breakers
            .get(&provider)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Breakers currently OPEN or FORCED_OPEN.
    pub fn open_count(&self) -> usize {
        self.breakers.values().filter(|b| b.state().is_open()).count()
    }

    pub fn is_available(&self, provider: ProviderType) -> bool {
        self.is_available_at(provider, Utc::now())
    }

    pub fn is_available_at(&self, provider: ProviderType, now: DateTime<Utc>) -> bool {
        self.breakers
            .get(&provider)
            .is_some_and(|b| b.is_available_at(now))
    }

    pub fn try_acquire(&self, provider: ProviderType) -> bool {
        self.try_acquire_at(provider, Utc::now())
    }

    pub fn try_acquire_at(&self, provider: ProviderType, now: DateTime<Utc>) -> bool {
        let Some(breaker) = self.breakers.get(&provider) else {
            return false;
        };
        let (permitted, transition) = breaker.try_acquire_at(now);
        if let Some(transition) = transition {
            self.emit(&transition);
        }
        permitted
    }

    pub fn record_result(&self, provider: ProviderType, success: bool) {
        self.record_result_at(provider, success, Utc::now());
    }

    /// Record the outcome in the health window, then let the breaker react.
    pub fn record_result_at(&self, provider: ProviderType, success: bool, now: DateTime<Utc>) {
        self.tracker.record_at(provider, success, now);
        let Some(breaker) = self.breakers.get(&provider) else {
            return;
        };
        let snapshot = self.tracker.snapshot_at(provider, now);
        if let Some(transition) = breaker.on_result_at(success, &snapshot, now) {
            self.emit(&transition);
        }
    }

    pub fn probe(&self, provider: ProviderType) -> Option<CircuitTransition> {
        let transition = self.breakers.get(&provider)?.probe_at(Utc::now())?;
        self.emit(&transition);
        Some(transition)
    }

    pub fn force_open(&self, provider: ProviderType) -> Option<CircuitTransition> {
        let transition = self.breakers.get(&provider)?.force_open_at(Utc::now())?;
        self.emit(&transition);
        Some(transition)
    }

    pub fn reset(&self, provider: ProviderType) -> Option<CircuitTransition> {
        let transition = self.breakers.get(&provider)?.reset_at(Utc::now())?;
        self.emit(&transition);
        Some(transition)
    }

    /// Half-open every OPEN breaker whose wait has elapsed. Parked traffic
    /// never reaches `try_acquire`, so the degraded mode evaluator calls this.
    pub fn reactivate_elapsed_at(&self, now: DateTime<Utc>) -> Vec<CircuitTransition> {
        let transitions: Vec<CircuitTransition> = ProviderType::ALL
            .into_iter()
            .filter_map(|provider| self.breakers.get(&provider)?.reactivate_at(now))
            .collect();
        for transition in &transitions {
            self.emit(transition);
        }
        transitions
    }

    pub fn statuses_at(&self, now: DateTime<Utc>) -> Vec<BreakerStatus> {
        ProviderType::ALL
            .into_iter()
            .map(|provider| {
                let snapshot = self.tracker.snapshot_at(provider, now);
                BreakerStatus {
                    provider,
                    circuit_state: self.state(provider),
                    error_rate: snapshot.error_rate,
                    calls_in_window: snapshot.calls(),
                }
            })
            .collect()
    }

    fn emit(&self, transition: &CircuitTransition) {
        if transition.to == CircuitState::Closed {
            self.tracker.reset(transition.provider);
        }

        let provider = transition.provider.as_str();
        self.metrics
            .circuit_transition(provider, transition.to.as_str(), transition.to as u8);

        match transition.to {
            CircuitState::Open | CircuitState::ForcedOpen => warn!(
                provider,
                from = %transition.from,
                to = %transition.to,
                "Circuit breaker opened"
            ),
            _ => info!(
                provider,
                from = %transition.from,
                to = %transition.to,
                "Circuit breaker transition"
            ),
        }

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            if let Err(e) = listener.on_transition(transition) {
                warn!(
                    provider,
                    to = %transition.to,
                    error = %e,
                    "Circuit breaker listener failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use std::sync::Mutex;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            Metrics::shared().unwrap(),
        )
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<CircuitTransition>>);

    impl CircuitBreakerListener for Recording {
        fn on_transition(
            &self,
            transition: &CircuitTransition,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.lock().unwrap().push(*transition);
            Ok(())
        }
    }

    struct Failing;

    impl CircuitBreakerListener for Failing {
        fn on_transition(
            &self,
            _: &CircuitTransition,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("bus unavailable".into())
        }
    }

    fn open_sms(reg: &CircuitBreakerRegistry, now: DateTime<Utc>) {
        for _ in 0..10 {
            reg.record_result_at(ProviderType::Sms, false, now);
        }
    }

    #[test]
    fn needs_minimum_calls_before_opening() {
        let reg = registry();
        let now = Utc::now();
        for _ in 0..9 {
            reg.record_result_at(ProviderType::Sms, false, now);
        }
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Closed);
        reg.record_result_at(ProviderType::Sms, false, now);
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Open);
        assert_eq!(reg.open_count(), 1);
    }

    #[test]
    fn open_rejects_until_wait_elapsed_then_half_opens() {
        let reg = registry();
        let now = Utc::now();
        open_sms(&reg, now);

        assert!(!reg.try_acquire_at(ProviderType::Sms, now + chrono::Duration::seconds(10)));
        let later = now + chrono::Duration::seconds(31);
        assert!(reg.try_acquire_at(ProviderType::Sms, later));
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::HalfOpen);
    }

    #[test]
    fn reactivation_waits_and_skips_forced_open() {
        let reg = registry();
        let now = Utc::now();
        open_sms(&reg, now);
        reg.force_open(ProviderType::Voice);

        assert!(reg.reactivate_elapsed_at(now + chrono::Duration::seconds(10)).is_empty());
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Open);

        let later = now + chrono::Duration::seconds(31);
        let transitions = reg.reactivate_elapsed_at(later);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].provider, ProviderType::Sms);
        assert_eq!(transitions[0].kind, TransitionKind::HalfOpened);
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::HalfOpen);
        assert_eq!(reg.state(ProviderType::Voice), CircuitState::ForcedOpen);
        assert_eq!(reg.open_count(), 1);

        // Trial permits are still available to the first real calls.
        assert!(reg.try_acquire_at(ProviderType::Sms, later));
    }

    #[test]
    fn half_open_limits_trial_calls() {
        let reg = registry();
        let now = Utc::now();
        open_sms(&reg, now);
        reg.probe(ProviderType::Sms).unwrap();

        let permits = (0..5)
            .filter(|_| reg.try_acquire_at(ProviderType::Sms, now))
            .count();
        assert_eq!(permits, 3);
    }

    #[test]
    fn half_open_closes_after_successes_and_reports_outage() {
        let reg = registry();
        let recording = Arc::new(Recording::default());
        reg.add_listener(recording.clone());

        let opened = Utc::now();
        open_sms(&reg, opened);
        let probe_at = opened + chrono::Duration::seconds(45);
        assert!(reg.try_acquire_at(ProviderType::Sms, probe_at));
        for i in 0..3 {
            reg.record_result_at(ProviderType::Sms, true, probe_at + chrono::Duration::seconds(i));
        }

        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Closed);
        let transitions = recording.0.lock().unwrap();
        let kinds: Vec<_> = transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            kinds,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
        match transitions[2].kind {
            TransitionKind::Closed { open_duration } => {
                assert_eq!(open_duration, chrono::Duration::seconds(47));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Window was wiped on close.
        assert_eq!(reg.tracker().snapshot_at(ProviderType::Sms, probe_at).calls(), 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let reg = registry();
        let now = Utc::now();
        open_sms(&reg, now);
        reg.probe(ProviderType::Sms).unwrap();
        reg.record_result_at(ProviderType::Sms, true, now);
        reg.record_result_at(ProviderType::Sms, false, now);
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Open);
    }

    #[test]
    fn forced_open_ignores_wait_and_results() {
        let reg = registry();
        let now = Utc::now();
        reg.force_open(ProviderType::Voice).unwrap();
        assert!(!reg.try_acquire_at(ProviderType::Voice, now + chrono::Duration::hours(1)));
        reg.record_result_at(ProviderType::Voice, true, now);
        assert_eq!(reg.state(ProviderType::Voice), CircuitState::ForcedOpen);
        assert_eq!(reg.open_count(), 1);

        reg.reset(ProviderType::Voice).unwrap();
        assert_eq!(reg.state(ProviderType::Voice), CircuitState::Closed);
        assert!(reg.reset(ProviderType::Voice).is_none());
    }

    #[test]
    fn probe_is_noop_when_closed() {
        let reg = registry();
        assert!(reg.probe(ProviderType::Push).is_none());
    }

    #[test]
    fn listener_errors_do_not_affect_state() {
        let reg = registry();
        reg.add_listener(Arc::new(Failing));
        let recording = Arc::new(Recording::default());
        reg.add_listener(recording.clone());

        open_sms(&reg, Utc::now());
        assert_eq!(reg.state(ProviderType::Sms), CircuitState::Open);
        assert_eq!(recording.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn transitions_map_to_breaker_events() {
        let at = Utc::now();
        let closed = CircuitTransition {
            provider: ProviderType::Push,
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
            kind: TransitionKind::Closed {
                open_duration: chrono::Duration::seconds(90),
            },
            at,
        };
        assert_eq!(
            closed.to_event(),
            DomainEvent::CircuitBreakerClosed {
                provider: ProviderType::Push,
                open_duration_ms: 90_000,
                occurred_at: at,
            }
        );
        let reset = CircuitTransition {
            kind: TransitionKind::Reset,
            ..closed
        };
        assert_eq!(reset.to_event().event_type(), "CIRCUIT_BREAKER_RESET");
    }
}
