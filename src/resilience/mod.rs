// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Resilience
//!
//! Provider health windows, per-provider circuit breakers, the system-wide
//! degraded mode control loop and the recovery pass that drains requests
//! parked while degraded.

pub mod circuit_breaker;
pub mod degraded_mode;
pub mod health;
pub mod recovery;

pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerListener,
    CircuitBreakerRegistry, CircuitState, CircuitTransition, TransitionKind,
};
pub use degraded_mode::{
    DegradedModeConfig, DegradedModeManager, HealthSample, ModeStatus, ModeTransition, SystemMode,
};
pub use health::{HealthSnapshot, ProviderHealthTracker};
pub use recovery::{DegradedModeRecoveryService, RecoveryReport};
