// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Closed set of domain events.
//!
//! Every aggregate transition and every circuit breaker transition produces
//! one of these. They leave the process only through the outbox, whose
//! payload mapper matches on this enum exhaustively.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::channel::{ChannelType, ProviderType};
use super::request::AbortReason;

pub const SIGNATURE_REQUEST_AGGREGATE: &str = "SignatureRequest";
pub const CIRCUIT_BREAKER_AGGREGATE: &str = "CircuitBreaker";

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    SignatureRequestCreated {
        request_id: Uuid,
        customer_id: String,
        amount: String,
        currency: String,
        merchant_id: String,
        order_id: String,
        expires_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    ChallengeCreated {
        request_id: Uuid,
        challenge_id: Uuid,
        channel: ChannelType,
        provider: ProviderType,
        occurred_at: DateTime<Utc>,
    },
    ChallengeSent {
        request_id: Uuid,
        challenge_id: Uuid,
        channel: ChannelType,
        provider: ProviderType,
        provider_challenge_id: Option<String>,
        attempt_number: u32,
        retried_success: bool,
        occurred_at: DateTime<Utc>,
    },
    ChallengeFailed {
        request_id: Uuid,
        challenge_id: Uuid,
        channel: ChannelType,
        provider: ProviderType,
        error_code: String,
        timed_out: bool,
        attempt_number: u32,
        occurred_at: DateTime<Utc>,
    },
    FallbackTriggered {
        request_id: Uuid,
        from_channel: ChannelType,
        to_channel: ChannelType,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    DegradedModeQueued {
        request_id: Uuid,
        challenge_id: Uuid,
        channel: ChannelType,
        occurred_at: DateTime<Utc>,
    },
    SignatureCompleted {
        request_id: Uuid,
        customer_id: String,
        challenge_id: Uuid,
        channel: ChannelType,
        provider: ProviderType,
        provider_proof: Option<String>,
        signed_at: DateTime<Utc>,
    },
    SignatureAborted {
        request_id: Uuid,
        reason: AbortReason,
        aborted_at: DateTime<Utc>,
    },
    SignatureFailed {
        request_id: Uuid,
        error_code: String,
        occurred_at: DateTime<Utc>,
    },
    SignatureExpired {
        request_id: Uuid,
        expired_at: DateTime<Utc>,
    },
    CircuitBreakerOpened {
        provider: ProviderType,
        failure_rate: f64,
        occurred_at: DateTime<Utc>,
    },
    CircuitBreakerHalfOpen {
        provider: ProviderType,
        occurred_at: DateTime<Utc>,
    },
    CircuitBreakerClosed {
        provider: ProviderType,
        /// Time actually spent away from CLOSED, measured from the OPEN transition.
        open_duration_ms: i64,
        occurred_at: DateTime<Utc>,
    },
    CircuitBreakerFailedRecovery {
        provider: ProviderType,
        occurred_at: DateTime<Utc>,
    },
    CircuitBreakerReset {
        provider: ProviderType,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::SignatureRequestCreated { .. } => "SIGNATURE_REQUEST_CREATED",
            DomainEvent::ChallengeCreated { .. } => "CHALLENGE_CREATED",
            DomainEvent::ChallengeSent { .. } => "CHALLENGE_SENT",
            DomainEvent::ChallengeFailed { .. } => "CHALLENGE_FAILED",
            DomainEvent::FallbackTriggered { .. } => "FALLBACK_TRIGGERED",
            DomainEvent::DegradedModeQueued { .. } => "DEGRADED_MODE_QUEUED",
            DomainEvent::SignatureCompleted { .. } => "SIGNATURE_COMPLETED",
            DomainEvent::SignatureAborted { .. } => "SIGNATURE_ABORTED",
            DomainEvent::SignatureFailed { .. } => "SIGNATURE_FAILED",
            DomainEvent::SignatureExpired { .. } => "SIGNATURE_EXPIRED",
            DomainEvent::CircuitBreakerOpened { .. } => "CIRCUIT_BREAKER_OPENED",
            DomainEvent::CircuitBreakerHalfOpen { .. } => "CIRCUIT_BREAKER_HALF_OPEN",
            DomainEvent::CircuitBreakerClosed { .. } => "CIRCUIT_BREAKER_CLOSED",
            DomainEvent::CircuitBreakerFailedRecovery { .. } => "CIRCUIT_BREAKER_FAILED_RECOVERY",
            DomainEvent::CircuitBreakerReset { .. } => "CIRCUIT_BREAKER_RESET",
        }
    }
}
