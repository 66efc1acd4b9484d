// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The single place where domain events become wire payloads.
//!
//! Every match here is exhaustive, so a new `DomainEvent` variant does not
//! compile until it has an aggregate, a timestamp and a payload.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::event::{EventEnvelope, ENVELOPE_VERSION};
use crate::domain::events::{CIRCUIT_BREAKER_AGGREGATE, SIGNATURE_REQUEST_AGGREGATE};
use crate::domain::DomainEvent;

/// `(aggregate_id, aggregate_type)` of the aggregate that emitted `event`.
pub fn aggregate_of(event: &DomainEvent) -> (String, &'static str) {
    match event {
        DomainEvent::SignatureRequestCreated { request_id, .. }
        | DomainEvent::ChallengeCreated { request_id, .. }
        | DomainEvent::ChallengeSent { request_id, .. }
        | DomainEvent::ChallengeFailed { request_id, .. }
        | DomainEvent::FallbackTriggered { request_id, .. }
        | DomainEvent::DegradedModeQueued { request_id, .. }
        | DomainEvent::SignatureCompleted { request_id, .. }
        | DomainEvent::SignatureAborted { request_id, .. }
        | DomainEvent::SignatureFailed { request_id, .. }
        | DomainEvent::SignatureExpired { request_id, .. } => {
            (request_id.to_string(), SIGNATURE_REQUEST_AGGREGATE)
        }
        DomainEvent::CircuitBreakerOpened { provider, .. }
        | DomainEvent::CircuitBreakerHalfOpen { provider, .. }
        | DomainEvent::CircuitBreakerClosed { provider, .. }
        | DomainEvent::CircuitBreakerFailedRecovery { provider, .. }
        | DomainEvent::CircuitBreakerReset { provider, .. } => {
            (provider.as_str().to_string(), CIRCUIT_BREAKER_AGGREGATE)
        }
    }
}

pub fn occurred_at(event: &DomainEvent) -> DateTime<Utc> {
    match event {
        DomainEvent::SignatureRequestCreated { occurred_at, .. }
        | DomainEvent::ChallengeCreated { occurred_at, .. }
        | DomainEvent::ChallengeSent { occurred_at, .. }
        | DomainEvent::ChallengeFailed { occurred_at, .. }
        | DomainEvent::FallbackTriggered { occurred_at, .. }
        | DomainEvent::DegradedModeQueued { occurred_at, .. }
        | DomainEvent::SignatureFailed { occurred_at, .. }
        | DomainEvent::CircuitBreakerOpened { occurred_at, .. }
        | DomainEvent::CircuitBreakerHalfOpen { occurred_at, .. }
        | DomainEvent::CircuitBreakerClosed { occurred_at, .. }
        | DomainEvent::CircuitBreakerFailedRecovery { occurred_at, .. }
        | DomainEvent::CircuitBreakerReset { occurred_at, .. } => *occurred_at,
        DomainEvent::SignatureCompleted { signed_at, .. } => *signed_at,
        DomainEvent::SignatureAborted { aborted_at, .. } => *aborted_at,
        DomainEvent::SignatureExpired { expired_at, .. } => *expired_at,
    }
}

/// Type-specific body of the envelope.
pub fn payload_of(event: &DomainEvent) -> Value {
    match event {
        DomainEvent::SignatureRequestCreated {
            request_id,
            customer_id,
            amount,
            currency,
            merchant_id,
            order_id,
            expires_at,
            ..
        } => json!({
            "requestId": request_id,
            "customerId": customer_id,
            "amount": amount,
            "currency": currency,
            "merchantId": merchant_id,
            "orderId": order_id,
            "expiresAt": expires_at,
        }),
        DomainEvent::ChallengeCreated {
            request_id,
            challenge_id,
            channel,
            provider,
            ..
        } => json!({
            "requestId": request_id,
            "challengeId": challenge_id,
            "channel": channel,
            "provider": provider,
        }),
        DomainEvent::ChallengeSent {
            request_id,
            challenge_id,
            channel,
            provider,
            provider_challenge_id,
            attempt_number,
            retried_success,
            ..
        } => json!({
            "requestId": request_id,
            "challengeId": challenge_id,
            "channel": channel,
            "provider": provider,
            "providerChallengeId": provider_challenge_id,
            "attemptNumber": attempt_number,
            "retriedSuccess": retried_success,
        }),
        DomainEvent::ChallengeFailed {
            request_id,
            challenge_id,
            channel,
            provider,
            error_code,
            timed_out,
            attempt_number,
            ..
        } => json!({
            "requestId": request_id,
            "challengeId": challenge_id,
            "channel": channel,
            "provider": provider,
            "errorCode": error_code,
            "timedOut": timed_out,
            "attemptNumber": attempt_number,
        }),
        DomainEvent::FallbackTriggered {
            request_id,
            from_channel,
            to_channel,
            reason,
            ..
        } => json!({
            "requestId": request_id,
            "fromChannel": from_channel,
            "toChannel": to_channel,
            "reason": reason,
        }),
        DomainEvent::DegradedModeQueued {
            request_id,
            challenge_id,
            channel,
            ..
        } => json!({
            "requestId": request_id,
            "challengeId": challenge_id,
            "channel": channel,
        }),
        DomainEvent::SignatureCompleted {
            request_id,
            customer_id,
            challenge_id,
            channel,
            provider,
            provider_proof,
            signed_at,
        } => json!({
            "requestId": request_id,
            "customerId": customer_id,
            "challengeId": challenge_id,
            "channel": channel,
            "provider": provider,
            "providerProof": provider_proof,
            "signedAt": signed_at,
        }),
        DomainEvent::SignatureAborted {
            request_id,
            reason,
            aborted_at,
        } => json!({
            "requestId": request_id,
            "reason": reason,
            "abortedAt": aborted_at,
        }),
        DomainEvent::SignatureFailed {
            request_id,
            error_code,
            ..
        } => json!({
            "requestId": request_id,
            "errorCode": error_code,
        }),
        DomainEvent::SignatureExpired {
            request_id,
            expired_at,
        } => json!({
            "requestId": request_id,
            "expiredAt": expired_at,
        }),
        DomainEvent::CircuitBreakerOpened {
            provider,
            failure_rate,
            ..
        } => json!({
            "provider": provider,
            "failureRate": failure_rate,
        }),
        DomainEvent::CircuitBreakerHalfOpen { provider, .. }
        | DomainEvent::CircuitBreakerFailedRecovery { provider, .. }
        | DomainEvent::CircuitBreakerReset { provider, .. } => json!({
            "provider": provider,
        }),
        DomainEvent::CircuitBreakerClosed {
            provider,
            open_duration_ms,
            ..
        } => json!({
            "provider": provider,
            "openDurationMs": open_duration_ms,
        }),
    }
}

pub fn envelope(event: &DomainEvent, event_id: Uuid) -> EventEnvelope {
    let (aggregate_id, aggregate_type) = aggregate_of(event);
    EventEnvelope {
        event_id,
        event_type: event.event_type().to_string(),
        occurred_at: occurred_at(event).timestamp_millis(),
        // Events of one aggregate correlate through its id.
        correlation_id: aggregate_id.clone(),
        aggregate_id,
        aggregate_type: aggregate_type.to_string(),
        version: ENVELOPE_VERSION,
        payload: payload_of(event),
    }
}
