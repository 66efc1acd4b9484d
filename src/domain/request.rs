// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SignatureRequest Aggregate
//!
//! ```text
//! PENDING ──createChallenge──▶ CHALLENGED ──completeSignature──▶ SIGNED
//!    │                           │  ▲
//!    │                           └──┘ createChallenge (fallback)
//!    └──parkDegraded──▶ PENDING_DEGRADED ──resumeFromDegraded──▶ CHALLENGED
//!
//! any non-terminal ──abortSignature──▶ ABORTED
//! any non-terminal ──markAsExpired───▶ EXPIRED
//! any non-terminal ──markAsFailed────▶ FAILED
//! ```
//!
//! At most one challenge is PENDING or SENT at any time. Every successful
//! mutation queues its domain events; the service drains them with
//! [`SignatureRequest::take_events`] and writes them to the outbox in the
//! same storage transaction as the aggregate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::challenge::{ChallengeStatus, SignatureChallenge, VerificationOutcome};
use super::channel::{ChannelType, ProviderType};
use super::error::{SignatureError, SignatureResult};
use super::events::DomainEvent;
use super::money::TransactionContext;
use super::provider_result::ProviderResult;

/// Default request lifetime.
pub const DEFAULT_TTL: Duration = Duration::minutes(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Challenged,
    Signed,
    Aborted,
    Failed,
    Expired,
    PendingDegraded,
}

impl SignatureStatus {
    pub const ALL: [SignatureStatus; 7] = [
        SignatureStatus::Pending,
        SignatureStatus::Challenged,
        SignatureStatus::Signed,
        SignatureStatus::Aborted,
        SignatureStatus::Failed,
        SignatureStatus::Expired,
        SignatureStatus::PendingDegraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "PENDING",
            SignatureStatus::Challenged => "CHALLENGED",
            SignatureStatus::Signed => "SIGNED",
            SignatureStatus::Aborted => "ABORTED",
            SignatureStatus::Failed => "FAILED",
            SignatureStatus::Expired => "EXPIRED",
            SignatureStatus::PendingDegraded => "PENDING_DEGRADED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignatureStatus::Signed
                | SignatureStatus::Aborted
                | SignatureStatus::Failed
                | SignatureStatus::Expired
        )
    }

    /// Stable single-byte tag used in storage index keys.
    pub fn index_tag(&self) -> u8 {
        match self {
            SignatureStatus::Pending => 1,
            SignatureStatus::Challenged => 2,
            SignatureStatus::Signed => 3,
            SignatureStatus::Aborted => 4,
            SignatureStatus::Failed => 5,
            SignatureStatus::Expired => 6,
            SignatureStatus::PendingDegraded => 7,
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    UserCancelled,
    FraudDetected,
    SystemError,
    AdminIntervention,
    FallbackExhausted,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UserCancelled => "USER_CANCELLED",
            AbortReason::FraudDetected => "FRAUD_DETECTED",
            AbortReason::SystemError => "SYSTEM_ERROR",
            AbortReason::AdminIntervention => "ADMIN_INTERVENTION",
            AbortReason::FallbackExhausted => "FALLBACK_EXHAUSTED",
        }
    }
}

impl FromStr for AbortReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER_CANCELLED" => Ok(AbortReason::UserCancelled),
            "FRAUD_DETECTED" => Ok(AbortReason::FraudDetected),
            "SYSTEM_ERROR" => Ok(AbortReason::SystemError),
            "ADMIN_INTERVENTION" => Ok(AbortReason::AdminIntervention),
            "FALLBACK_EXHAUSTED" => Ok(AbortReason::FallbackExhausted),
            other => Err(format!("unknown abort reason `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingEventType {
    ChallengeCreated,
    DegradedQueued,
    DegradedRecovered,
    CircuitOpenSkipped,
}

/// One entry of the routing audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: RoutingEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_channel: Option<ChannelType>,
    pub to_channel: ChannelType,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    id: Uuid,
    /// Pseudonymized customer reference, never raw PII.
    customer_id: String,
    transaction_context: TransactionContext,
    status: SignatureStatus,
    challenges: Vec<SignatureChallenge>,
    routing_timeline: Vec<RoutingEvent>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    signed_at: Option<DateTime<Utc>>,
    aborted_at: Option<DateTime<Utc>>,
    abort_reason: Option<AbortReason>,
    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
}

impl SignatureRequest {
    /// Create a PENDING request. Queues `SIGNATURE_REQUEST_CREATED`.
    pub fn new(
        customer_id: impl Into<String>,
        transaction_context: TransactionContext,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> SignatureResult<Self> {
        let customer_id = customer_id.into();
        if customer_id.trim().is_empty() {
            return Err(SignatureError::InvalidTransactionContext(
                "customer id is required".to_string(),
            ));
        }
        if ttl <= Duration::zero() {
            return Err(SignatureError::InvalidTransactionContext(
                "ttl must be positive".to_string(),
            ));
        }

        let id = Uuid::now_v7();
        let expires_at = now + ttl;
        let created = DomainEvent::SignatureRequestCreated {
            request_id: id,
            customer_id: customer_id.clone(),
            amount: transaction_context.amount().amount_string(),
            currency: transaction_context.amount().currency().to_string(),
            merchant_id: transaction_context.merchant_id().to_string(),
            order_id: transaction_context.order_id().to_string(),
            expires_at,
            occurred_at: now,
        };

        Ok(Self {
            id,
            customer_id,
            transaction_context,
            status: SignatureStatus::Pending,
            challenges: Vec::new(),
            routing_timeline: Vec::new(),
            created_at: now,
            expires_at,
            signed_at: None,
            aborted_at: None,
            abort_reason: None,
            pending_events: vec![created],
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn transaction_context(&self) -> &TransactionContext {
        &self.transaction_context
    }

    pub fn status(&self) -> SignatureStatus {
        self.status
    }

    pub fn challenges(&self) -> &[SignatureChallenge] {
        &self.challenges
    }

    pub fn routing_timeline(&self) -> &[RoutingEvent] {
        &self.routing_timeline
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn signed_at(&self) -> Option<DateTime<Utc>> {
        self.signed_at
    }

    pub fn aborted_at(&self) -> Option<DateTime<Utc>> {
        self.aborted_at
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn challenge(&self, challenge_id: Uuid) -> Option<&SignatureChallenge> {
        self.challenges.iter().find(|c| c.id() == challenge_id)
    }

    /// The single PENDING or SENT challenge, if any.
    pub fn active_challenge(&self) -> Option<&SignatureChallenge> {
        self.challenges.iter().find(|c| c.is_active())
    }

    /// Channels that already carried a challenge for this request.
    pub fn attempted_channels(&self) -> Vec<ChannelType> {
        let mut channels: Vec<ChannelType> =
            self.challenges.iter().map(|c| c.channel_type()).collect();
        channels.dedup();
        channels
    }

    /// `expires_at - now`. Negative once the request has expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Events queued by mutations since the last drain.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Open a new challenge on `channel`. Allowed from PENDING, or from
    /// CHALLENGED once the previous challenge has failed or expired.
    pub fn create_challenge(
        &mut self,
        channel: ChannelType,
        provider: ProviderType,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SignatureResult<&SignatureChallenge> {
        self.ensure_no_active_challenge()?;
        if !matches!(
            self.status,
            SignatureStatus::Pending | SignatureStatus::Challenged
        ) || self.is_expired(now)
        {
            return Err(self.invalid_transition(SignatureStatus::Challenged));
        }

        let challenge = SignatureChallenge::new(self.id, channel, provider, self.expires_at - now, now)?;
        let challenge_id = challenge.id();
        let from_channel = self.challenges.last().map(|c| c.channel_type());

        self.routing_timeline.push(RoutingEvent {
            timestamp: now,
            event_type: RoutingEventType::ChallengeCreated,
            from_channel,
            to_channel: channel,
            reason: reason.to_string(),
        });
        if let Some(from_channel) = from_channel {
            self.pending_events.push(DomainEvent::FallbackTriggered {
                request_id: self.id,
                from_channel,
                to_channel: channel,
                reason: reason.to_string(),
                occurred_at: now,
            });
        }
        self.pending_events.push(DomainEvent::ChallengeCreated {
            request_id: self.id,
            challenge_id,
            channel,
            provider,
            occurred_at: now,
        });

        let index = self.challenges.len();
        self.challenges.push(challenge);
        self.status = SignatureStatus::Challenged;
        Ok(&self.challenges[index])
    }

    /// Park a fresh request while the system is degraded. The challenge is
    /// created now and sent later by the recovery pass.
    pub fn park_degraded(
        &mut self,
        channel: ChannelType,
        provider: ProviderType,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SignatureResult<&SignatureChallenge> {
        self.ensure_no_active_challenge()?;
        if self.status != SignatureStatus::Pending || self.is_expired(now) {
            return Err(self.invalid_transition(SignatureStatus::PendingDegraded));
        }

        let challenge = SignatureChallenge::new(self.id, channel, provider, self.expires_at - now, now)?;
        let challenge_id = challenge.id();

        self.routing_timeline.push(RoutingEvent {
            timestamp: now,
            event_type: RoutingEventType::DegradedQueued,
            from_channel: None,
            to_channel: channel,
            reason: reason.to_string(),
        });
        self.pending_events.push(DomainEvent::ChallengeCreated {
            request_id: self.id,
            challenge_id,
            channel,
            provider,
            occurred_at: now,
        });
        self.pending_events.push(DomainEvent::DegradedModeQueued {
            request_id: self.id,
            challenge_id,
            channel,
            occurred_at: now,
        });

        let index = self.challenges.len();
        self.challenges.push(challenge);
        self.status = SignatureStatus::PendingDegraded;
        Ok(&self.challenges[index])
    }

    /// Send the challenge parked by [`park_degraded`](Self::park_degraded).
    pub fn resume_from_degraded(&mut self, result: &ProviderResult, now: DateTime<Utc>) -> SignatureResult<()> {
        if self.status != SignatureStatus::PendingDegraded {
            return Err(self.invalid_transition(SignatureStatus::Challenged));
        }
        let id = self.id;
        let challenge = self
            .challenges
            .iter_mut()
            .find(|c| c.status() == ChallengeStatus::Pending)
            .ok_or(SignatureError::InvalidTransition {
                from: SignatureStatus::PendingDegraded.as_str(),
                to: SignatureStatus::Challenged.as_str(),
            })?;
        challenge.mark_as_sent(result, now)?;

        let channel = challenge.channel_type();
        let event = DomainEvent::ChallengeSent {
            request_id: id,
            challenge_id: challenge.id(),
            channel,
            provider: challenge.provider(),
            provider_challenge_id: result.provider_challenge_id().map(str::to_string),
            attempt_number: result.attempt_number(),
            retried_success: result.retried_success(),
            occurred_at: now,
        };

        self.routing_timeline.push(RoutingEvent {
            timestamp: now,
            event_type: RoutingEventType::DegradedRecovered,
            from_channel: None,
            to_channel: channel,
            reason: "degraded mode recovery".to_string(),
        });
        self.pending_events.push(event);
        self.status = SignatureStatus::Challenged;
        Ok(())
    }

    /// Record that routing skipped `channel` because its breaker is open.
    pub fn note_circuit_skip(&mut self, channel: ChannelType, now: DateTime<Utc>) {
        self.routing_timeline.push(RoutingEvent {
            timestamp: now,
            event_type: RoutingEventType::CircuitOpenSkipped,
            from_channel: None,
            to_channel: channel,
            reason: format!("circuit breaker open for {}", channel.provider()),
        });
    }

    /// PENDING -> SENT for one of this request's challenges.
    pub fn mark_challenge_sent(
        &mut self,
        challenge_id: Uuid,
        result: &ProviderResult,
        now: DateTime<Utc>,
    ) -> SignatureResult<()> {
        if self.status != SignatureStatus::Challenged {
            return Err(SignatureError::InvalidTransition {
                from: self.status.as_str(),
                to: ChallengeStatus::Sent.as_str(),
            });
        }
        let id = self.id;
        let challenge = self.challenge_mut(challenge_id)?;
        challenge.mark_as_sent(result, now)?;
        let event = DomainEvent::ChallengeSent {
            request_id: id,
            challenge_id,
            channel: challenge.channel_type(),
            provider: challenge.provider(),
            provider_challenge_id: result.provider_challenge_id().map(str::to_string),
            attempt_number: result.attempt_number(),
            retried_success: result.retried_success(),
            occurred_at: now,
        };
        self.pending_events.push(event);
        Ok(())
    }

    /// Mark a challenge FAILED. The request stays CHALLENGED so a fallback
    /// challenge can be opened.
    pub fn mark_challenge_failed(
        &mut self,
        challenge_id: Uuid,
        result: &ProviderResult,
        now: DateTime<Utc>,
    ) -> SignatureResult<()> {
        let id = self.id;
        let error_code = result.error_code().unwrap_or("UNKNOWN").to_string();
        let challenge = self.challenge_mut(challenge_id)?;
        challenge.mark_as_failed(&error_code)?;
        let event = DomainEvent::ChallengeFailed {
            request_id: id,
            challenge_id,
            channel: challenge.channel_type(),
            provider: challenge.provider(),
            error_code,
            timed_out: result.timed_out(),
            attempt_number: result.attempt_number(),
            occurred_at: now,
        };
        self.pending_events.push(event);
        Ok(())
    }

    /// Check a submitted code. A match moves the challenge to COMPLETED; the
    /// request itself changes only in [`complete_signature`](Self::complete_signature).
    pub fn verify_challenge(
        &mut self,
        challenge_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> SignatureResult<VerificationOutcome> {
        if self.status != SignatureStatus::Challenged {
            return Err(SignatureError::InvalidTransition {
                from: self.status.as_str(),
                to: ChallengeStatus::Completed.as_str(),
            });
        }
        self.challenge_mut(challenge_id)?.verify(code, now)
    }

    /// CHALLENGED -> SIGNED. `challenge` must be one of this request's own
    /// challenges (checked through its owning-request reference) and must be
    /// COMPLETED.
    pub fn complete_signature(&mut self, challenge: &SignatureChallenge, now: DateTime<Utc>) -> SignatureResult<()> {
        let owned = self
            .challenges
            .iter()
            .find(|c| c.id() == challenge.id())
            .filter(|_| challenge.signature_request_id() == self.id)
            .ok_or(SignatureError::ChallengeNotOwned {
                request_id: self.id,
                challenge_id: challenge.id(),
            })?;

        if owned.status() != ChallengeStatus::Completed
            || challenge.status() != ChallengeStatus::Completed
        {
            return Err(SignatureError::InvalidTransition {
                from: owned.status().as_str(),
                to: SignatureStatus::Signed.as_str(),
            });
        }
        if self.status != SignatureStatus::Challenged {
            return Err(self.invalid_transition(SignatureStatus::Signed));
        }

        let event = DomainEvent::SignatureCompleted {
            request_id: self.id,
            customer_id: self.customer_id.clone(),
            challenge_id: owned.id(),
            channel: owned.channel_type(),
            provider: owned.provider(),
            provider_proof: owned.provider_proof().map(str::to_string),
            signed_at: now,
        };
        self.status = SignatureStatus::Signed;
        self.signed_at = Some(now);
        self.pending_events.push(event);
        Ok(())
    }

    /// Any non-terminal status -> ABORTED. A SIGNED request can never be aborted.
    pub fn abort_signature(&mut self, reason: AbortReason, now: DateTime<Utc>) -> SignatureResult<()> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(SignatureStatus::Aborted));
        }
        for challenge in self.challenges.iter_mut().filter(|c| c.is_active()) {
            challenge.mark_as_failed("REQUEST_ABORTED")?;
        }
        self.status = SignatureStatus::Aborted;
        self.aborted_at = Some(now);
        self.abort_reason = Some(reason);
        self.pending_events.push(DomainEvent::SignatureAborted {
            request_id: self.id,
            reason,
            aborted_at: now,
        });
        Ok(())
    }

    /// Any non-terminal status -> FAILED, for provider errors no channel can fix.
    pub fn mark_as_failed(&mut self, error_code: &str, now: DateTime<Utc>) -> SignatureResult<()> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(SignatureStatus::Failed));
        }
        for challenge in self.challenges.iter_mut() {
            challenge.expire();
        }
        self.status = SignatureStatus::Failed;
        self.pending_events.push(DomainEvent::SignatureFailed {
            request_id: self.id,
            error_code: error_code.to_string(),
            occurred_at: now,
        });
        Ok(())
    }

    /// Move to EXPIRED without checking the clock; the sweep decides when.
    /// Returns `false` and changes nothing if the request already settled.
    pub fn mark_as_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        for challenge in self.challenges.iter_mut() {
            challenge.expire();
        }
        self.status = SignatureStatus::Expired;
        self.pending_events.push(DomainEvent::SignatureExpired {
            request_id: self.id,
            expired_at: now,
        });
        true
    }

    fn ensure_no_active_challenge(&self) -> SignatureResult<()> {
        match self.active_challenge() {
            Some(active) => Err(SignatureError::ChallengeAlreadyActive {
                request_id: self.id,
                active_challenge_id: active.id(),
            }),
            None => Ok(()),
        }
    }

    fn challenge_mut(&mut self, challenge_id: Uuid) -> SignatureResult<&mut SignatureChallenge> {
        self.challenges
            .iter_mut()
            .find(|c| c.id() == challenge_id)
            .ok_or(SignatureError::ChallengeNotFound(challenge_id))
    }

    fn invalid_transition(&self, to: SignatureStatus) -> SignatureError {
        SignatureError::InvalidTransition {
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;

    fn context() -> TransactionContext {
        TransactionContext::sealed(
            Money::parse("100.00", "EUR").unwrap(),
            "merchant-1",
            "order-1",
            "Online purchase",
        )
        .unwrap()
    }

    fn request(now: DateTime<Utc>) -> SignatureRequest {
        SignatureRequest::new("cust-7f3a", context(), DEFAULT_TTL, now).unwrap()
    }

    fn active_count(req: &SignatureRequest) -> usize {
        req.challenges().iter().filter(|c| c.is_active()).count()
    }

    fn sent_sms(now: DateTime<Utc>) -> (SignatureRequest, Uuid) {
        let mut req = request(now);
        let id = req
            .create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", now)
            .unwrap()
            .id();
        req.mark_challenge_sent(id, &ProviderResult::success("sid-1", "X"), now)
            .unwrap();
        (req, id)
    }

    #[test]
    fn new_request_is_pending_with_created_event() {
        let now = Utc::now();
        let req = request(now);
        assert_eq!(req.status(), SignatureStatus::Pending);
        assert_eq!(req.expires_at(), now + DEFAULT_TTL);
        assert_eq!(req.pending_events().len(), 1);
        assert_eq!(req.pending_events()[0].event_type(), "SIGNATURE_REQUEST_CREATED");
    }

    #[test]
    fn blank_customer_is_rejected() {
        let err = SignatureRequest::new("  ", context(), DEFAULT_TTL, Utc::now()).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidTransactionContext(_)));
    }

    #[test]
    fn create_challenge_moves_to_challenged() {
        let now = Utc::now();
        let mut req = request(now);
        let challenge = req
            .create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", now)
            .unwrap()
            .clone();

        assert_eq!(challenge.status(), ChallengeStatus::Pending);
        assert_eq!(challenge.signature_request_id(), req.id());
        assert_eq!(req.status(), SignatureStatus::Challenged);
        assert_eq!(req.routing_timeline().len(), 1);
        assert_eq!(
            req.routing_timeline()[0].event_type,
            RoutingEventType::ChallengeCreated
        );
        assert_eq!(req.routing_timeline()[0].to_channel, ChannelType::Sms);
    }

    #[test]
    fn second_challenge_rejected_while_active_for_every_channel() {
        let now = Utc::now();
        for channel in ChannelType::ALL {
            let mut req = request(now);
            req.create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", now)
                .unwrap();
            let err = req
                .create_challenge(channel, channel.provider(), "again", now)
                .unwrap_err();
            assert!(matches!(err, SignatureError::ChallengeAlreadyActive { .. }));
            assert_eq!(active_count(&req), 1);
            assert_eq!(req.challenges().len(), 1);
        }
    }

    #[test]
    fn sent_challenge_still_blocks_new_challenge() {
        let now = Utc::now();
        let (mut req, _) = sent_sms(now);
        let err = req
            .create_challenge(ChannelType::Voice, ProviderType::Voice, "again", now)
            .unwrap_err();
        assert!(matches!(err, SignatureError::ChallengeAlreadyActive { .. }));
    }

    #[test]
    fn happy_path_signs_with_sms_proof() {
        let now = Utc::now();
        let (mut req, challenge_id) = sent_sms(now);
        req.take_events();

        let code = req.challenge(challenge_id).unwrap().challenge_code().to_string();
        assert_eq!(
            req.verify_challenge(challenge_id, &code, now).unwrap(),
            VerificationOutcome::Verified
        );
        let completed = req.challenge(challenge_id).unwrap().clone();
        req.complete_signature(&completed, now).unwrap();

        assert_eq!(req.status(), SignatureStatus::Signed);
        assert_eq!(req.signed_at(), Some(now));
        let events = req.take_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DomainEvent::SignatureCompleted {
                channel,
                provider_proof,
                ..
            } => {
                assert_eq!(*channel, ChannelType::Sms);
                assert_eq!(provider_proof.as_deref(), Some("X"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn complete_requires_completed_challenge() {
        let now = Utc::now();
        let (mut req, challenge_id) = sent_sms(now);
        let sent = req.challenge(challenge_id).unwrap().clone();

        let err = req.complete_signature(&sent, now).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidTransition { to: "SIGNED", .. }));
        assert_eq!(req.status(), SignatureStatus::Challenged);
        assert_eq!(req.signed_at(), None);
    }

    #[test]
    fn complete_rejects_foreign_challenge_even_with_same_shape() {
        let now = Utc::now();
        let (mut req, _) = sent_sms(now);
        let (mut other, other_id) = sent_sms(now);
        let code = other.challenge(other_id).unwrap().challenge_code().to_string();
        other.verify_challenge(other_id, &code, now).unwrap();
        let foreign = other.challenge(other_id).unwrap().clone();

        let err = req.complete_signature(&foreign, now).unwrap_err();
        assert!(matches!(err, SignatureError::ChallengeNotOwned { .. }));
        assert_eq!(req.status(), SignatureStatus::Challenged);
    }

    #[test]
    fn fallback_after_failure_records_timeline_in_order() {
        let now = Utc::now();
        let mut req = request(now);
        let sms = req
            .create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", now)
            .unwrap()
            .id();
        req.mark_challenge_failed(sms, &ProviderResult::timeout(std::time::Duration::from_secs(5)), now)
            .unwrap();
        assert_eq!(req.challenge(sms).unwrap().error_code(), Some("TIMEOUT"));

        req.create_challenge(ChannelType::Voice, ProviderType::Voice, "TIMEOUT", now)
            .unwrap();

        let timeline = req.routing_timeline();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].to_channel, ChannelType::Sms);
        assert_eq!(timeline[1].to_channel, ChannelType::Voice);
        assert_eq!(timeline[1].from_channel, Some(ChannelType::Sms));
        assert_eq!(active_count(&req), 1);
        assert!(req
            .pending_events()
            .iter()
            .any(|e| e.event_type() == "FALLBACK_TRIGGERED"));
    }

    #[test]
    fn abort_never_succeeds_when_signed() {
        let now = Utc::now();
        let (mut req, challenge_id) = sent_sms(now);
        let code = req.challenge(challenge_id).unwrap().challenge_code().to_string();
        req.verify_challenge(challenge_id, &code, now).unwrap();
        let completed = req.challenge(challenge_id).unwrap().clone();
        req.complete_signature(&completed, now).unwrap();

        for reason in [
            AbortReason::UserCancelled,
            AbortReason::FraudDetected,
            AbortReason::AdminIntervention,
        ] {
            let err = req.abort_signature(reason, now).unwrap_err();
            assert!(matches!(err, SignatureError::InvalidTransition { from: "SIGNED", .. }));
        }
        assert_eq!(req.status(), SignatureStatus::Signed);
        assert_eq!(req.abort_reason(), None);
    }

    #[test]
    fn abort_settles_active_challenge() {
        let now = Utc::now();
        let (mut req, challenge_id) = sent_sms(now);
        req.abort_signature(AbortReason::FraudDetected, now).unwrap();
        assert_eq!(req.status(), SignatureStatus::Aborted);
        assert_eq!(req.abort_reason(), Some(AbortReason::FraudDetected));
        assert_eq!(req.aborted_at(), Some(now));
        assert_eq!(
            req.challenge(challenge_id).unwrap().status(),
            ChallengeStatus::Failed
        );
        assert_eq!(active_count(&req), 0);
    }

    #[test]
    fn remaining_ttl_negative_iff_expired() {
        let now = Utc::now();
        let req = request(now);
        for offset_secs in [0, 60, 179, 180, 181, 600] {
            let at = now + Duration::seconds(offset_secs);
            let negative = req.remaining_ttl(at) < Duration::zero();
            assert_eq!(negative, req.is_expired(at), "offset {offset_secs}");
        }
    }

    #[test]
    fn mark_as_expired_leaves_settled_requests_alone() {
        let now = Utc::now();
        let mut req = request(now);
        req.abort_signature(AbortReason::UserCancelled, now).unwrap();
        assert!(!req.mark_as_expired(now));
        assert_eq!(req.status(), SignatureStatus::Aborted);

        let (mut live, challenge_id) = sent_sms(now);
        assert!(live.mark_as_expired(now + Duration::minutes(5)));
        assert_eq!(live.status(), SignatureStatus::Expired);
        assert_eq!(
            live.challenge(challenge_id).unwrap().status(),
            ChallengeStatus::Expired
        );
    }

    #[test]
    fn parked_request_resumes_with_existing_challenge() {
        let now = Utc::now();
        let mut req = request(now);
        let parked = req
            .park_degraded(ChannelType::Sms, ProviderType::Sms, "degraded", now)
            .unwrap()
            .id();
        assert_eq!(req.status(), SignatureStatus::PendingDegraded);

        let err = req
            .create_challenge(ChannelType::Push, ProviderType::Push, "nope", now)
            .unwrap_err();
        assert!(matches!(err, SignatureError::ChallengeAlreadyActive { .. }));

        req.resume_from_degraded(&ProviderResult::success("sid", "proof"), now)
            .unwrap();
        assert_eq!(req.status(), SignatureStatus::Challenged);
        assert_eq!(req.challenges().len(), 1);
        assert_eq!(req.challenge(parked).unwrap().status(), ChallengeStatus::Sent);
        assert_eq!(
            req.routing_timeline().last().unwrap().event_type,
            RoutingEventType::DegradedRecovered
        );
    }

    #[test]
    fn serde_round_trip_preserves_timeline_and_context() {
        let now = Utc::now();
        let (req, _) = sent_sms(now);
        let json = serde_json::to_vec(&req).unwrap();
        let restored: SignatureRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored.transaction_context(), req.transaction_context());
        assert_eq!(restored.routing_timeline(), req.routing_timeline());
        assert_eq!(restored.challenges(), req.challenges());
        assert!(restored.pending_events().is_empty());
    }
}
