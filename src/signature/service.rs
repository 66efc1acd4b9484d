// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Orchestration of the signature lifecycle.
//!
//! Every state change is a load-mutate-save inside one [`SignatureTx`], and
//! the events the aggregate queued are written to the outbox in that same
//! transaction. Provider calls happen between transactions: a `SignatureTx`
//! is never held across an `.await`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    AbortReason, ChannelType, ProviderResult, SignatureChallenge, SignatureError,
    SignatureRequest, SignatureStatus, TransactionContext, VerificationOutcome,
};
use crate::metrics::SharedMetrics;
use crate::outbox::{OutboxError, OutboxPublisher};
use crate::providers::ProviderDispatcher;
use crate::routing::{RouteDecision, RoutingEngine};
use crate::storage::{SignatureDatabase, SignatureTx, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("outbox failure: {0}")]
    Outbox(#[from] OutboxError),

    #[error("signature request {0} not found")]
    NotFound(Uuid),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct CreateSignature {
    pub customer_id: String,
    pub transaction_context: TransactionContext,
    pub preferred_channel: Option<ChannelType>,
}

/// Result of one attempt to send a parked request's challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Sent,
    /// Delivery failed; the request stays PENDING_DEGRADED for the next pass.
    StillQueued { error_code: String },
    /// Permanent provider failure; the request is now FAILED.
    Failed { error_code: String },
    Expired,
    /// No longer PENDING_DEGRADED (settled or already resumed).
    Skipped,
}

/// What a delivery step decided, applied to metrics after commit.
enum DeliveryStep {
    Sent(ChannelType),
    Fallback { failed: ChannelType, to: ChannelType },
    Settled { failed: Option<ChannelType>, terminal: Option<SignatureStatus> },
}

pub struct SignatureService {
    db: Arc<SignatureDatabase>,
    publisher: OutboxPublisher,
    routing: Arc<RoutingEngine>,
    dispatcher: Arc<ProviderDispatcher>,
    metrics: SharedMetrics,
    ttl: Duration,
}

impl SignatureService {
    pub fn new(
        db: Arc<SignatureDatabase>,
        routing: Arc<RoutingEngine>,
        dispatcher: Arc<ProviderDispatcher>,
        metrics: SharedMetrics,
        ttl: Duration,
    ) -> Self {
        Self {
            db,
            publisher: OutboxPublisher::new(),
            routing,
            dispatcher,
            metrics,
            ttl,
        }
    }

    pub fn database(&self) -> &Arc<SignatureDatabase> {
        &self.db
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, id: Uuid) -> ServiceResult<SignatureRequest> {
        self.db.find_by_id(id)?.ok_or(ServiceError::NotFound(id))
    }

    pub fn find_by_customer(&self, customer_id: &str) -> ServiceResult<Vec<SignatureRequest>> {
        Ok(self.db.find_by_customer_id(customer_id)?)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Create a request, route it and, unless the system is degraded,
    /// deliver its first challenge (falling back across channels as needed).
    pub async fn create_request(&self, command: CreateSignature) -> ServiceResult<SignatureRequest> {
        let now = Utc::now();
        let mut request = SignatureRequest::new(
            command.customer_id,
            command.transaction_context,
            self.ttl,
            now,
        )?;
        let id = request.id();
        let decision = self.routing.route_initial(command.preferred_channel);

        for channel in decision.skipped() {
            request.note_circuit_skip(*channel, now);
        }

        let mut exhausted = false;
        match &decision {
            RouteDecision::Dispatch { channel, provider, reason, .. } => {
                request.create_challenge(*channel, *provider, reason, now)?;
            }
            RouteDecision::Defer { channel, provider, reason } => {
                request.park_degraded(*channel, *provider, reason, now)?;
            }
            RouteDecision::Exhausted { .. } => {
                request.abort_signature(AbortReason::FallbackExhausted, now)?;
                exhausted = true;
            }
        }

        self.in_tx(|tx| self.persist(tx, &mut request))?;
        self.metrics.request_created();
        info!(
            request_id = %id,
            status = %request.status(),
            decision = ?decision,
            "Signature request created"
        );

        match decision {
            RouteDecision::Dispatch { .. } => self.deliver(id).await,
            _ => {
                if exhausted {
                    self.metrics.request_aborted(AbortReason::FallbackExhausted.as_str());
                    warn!(request_id = %id, "No callable channel, request aborted");
                }
                Ok(request)
            }
        }
    }

    /// Send the request's PENDING challenge; on failure open the next
    /// fallback challenge and send that, until one is SENT or the chain ends.
    pub async fn deliver(&self, id: Uuid) -> ServiceResult<SignatureRequest> {
        loop {
            let request = self.get(id)?;
            if request.status() != SignatureStatus::Challenged {
                return Ok(request);
            }
            let Some(challenge) = pending_challenge(&request) else {
                return Ok(request);
            };

            let result = self.dispatcher.dispatch(&challenge, request.customer_id()).await;
            let now = Utc::now();

            let step = self.in_tx(|tx| {
                let mut request = load(tx, id)?;
                let step = self.apply_delivery(&mut request, &challenge, &result, now)?;
                self.persist(tx, &mut request)?;
                Ok(step)
            })?;

            match step {
                DeliveryStep::Sent(channel) => {
                    self.metrics.challenge_sent(channel.as_str());
                    info!(request_id = %id, %channel, "Challenge sent");
                    return self.get(id);
                }
                DeliveryStep::Fallback { failed, to } => {
                    self.metrics.challenge_failed(failed.as_str());
                    self.metrics.fallback(failed.as_str(), to.as_str());
                    info!(request_id = %id, from = %failed, %to, "Routing fallback");
                }
                DeliveryStep::Settled { failed, terminal } => {
                    if let Some(failed) = failed {
                        self.metrics.challenge_failed(failed.as_str());
                    }
                    match terminal {
                        Some(SignatureStatus::Aborted) => self
                            .metrics
                            .request_aborted(AbortReason::FallbackExhausted.as_str()),
                        Some(SignatureStatus::Expired) => self.metrics.request_expired(),
                        _ => {}
                    }
                    return self.get(id);
                }
            }
        }
    }

    fn apply_delivery(
        &self,
        request: &mut SignatureRequest,
        challenge: &SignatureChallenge,
        result: &ProviderResult,
        now: DateTime<Utc>,
    ) -> ServiceResult<DeliveryStep> {
        let still_pending = request
            .challenge(challenge.id())
            .is_some_and(|c| c.status() == crate::domain::ChallengeStatus::Pending);
        if request.status() != SignatureStatus::Challenged || !still_pending {
            debug!(request_id = %request.id(), "Request moved on while the provider was called");
            return Ok(DeliveryStep::Settled { failed: None, terminal: None });
        }

        let failed = challenge.channel_type();
        if result.is_success() {
            request.mark_challenge_sent(challenge.id(), result, now)?;
            return Ok(DeliveryStep::Sent(failed));
        }

        request.mark_challenge_failed(challenge.id(), result, now)?;
        let error_code = result.error_code().unwrap_or("UNKNOWN");

        if request.is_expired(now) {
            request.mark_as_expired(now);
            return Ok(DeliveryStep::Settled {
                failed: Some(failed),
                terminal: Some(SignatureStatus::Expired),
            });
        }

        if !RoutingEngine::should_fallback(result) {
            warn!(request_id = %request.id(), error_code, "Permanent provider failure");
            request.mark_as_failed(error_code, now)?;
            return Ok(DeliveryStep::Settled {
                failed: Some(failed),
                terminal: Some(SignatureStatus::Failed),
            });
        }

        let decision = self.routing.route_fallback(failed, &request.attempted_channels());
        for channel in decision.skipped() {
            request.note_circuit_skip(*channel, now);
        }
        match decision {
            RouteDecision::Dispatch { channel, provider, reason, .. } => {
                request.create_challenge(channel, provider, &format!("{reason}: {error_code}"), now)?;
                Ok(DeliveryStep::Fallback { failed, to: channel })
            }
            RouteDecision::Defer { .. } | RouteDecision::Exhausted { .. } => {
                warn!(request_id = %request.id(), %failed, error_code, "Fallback chain exhausted");
                request.abort_signature(AbortReason::FallbackExhausted, now)?;
                Ok(DeliveryStep::Settled {
                    failed: Some(failed),
                    terminal: Some(SignatureStatus::Aborted),
                })
            }
        }
    }

    /// Verify `code` against a SENT challenge and, on a match, sign the request.
    pub fn complete_signature(
        &self,
        id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> ServiceResult<SignatureRequest> {
        let now = Utc::now();
        let (request, outcome) = self.in_tx(|tx| {
            let mut request = load(tx, id)?;
            let outcome = request.verify_challenge(challenge_id, code, now)?;
            match outcome {
                VerificationOutcome::Verified => {
                    let challenge = request
                        .challenge(challenge_id)
                        .cloned()
                        .ok_or(SignatureError::ChallengeNotFound(challenge_id))?;
                    request.complete_signature(&challenge, now)?;
                }
                VerificationOutcome::Expired => {
                    if request.is_expired(now) {
                        request.mark_as_expired(now);
                    }
                }
            }
            self.persist(tx, &mut request)?;
            Ok((request, outcome))
        })?;

        match outcome {
            VerificationOutcome::Verified => {
                if let Some(channel) = request.challenge(challenge_id).map(|c| c.channel_type()) {
                    self.metrics.challenge_completed(channel.as_str());
                    self.metrics.request_completed(channel.as_str());
                }
                info!(request_id = %id, challenge_id = %challenge_id, "Signature completed");
                Ok(request)
            }
            VerificationOutcome::Expired => {
                if request.status() == SignatureStatus::Expired {
                    self.metrics.request_expired();
                }
                Err(SignatureError::ChallengeExpired(challenge_id).into())
            }
        }
    }

    pub fn abort_signature(&self, id: Uuid, reason: AbortReason) -> ServiceResult<SignatureRequest> {
        let now = Utc::now();
        let request = self.in_tx(|tx| {
            let mut request = load(tx, id)?;
            request.abort_signature(reason, now)?;
            self.persist(tx, &mut request)?;
            Ok(request)
        })?;
        self.metrics.request_aborted(reason.as_str());
        info!(request_id = %id, reason = %reason.as_str(), "Signature aborted");
        Ok(request)
    }

    /// Expire up to `limit` requests whose TTL passed before `now`, one
    /// transaction each. Returns how many were expired.
    pub fn expire_due(&self, now: DateTime<Utc>, limit: usize) -> ServiceResult<usize> {
        let candidates = self.db.find_expired(now, limit)?;
        let mut expired = 0;
        for candidate in candidates {
            let id = candidate.id();
            match self.expire_one(id, now) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => warn!(request_id = %id, error = %e, "Failed to expire signature request"),
            }
        }
        Ok(expired)
    }

    fn expire_one(&self, id: Uuid, now: DateTime<Utc>) -> ServiceResult<bool> {
        let expired = self.in_tx(|tx| {
            let mut request = load(tx, id)?;
            if !request.is_expired(now) || !request.mark_as_expired(now) {
                return Ok(false);
            }
            self.persist(tx, &mut request)?;
            Ok(true)
        })?;
        if expired {
            self.metrics.request_expired();
            debug!(request_id = %id, "Signature request expired");
        }
        Ok(expired)
    }

    /// Send the challenge created when `id` was parked in PENDING_DEGRADED.
    /// The existing challenge is resent; no new challenge is created.
    pub async fn resume_degraded(&self, id: Uuid) -> ServiceResult<RecoveryOutcome> {
        let request = self.get(id)?;
        if request.status() != SignatureStatus::PendingDegraded {
            return Ok(RecoveryOutcome::Skipped);
        }

        let now = Utc::now();
        if request.is_expired(now) {
            return Ok(if self.expire_one(id, now)? {
                RecoveryOutcome::Expired
            } else {
                RecoveryOutcome::Skipped
            });
        }

        let Some(challenge) = pending_challenge(&request) else {
            return Ok(RecoveryOutcome::Skipped);
        };

        let result = self.dispatcher.dispatch(&challenge, request.customer_id()).await;
        let now = Utc::now();

        if !result.is_success() && !result.is_permanent_failure() {
            let error_code = result.error_code().unwrap_or("UNKNOWN").to_string();
            debug!(request_id = %id, %error_code, "Recovery send failed, request stays queued");
            return Ok(RecoveryOutcome::StillQueued { error_code });
        }

        let outcome = self.in_tx(|tx| {
            let mut request = load(tx, id)?;
            if request.status() != SignatureStatus::PendingDegraded {
                return Ok(RecoveryOutcome::Skipped);
            }
            let outcome = if result.is_success() {
                request.resume_from_degraded(&result, now)?;
                RecoveryOutcome::Sent
            } else {
                let error_code = result.error_code().unwrap_or("UNKNOWN").to_string();
                request.mark_as_failed(&error_code, now)?;
                RecoveryOutcome::Failed { error_code }
            };
            self.persist(tx, &mut request)?;
            Ok(outcome)
        })?;

        if outcome == RecoveryOutcome::Sent {
            self.metrics.challenge_sent(challenge.channel_type().as_str());
            info!(request_id = %id, channel = %challenge.channel_type(), "Parked challenge sent");
        }
        Ok(outcome)
    }

    // =========================================================================
    // Unit of work
    // =========================================================================

    /// Run `work` in one write transaction: commit on `Ok`, abort on `Err`.
    fn in_tx<T>(&self, work: impl FnOnce(&SignatureTx) -> ServiceResult<T>) -> ServiceResult<T> {
        let tx = self.db.begin()?;
        match work(&tx) {
            Ok(value) => {
                tx.commit()?;
                self.refresh_outbox_gauge();
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, "Failed to abort transaction");
                }
                Err(e)
            }
        }
    }

    /// Save the aggregate and append its queued events to the outbox.
    fn persist(&self, tx: &SignatureTx, request: &mut SignatureRequest) -> ServiceResult<()> {
        tx.save_request(request)?;
        let events = request.take_events();
        self.publisher.publish_all(tx, &events)?;
        Ok(())
    }

    fn refresh_outbox_gauge(&self) {
        match self.db.pending_count() {
            Ok(pending) => self.metrics.set_outbox_pending(pending),
            Err(e) => warn!(error = %e, "Failed to read outbox backlog"),
        }
    }
}

fn load(tx: &SignatureTx, id: Uuid) -> ServiceResult<SignatureRequest> {
    tx.load_request(id)?.ok_or(ServiceError::NotFound(id))
}

fn pending_challenge(request: &SignatureRequest) -> Option<SignatureChallenge> {
    request
        .challenges()
        .iter()
        .find(|c| c.status() == crate::domain::ChallengeStatus::Pending)
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::domain::{ChallengeStatus, ProviderType, RoutingEventType};
    use crate::providers::testing::ScriptedProvider;
    use crate::signature::testing::Harness;

    #[tokio::test]
    async fn sms_happy_path_signs_and_publishes_completion() {
        let h = Harness::new();
        let request = h.service.create_request(h.command("100.00")).await.unwrap();
        assert_eq!(request.status(), SignatureStatus::Challenged);

        let challenge = request.active_challenge().unwrap().clone();
        assert_eq!(challenge.status(), ChallengeStatus::Sent);
        assert_eq!(challenge.channel_type(), ChannelType::Sms);
        assert_eq!(challenge.provider_proof(), Some("X"));

        let signed = h
            .service
            .complete_signature(request.id(), challenge.id(), challenge.challenge_code())
            .unwrap();
        assert_eq!(signed.status(), SignatureStatus::Signed);
        assert!(signed.signed_at().is_some());

        let events = h.db.outbox_events_for(&request.id().to_string()).unwrap();
        let completed: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "SIGNATURE_COMPLETED")
            .collect();
        assert_eq!(completed.len(), 1);
        let envelope = completed[0].envelope().unwrap();
        assert_eq!(envelope.payload["channel"], "SMS");
        assert!(events.iter().all(|e| e.verify_hash()));
        assert_eq!(h.metrics.requests_completed_count("SMS"), 1.0);
    }

    #[tokio::test]
    async fn wrong_code_leaves_request_challenged() {
        let h = Harness::new();
        let request = h.service.create_request(h.command("10.00")).await.unwrap();
        let challenge = request.active_challenge().unwrap().clone();
        let wrong = if challenge.challenge_code() == "000000" { "111111" } else { "000000" };

        let err = h
            .service
            .complete_signature(request.id(), challenge.id(), wrong)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Signature(SignatureError::InvalidCode)));
        assert_eq!(h.service.get(request.id()).unwrap().status(), SignatureStatus::Challenged);
    }

    #[tokio::test(start_paused = true)]
    async fn sms_timeout_falls_back_to_voice() {
        let h = Harness::with_providers(vec![
            ScriptedProvider::always(ProviderType::Sms, ProviderResult::timeout(StdDuration::from_millis(100))),
            ScriptedProvider::ok(ProviderType::Voice),
        ]);
        let request = h.service.create_request(h.command("100.00")).await.unwrap();

        assert_eq!(request.status(), SignatureStatus::Challenged);
        let channels: Vec<_> = request.challenges().iter().map(|c| c.channel_type()).collect();
        assert_eq!(channels, vec![ChannelType::Sms, ChannelType::Voice]);
        assert_eq!(request.challenges()[0].status(), ChallengeStatus::Failed);
        assert_eq!(request.challenges()[0].error_code(), Some("TIMEOUT"));
        assert_eq!(request.challenges()[1].status(), ChallengeStatus::Sent);

        let timeline: Vec<_> = request.routing_timeline().iter().map(|e| e.to_channel).collect();
        assert_eq!(timeline, vec![ChannelType::Sms, ChannelType::Voice]);
        assert_eq!(request.routing_timeline()[1].from_channel, Some(ChannelType::Sms));
        assert_eq!(h.metrics.fallback_count("SMS", "VOICE"), 1.0);

        let types: Vec<_> = h
            .db
            .outbox_events_for(&request.id().to_string())
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&"FALLBACK_TRIGGERED".to_string()));
        assert!(types.contains(&"CHALLENGE_FAILED".to_string()));
    }

    #[tokio::test]
    async fn rolled_back_fallback_is_not_counted() {
        let h = Harness::new();
        let now = Utc::now();
        let ctx = TransactionContext::sealed(
            crate::domain::Money::parse("10.00", "EUR").unwrap(),
            "merchant-1",
            "order-1",
            "purchase",
        )
        .unwrap();
        let mut request = SignatureRequest::new("cust-1", ctx, Duration::minutes(3), now).unwrap();
        request
            .create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", now)
            .unwrap();
        let challenge = pending_challenge(&request).unwrap();
        let timeout = ProviderResult::timeout(StdDuration::from_millis(100));

        let result = h.service.in_tx(|_tx| {
            let step = h.service.apply_delivery(&mut request, &challenge, &timeout, now)?;
            assert!(matches!(
                step,
                DeliveryStep::Fallback { failed: ChannelType::Sms, to: ChannelType::Voice }
            ));
            Err::<(), _>(ServiceError::NotFound(request.id()))
        });

        assert!(result.is_err());
        assert_eq!(h.metrics.fallback_count("SMS", "VOICE"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_aborts_request() {
        let failing = |p| ScriptedProvider::always(p, ProviderResult::failure("GATEWAY_DOWN", "down"));
        let h = Harness::with_providers(vec![failing(ProviderType::Sms), failing(ProviderType::Voice)]);
        let request = h.service.create_request(h.command("5.00")).await.unwrap();

        assert_eq!(request.status(), SignatureStatus::Aborted);
        assert_eq!(request.abort_reason(), Some(AbortReason::FallbackExhausted));
        assert!(request.active_challenge().is_none());
        let types: Vec<_> = h
            .db
            .outbox_events_for(&request.id().to_string())
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types.last().map(String::as_str), Some("SIGNATURE_ABORTED"));
    }

    #[tokio::test]
    async fn permanent_failure_fails_request_without_fallback() {
        let h = Harness::with_providers(vec![
            ScriptedProvider::always(ProviderType::Sms, ProviderResult::failure("INVALID_RECIPIENT", "no such customer")),
            ScriptedProvider::ok(ProviderType::Voice),
        ]);
        let request = h.service.create_request(h.command("5.00")).await.unwrap();
        assert_eq!(request.status(), SignatureStatus::Failed);
        assert_eq!(request.challenges().len(), 1);
    }

    #[tokio::test]
    async fn open_breaker_is_skipped_and_recorded() {
        let h = Harness::new();
        h.breakers.force_open(ProviderType::Sms);
        let request = h.service.create_request(h.command("5.00")).await.unwrap();

        assert_eq!(request.status(), SignatureStatus::Challenged);
        assert_eq!(request.active_challenge().unwrap().channel_type(), ChannelType::Voice);
        assert_eq!(
            request.routing_timeline()[0].event_type,
            RoutingEventType::CircuitOpenSkipped
        );
    }

    #[tokio::test]
    async fn degraded_mode_parks_request_with_pending_challenge() {
        let h = Harness::new();
        h.modes.enter_degraded_mode("operator drill");
        let request = h.service.create_request(h.command("5.00")).await.unwrap();

        assert_eq!(request.status(), SignatureStatus::PendingDegraded);
        let parked = request.challenges();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].status(), ChallengeStatus::Pending);

        h.modes.exit_degraded_mode();
        let outcome = h.service.resume_degraded(request.id()).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Sent);

        let resumed = h.service.get(request.id()).unwrap();
        assert_eq!(resumed.status(), SignatureStatus::Challenged);
        assert_eq!(resumed.challenges().len(), 1);
        assert_eq!(resumed.challenges()[0].id(), parked[0].id());
        assert_eq!(resumed.challenges()[0].status(), ChallengeStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_recovery_send_keeps_request_queued() {
        let h = Harness::with_providers(vec![ScriptedProvider::always(
            ProviderType::Sms,
            ProviderResult::failure("GATEWAY_DOWN", "down"),
        )]);
        h.modes.enter_degraded_mode("drill");
        let request = h.service.create_request(h.command("5.00")).await.unwrap();
        h.modes.exit_degraded_mode();

        let outcome = h.service.resume_degraded(request.id()).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::StillQueued { .. }));
        let stored = h.service.get(request.id()).unwrap();
        assert_eq!(stored.status(), SignatureStatus::PendingDegraded);
        assert_eq!(stored.challenges()[0].status(), ChallengeStatus::Pending);
    }

    #[tokio::test]
    async fn abort_is_rejected_once_signed() {
        let h = Harness::new();
        let request = h.service.create_request(h.command("1.00")).await.unwrap();
        let challenge = request.active_challenge().unwrap().clone();
        h.service
            .complete_signature(request.id(), challenge.id(), challenge.challenge_code())
            .unwrap();

        let err = h
            .service
            .abort_signature(request.id(), AbortReason::UserCancelled)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Signature(SignatureError::InvalidTransition { .. })
        ));
        assert_eq!(h.service.get(request.id()).unwrap().status(), SignatureStatus::Signed);
    }

    #[tokio::test]
    async fn abort_fails_active_challenge() {
        let h = Harness::new();
        let request = h.service.create_request(h.command("1.00")).await.unwrap();
        let aborted = h
            .service
            .abort_signature(request.id(), AbortReason::UserCancelled)
            .unwrap();
        assert_eq!(aborted.status(), SignatureStatus::Aborted);
        assert!(aborted.active_challenge().is_none());
    }

    #[tokio::test]
    async fn expiry_sweep_expires_only_overdue_requests() {
        let h = Harness::new();
        let request = h.service.create_request(h.command("1.00")).await.unwrap();

        assert_eq!(h.service.expire_due(Utc::now(), 10).unwrap(), 0);
        let later = request.expires_at() + Duration::seconds(1);
        assert_eq!(h.service.expire_due(later, 10).unwrap(), 1);

        let expired = h.service.get(request.id()).unwrap();
        assert_eq!(expired.status(), SignatureStatus::Expired);
        assert!(expired.active_challenge().is_none());
        // A second sweep finds nothing.
        assert_eq!(h.service.expire_due(later, 10).unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let h = Harness::new();
        let id = Uuid::now_v7();
        assert!(matches!(h.service.get(id), Err(ServiceError::NotFound(x)) if x == id));
        assert!(matches!(
            h.service.abort_signature(id, AbortReason::AdminIntervention),
            Err(ServiceError::NotFound(_))
        ));
    }
}
