// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One delivery attempt of a one-time code over one channel.
//!
//! ```text
//! PENDING ──markAsSent──▶ SENT ──verify──▶ COMPLETED
//!    │                     │
//!    └──────fail───────────┴──▶ FAILED
//!    └──────ttl────────────┴──▶ EXPIRED
//! ```
//!
//! Challenges are owned by exactly one `SignatureRequest`; every mutator is
//! crate-private and reached through the aggregate.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::channel::{ChannelType, ProviderType};
use super::error::{SignatureError, SignatureResult};
use super::provider_result::ProviderResult;

const CODE_DIGITS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Pending,
    Sent,
    Completed,
    Failed,
    Expired,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "PENDING",
            ChallengeStatus::Sent => "SENT",
            ChallengeStatus::Completed => "COMPLETED",
            ChallengeStatus::Failed => "FAILED",
            ChallengeStatus::Expired => "EXPIRED",
        }
    }

    /// PENDING and SENT block the creation of another challenge.
    pub fn is_active(&self) -> bool {
        matches!(self, ChallengeStatus::Pending | ChallengeStatus::Sent)
    }
}

/// Result of checking a submitted code against a SENT challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    /// The challenge outlived its TTL and is now EXPIRED.
    Expired,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureChallenge {
    id: Uuid,
    signature_request_id: Uuid,
    channel_type: ChannelType,
    provider: ProviderType,
    status: ChallengeStatus,
    challenge_code: String,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    provider_challenge_id: Option<String>,
    provider_proof: Option<String>,
    error_code: Option<String>,
}

impl SignatureChallenge {
    pub(crate) fn new(
        signature_request_id: Uuid,
        channel_type: ChannelType,
        provider: ProviderType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> SignatureResult<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            signature_request_id,
            channel_type,
            provider,
            status: ChallengeStatus::Pending,
            challenge_code: generate_code()?,
            created_at: now,
            sent_at: None,
            completed_at: None,
            expires_at: now + ttl,
            provider_challenge_id: None,
            provider_proof: None,
            error_code: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning request. Used for ownership checks, not just id equality.
    pub fn signature_request_id(&self) -> Uuid {
        self.signature_request_id
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn challenge_code(&self) -> &str {
        &self.challenge_code
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn provider_challenge_id(&self) -> Option<&str> {
        self.provider_challenge_id.as_deref()
    }

    pub fn provider_proof(&self) -> Option<&str> {
        self.provider_proof.as_deref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub(crate) fn mark_as_sent(&mut self, result: &ProviderResult, now: DateTime<Utc>) -> SignatureResult<()> {
        if self.status != ChallengeStatus::Pending || !result.is_success() {
            return Err(SignatureError::InvalidTransition {
                from: self.status.as_str(),
                to: ChallengeStatus::Sent.as_str(),
            });
        }
        self.status = ChallengeStatus::Sent;
        self.sent_at = Some(now);
        self.provider_challenge_id = result.provider_challenge_id().map(str::to_string);
        self.provider_proof = result.provider_proof().map(str::to_string);
        Ok(())
    }

    pub(crate) fn mark_as_failed(&mut self, error_code: &str) -> SignatureResult<()> {
        if !self.status.is_active() {
            return Err(SignatureError::InvalidTransition {
                from: self.status.as_str(),
                to: ChallengeStatus::Failed.as_str(),
            });
        }
        self.status = ChallengeStatus::Failed;
        self.error_code = Some(error_code.to_string());
        Ok(())
    }

    pub(crate) fn verify(&mut self, code: &str, now: DateTime<Utc>) -> SignatureResult<VerificationOutcome> {
        if self.status != ChallengeStatus::Sent {
            return Err(SignatureError::InvalidTransition {
                from: self.status.as_str(),
                to: ChallengeStatus::Completed.as_str(),
            });
        }
        if now > self.expires_at {
            self.status = ChallengeStatus::Expired;
            return Ok(VerificationOutcome::Expired);
        }
        if !codes_match(&self.challenge_code, code) {
            return Err(SignatureError::InvalidCode);
        }
        self.status = ChallengeStatus::Completed;
        self.completed_at = Some(now);
        Ok(VerificationOutcome::Verified)
    }

    /// Active challenges become EXPIRED; settled ones are left alone.
    pub(crate) fn expire(&mut self) {
        if self.status.is_active() {
            self.status = ChallengeStatus::Expired;
        }
    }
}

impl fmt::Debug for SignatureChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureChallenge")
            .field("id", &self.id)
            .field("signature_request_id", &self.signature_request_id)
            .field("channel_type", &self.channel_type)
            .field("provider", &self.provider)
            .field("status", &self.status)
            .field("challenge_code", &"******")
            .field("sent_at", &self.sent_at)
            .field("expires_at", &self.expires_at)
            .field("error_code", &self.error_code)
            .finish()
    }
}

fn generate_code() -> SignatureResult<String> {
    let mut bytes = [0u8; 4];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| SignatureError::EntropyUnavailable)?;
    let modulus = 10u32.pow(CODE_DIGITS);
    let value = u32::from_be_bytes(bytes) % modulus;
    Ok(format!("{value:06}"))
}

fn codes_match(expected: &str, submitted: &str) -> bool {
    #[allow(deprecated)]
    ring::constant_time::verify_slices_are_equal(expected.as_bytes(), submitted.trim().as_bytes())
        .is_ok()
}
