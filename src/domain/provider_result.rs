// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outcome of one provider delivery attempt (or of a retried series).
//!
//! Only the named constructors build a `ProviderResult`, which keeps the
//! success / failure fields from mixing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error code recorded for calls cut off by the per-call timeout.
pub const TIMEOUT_ERROR_CODE: &str = "TIMEOUT";

/// Error codes a retry or a different channel cannot fix.
const PERMANENT_ERROR_CODES: &[&str] = &["INVALID_RECIPIENT", "RECIPIENT_OPTED_OUT"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    success: bool,
    provider_challenge_id: Option<String>,
    provider_proof: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
    timed_out: bool,
    attempt_number: u32,
    retried_success: bool,
}

impl ProviderResult {
    pub fn success(provider_challenge_id: impl Into<String>, provider_proof: impl Into<String>) -> Self {
        Self::succeeded(provider_challenge_id.into(), provider_proof.into(), 1)
    }

    /// Success on attempt `attempt_number`; `retried_success` is set when it
    /// took more than one attempt.
    pub fn success_after_retry(
        provider_challenge_id: impl Into<String>,
        provider_proof: impl Into<String>,
        attempt_number: u32,
    ) -> Self {
        Self::succeeded(
            provider_challenge_id.into(),
            provider_proof.into(),
            attempt_number.max(1),
        )
    }

    pub fn failure(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::failed(error_code.into(), error_message.into(), false, 1)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::failed(
            TIMEOUT_ERROR_CODE.to_string(),
            format!("provider did not answer within {} ms", limit.as_millis()),
            true,
            1,
        )
    }

    /// Final result after `attempts` failed attempts. Carries over the last
    /// attempt's error and timeout flag.
    pub fn retry_exhausted(last: &ProviderResult, attempts: u32) -> Self {
        Self::failed(
            last.error_code.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            format!(
                "retries exhausted after {} attempts: {}",
                attempts.max(1),
                last.error_message.as_deref().unwrap_or("no detail")
            ),
            last.timed_out,
            attempts.max(1),
        )
    }

    fn succeeded(provider_challenge_id: String, provider_proof: String, attempt_number: u32) -> Self {
        Self {
            success: true,
            provider_challenge_id: Some(provider_challenge_id),
            provider_proof: Some(provider_proof),
            error_code: None,
            error_message: None,
            timestamp: Utc::now(),
            timed_out: false,
            attempt_number,
            retried_success: attempt_number > 1,
        }
    }

    fn failed(error_code: String, error_message: String, timed_out: bool, attempt_number: u32) -> Self {
        Self {
            success: false,
            provider_challenge_id: None,
            provider_proof: None,
            error_code: Some(error_code),
            error_message: Some(error_message),
            timestamp: Utc::now(),
            timed_out,
            attempt_number,
            retried_success: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
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

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn retried_success(&self) -> bool {
        self.retried_success
    }

    /// Failures that neither a retry nor a fallback channel can fix.
    pub fn is_permanent_failure(&self) -> bool {
        !self.success
            && self
                .error_code
                .as_deref()
                .is_some_and(|code| PERMANENT_ERROR_CODES.contains(&code))
    }
}
