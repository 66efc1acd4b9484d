// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Business-rule violations raised by the signature aggregate.
//!
//! These are never retried. They reach the transport boundary once and are
//! mapped there (see `crate::error`).

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("challenge {active_challenge_id} is still active on signature request {request_id}")]
    ChallengeAlreadyActive {
        request_id: Uuid,
        active_challenge_id: Uuid,
    },

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("challenge {0} not found")]
    ChallengeNotFound(Uuid),

    #[error("challenge {challenge_id} does not belong to signature request {request_id}")]
    ChallengeNotOwned { request_id: Uuid, challenge_id: Uuid },

    #[error("challenge {0} has expired")]
    ChallengeExpired(Uuid),

    #[error("verification code does not match")]
    InvalidCode,

    #[error("invalid transaction context: {0}")]
    InvalidTransactionContext(String),

    #[error("secure random source unavailable")]
    EntropyUnavailable,

    #[error("signature request {0} not found")]
    RequestNotFound(Uuid),
}

pub type SignatureResult<T> = Result<T, SignatureError>;
