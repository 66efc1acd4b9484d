// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signature Domain
//!
//! The `SignatureRequest` aggregate and everything it owns: challenges, the
//! routing timeline, the transaction context, provider call results and the
//! closed set of domain events emitted by state transitions.
//!
//! Aggregates are not internally synchronized. Callers serialize access to a
//! single request through the storage write transaction.

pub mod challenge;
pub mod channel;
pub mod error;
pub mod events;
pub mod money;
pub mod provider_result;
pub mod request;

pub use challenge::{ChallengeStatus, SignatureChallenge, VerificationOutcome};
pub use channel::{ChannelType, ProviderType};
pub use error::{SignatureError, SignatureResult};
pub use events::DomainEvent;
pub use money::{minor_unit_scale, Money, TransactionContext};
pub use provider_result::ProviderResult;
pub use request::{
    AbortReason, RoutingEvent, RoutingEventType, SignatureRequest, SignatureStatus,
};
