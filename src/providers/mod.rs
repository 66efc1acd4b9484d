// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Provider Gateways
//!
//! One [`SignatureProvider`] per channel delivers challenge codes. Providers
//! never return errors across this boundary: transport problems become
//! `ProviderResult::failure`, slow calls become `ProviderResult::timeout`
//! in the [`ProviderDispatcher`].

pub mod dispatcher;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ProviderResult, ProviderType, SignatureChallenge};

pub use dispatcher::{DispatcherConfig, ProviderDispatcher};
pub use http::HttpChannelProvider;
pub use retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub provider: ProviderType,
    pub status: HealthState,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn up(provider: ProviderType, details: impl Into<String>) -> Self {
        Self {
            provider,
            status: HealthState::Up,
            details: details.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn down(provider: ProviderType, details: impl Into<String>) -> Self {
        Self {
            provider,
            status: HealthState::Down,
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Failures inside a provider implementation. Converted to a
/// `ProviderResult` before leaving the provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration invalid: {0}")]
    Config(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SignatureProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Deliver `challenge` to `recipient` (a pseudonymized customer reference).
    async fn send_challenge(&self, challenge: &SignatureChallenge, recipient: &str) -> ProviderResult;

    async fn health_check(&self) -> HealthStatus;
}
