// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Routing
//!
//! Picks the channel for a request's next challenge. Initial routing honours
//! the system mode (anything but NORMAL defers the request) and skips
//! channels whose breaker is open; fallback routing walks a fixed chain
//! (SMS -> VOICE, PUSH -> SMS, BIOMETRIC -> PUSH) and never revisits a
//! channel the request already tried.
//!
//! Only the non-emitting [`CircuitBreakerRegistry::is_available`] is used
//! here: routing runs inside a storage transaction and must not trigger
//! breaker transitions (whose listeners write to the outbox).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{ChannelType, ProviderResult, ProviderType};
use crate::resilience::{CircuitBreakerRegistry, DegradedModeManager, SystemMode};

#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    pub default_channel: ChannelType,
    pub enabled_channels: Vec<ChannelType>,
    fallback: HashMap<ChannelType, ChannelType>,
}

impl RoutingPolicy {
    pub fn new(default_channel: ChannelType, enabled_channels: Vec<ChannelType>) -> Self {
        let fallback = HashMap::from([
            (ChannelType::Sms, ChannelType::Voice),
            (ChannelType::Push, ChannelType::Sms),
            (ChannelType::Biometric, ChannelType::Push),
        ]);
        Self {
            default_channel,
            enabled_channels,
            fallback,
        }
    }

    pub fn fallback_for(&self, channel: ChannelType) -> Option<ChannelType> {
        self.fallback.get(&channel).copied()
    }

    pub fn is_enabled(&self, channel: ChannelType) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(ChannelType::Sms, ChannelType::ALL.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Create a challenge on `channel` and send it now. `skipped` lists
    /// channels passed over because their breaker was open.
    Dispatch {
        channel: ChannelType,
        provider: ProviderType,
        reason: String,
        skipped: Vec<ChannelType>,
    },
    /// System not NORMAL: park the request on `channel` until recovery.
    Defer {
        channel: ChannelType,
        provider: ProviderType,
        reason: String,
    },
    /// No untried, callable channel left.
    Exhausted { skipped: Vec<ChannelType> },
}

impl RouteDecision {
    /// Channels passed over because their breaker was open.
    pub fn skipped(&self) -> &[ChannelType] {
        match self {
            RouteDecision::Dispatch { skipped, .. } | RouteDecision::Exhausted { skipped } => skipped,
            RouteDecision::Defer { .. } => &[],
        }
    }
}

pub struct RoutingEngine {
    policy: RoutingPolicy,
    modes: Arc<DegradedModeManager>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl RoutingEngine {
    pub fn new(
        policy: RoutingPolicy,
        modes: Arc<DegradedModeManager>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            policy,
            modes,
            breakers,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn route_initial(&self, preferred: Option<ChannelType>) -> RouteDecision {
        let start = preferred
            .filter(|c| self.policy.is_enabled(*c))
            .unwrap_or(self.policy.default_channel);

        let mode = self.modes.current_mode();
        if mode != SystemMode::Normal {
            debug!(%mode, channel = %start, "System not NORMAL, deferring request");
            return RouteDecision::Defer {
                channel: start,
                provider: start.provider(),
                reason: format!("system mode {mode}"),
            };
        }

        self.walk(start, &[], "initial routing")
    }

    /// Next channel after `failed` failed, skipping everything in `tried`.
    /// Records nothing; the caller counts the fallback once it is committed.
    pub fn route_fallback(&self, failed: ChannelType, tried: &[ChannelType]) -> RouteDecision {
        let Some(next) = self.policy.fallback_for(failed) else {
            return RouteDecision::Exhausted { skipped: Vec::new() };
        };
        self.walk(next, tried, &format!("fallback from {failed}"))
    }

    /// Whether a failed delivery should move on to the next channel.
    /// Permanent failures (bad recipient) follow the customer, not the channel.
    pub fn should_fallback(result: &ProviderResult) -> bool {
        !result.is_success() && !result.is_permanent_failure()
    }

    fn walk(&self, start: ChannelType, tried: &[ChannelType], reason: &str) -> RouteDecision {
        let mut skipped = Vec::new();
        let mut visited = tried.to_vec();
        let mut candidate = Some(start);

        while let Some(channel) = candidate {
            if visited.contains(&channel) {
                break;
            }
            visited.push(channel);

            if self.policy.is_enabled(channel) {
                if self.breakers.is_available(channel.provider()) {
                    return RouteDecision::Dispatch {
                        channel,
                        provider: channel.provider(),
                        reason: reason.to_string(),
                        skipped,
                    };
                }
                debug!(%channel, "Breaker open, skipping channel");
                skipped.push(channel);
            }
            candidate = self.policy.fallback_for(channel);
        }

        RouteDecision::Exhausted { skipped }
    }
}
