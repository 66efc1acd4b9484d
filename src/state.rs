// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::metrics::SharedMetrics;
use crate::providers::ProviderDispatcher;
use crate::resilience::{CircuitBreakerRegistry, DegradedModeManager, DegradedModeRecoveryService};
use crate::signature::SignatureService;

/// Handles shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub signatures: Arc<SignatureService>,
    pub modes: Arc<DegradedModeManager>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub dispatcher: Arc<ProviderDispatcher>,
    pub recovery: Arc<DegradedModeRecoveryService>,
    pub metrics: SharedMetrics,
}
