// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signature Service
//!
//! Drives requests through routing, provider delivery, fallback, completion,
//! abort and expiry, persisting each step together with its outbox events.

pub mod service;

pub use service::{
    CreateSignature, RecoveryOutcome, ServiceError, ServiceResult, SignatureService,
};

#[cfg(test)]
pub(crate) mod testing {
    //! Fully wired service over a temporary database and scripted providers.

    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::{Money, ProviderType, TransactionContext};
    use crate::metrics::{Metrics, SharedMetrics};
    use crate::outbox::OutboxCircuitBreakerListener;
    use crate::providers::testing::ScriptedProvider;
    use crate::providers::{DispatcherConfig, ProviderDispatcher, RetryPolicy, SignatureProvider};
    use crate::resilience::{
        CircuitBreakerConfig, CircuitBreakerRegistry, DegradedModeConfig, DegradedModeManager,
        ProviderHealthTracker,
    };
    use crate::routing::{RoutingEngine, RoutingPolicy};
    use crate::storage::SignatureDatabase;

    pub struct Harness {
        pub db: Arc<SignatureDatabase>,
        pub metrics: SharedMetrics,
        pub breakers: Arc<CircuitBreakerRegistry>,
        pub modes: Arc<DegradedModeManager>,
        pub dispatcher: Arc<ProviderDispatcher>,
        pub service: Arc<SignatureService>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        /// Every channel has a provider that always succeeds.
        pub fn new() -> Self {
            Self::with_providers(
                ProviderType::ALL
                    .into_iter()
                    .map(ScriptedProvider::ok)
                    .collect(),
            )
        }

        pub fn with_providers(providers: Vec<ScriptedProvider>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(SignatureDatabase::open(&dir.path().join("signatures.redb")).unwrap());
            let metrics = Metrics::shared().unwrap();
            let breakers = Arc::new(CircuitBreakerRegistry::new(
                CircuitBreakerConfig::default(),
                Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
                metrics.clone(),
            ));
            breakers.add_listener(Arc::new(OutboxCircuitBreakerListener::new(
                db.clone(),
                metrics.clone(),
            )));
            let modes = Arc::new(DegradedModeManager::new(
                DegradedModeConfig::default(),
                breakers.clone(),
                metrics.clone(),
            ));

            let config = DispatcherConfig {
                call_timeout: Duration::from_secs(1),
                retry: RetryPolicy::exponential(3, Duration::from_millis(50)),
                max_concurrency: 8,
            };
            let mut dispatcher = ProviderDispatcher::new(config, breakers.clone(), metrics.clone());
            let mut enabled = Vec::new();
            for provider in providers {
                enabled.push(provider.provider_type().channel());
                dispatcher = dispatcher.with_provider(Arc::new(provider));
            }
            enabled.sort_by_key(|c| c.as_str());

            let routing = Arc::new(RoutingEngine::new(
                RoutingPolicy::new(crate::domain::ChannelType::Sms, enabled),
                modes.clone(),
                breakers.clone(),
            ));
            let dispatcher = Arc::new(dispatcher);
            let service = Arc::new(SignatureService::new(
                db.clone(),
                routing,
                dispatcher.clone(),
                metrics.clone(),
                chrono::Duration::minutes(3),
            ));

            Self {
                db,
                metrics,
                breakers,
                modes,
                dispatcher,
                service,
                _dir: dir,
            }
        }

        pub fn command(&self, amount: &str) -> CreateSignature {
            CreateSignature {
                customer_id: "cust-7f3a".to_string(),
                transaction_context: TransactionContext::sealed(
                    Money::parse(amount, "EUR").unwrap(),
                    "merchant-42",
                    "order-1001",
                    "Card payment",
                )
                .unwrap(),
                preferred_channel: None,
            }
        }
    }
}
