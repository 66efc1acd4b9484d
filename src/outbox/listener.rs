// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Records circuit breaker transitions in the outbox.

use std::sync::Arc;

use super::publisher::OutboxPublisher;
use crate::metrics::SharedMetrics;
use crate::resilience::{CircuitBreakerListener, CircuitTransition};
use crate::storage::SignatureDatabase;

/// Each transition is written in its own transaction. Errors go back to the
/// registry, which logs them.
pub struct OutboxCircuitBreakerListener {
    db: Arc<SignatureDatabase>,
    publisher: OutboxPublisher,
    metrics: SharedMetrics,
}

impl OutboxCircuitBreakerListener {
    pub fn new(db: Arc<SignatureDatabase>, metrics: SharedMetrics) -> Self {
        Self {
            db,
            publisher: OutboxPublisher::new(),
            metrics,
        }
    }
}

impl CircuitBreakerListener for OutboxCircuitBreakerListener {
    fn on_transition(
        &self,
        transition: &CircuitTransition,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tx = self.db.begin()?;
        self.publisher.publish(&tx, &transition.to_event())?;
        tx.commit()?;
        self.metrics.set_outbox_pending(self.db.pending_count()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderType;
    use crate::metrics::Metrics;
    use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, ProviderHealthTracker};
    use std::time::Duration;

    #[test]
    fn breaker_transitions_land_in_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(SignatureDatabase::open(&dir.path().join("cb.redb")).unwrap());
        let metrics = Metrics::shared().unwrap();
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ProviderHealthTracker::new(Duration::from_secs(60))),
            metrics.clone(),
        );
        registry.add_listener(Arc::new(OutboxCircuitBreakerListener::new(db.clone(), metrics.clone())));

        registry.force_open(ProviderType::Push).unwrap();
        registry.probe(ProviderType::Push).unwrap();
        registry.reset(ProviderType::Push).unwrap();

        let events = db.outbox_events_for("PUSH").unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "CIRCUIT_BREAKER_OPENED",
                "CIRCUIT_BREAKER_HALF_OPEN",
                "CIRCUIT_BREAKER_RESET"
            ]
        );
        assert!(events.iter().all(|e| e.aggregate_type == "CircuitBreaker"));
        assert_eq!(metrics.outbox_pending(), 3.0);
    }
}
