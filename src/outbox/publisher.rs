// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Writes domain events into the outbox inside the caller's transaction.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::event::{payload_hash, OutboxEvent};
use super::mapper;
use crate::domain::DomainEvent;
use crate::storage::{SignatureTx, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("failed to serialize event payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write outbox record: {0}")]
    Storage(#[from] StoreError),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

/// Stateless; requiring a [`SignatureTx`] makes a publish outside a
/// transaction impossible to write.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxPublisher;

impl OutboxPublisher {
    pub fn new() -> Self {
        Self
    }

    pub fn publish(&self, tx: &SignatureTx, event: &DomainEvent) -> OutboxResult<OutboxEvent> {
        let id = Uuid::now_v7();
        let envelope = mapper::envelope(event, id);
        let payload = serde_json::to_string(&envelope)?;

        let record = OutboxEvent {
            sequence: tx.next_outbox_sequence()?,
            id,
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type,
            event_type: envelope.event_type,
            payload_hash: payload_hash(&payload),
            payload,
            created_at: Utc::now(),
            published_at: None,
        };
        tx.insert_outbox(&record)?;

        debug!(
            sequence = record.sequence,
            event_type = %record.event_type,
            aggregate_id = %record.aggregate_id,
            "Outbox event recorded"
        );
        Ok(record)
    }

    /// Same as calling [`publish`](Self::publish) for each event, in order.
    pub fn publish_all(&self, tx: &SignatureTx, events: &[DomainEvent]) -> OutboxResult<Vec<OutboxEvent>> {
        events.iter().map(|event| self.publish(tx, event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelType, Money, ProviderType, SignatureRequest, TransactionContext};
    use crate::storage::SignatureDatabase;

    fn temp_db() -> (SignatureDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = SignatureDatabase::open(&dir.path().join("outbox.redb")).unwrap();
        (db, dir)
    }

    fn request() -> SignatureRequest {
        let ctx = TransactionContext::sealed(
            Money::parse("100.00", "EUR").unwrap(),
            "merchant",
            "order",
            "",
        )
        .unwrap();
        SignatureRequest::new("cust", ctx, chrono::Duration::minutes(3), Utc::now()).unwrap()
    }

    #[test]
    fn publish_all_keeps_order_and_hashes_payloads() {
        let (db, _dir) = temp_db();
        let mut req = request();
        req.create_challenge(ChannelType::Sms, ProviderType::Sms, "initial", Utc::now())
            .unwrap();
        let events = req.take_events();

        let tx = db.begin().unwrap();
        tx.save_request(&req).unwrap();
        let records = OutboxPublisher::new().publish_all(&tx, &events).unwrap();
        tx.commit().unwrap();

        let stored = db.outbox_events_for(&req.id().to_string()).unwrap();
        assert_eq!(stored, records);
        let types: Vec<_> = stored.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["SIGNATURE_REQUEST_CREATED", "CHALLENGE_CREATED"]);
        assert!(stored.iter().all(|e| e.verify_hash()));
        assert_eq!(stored[0].envelope().unwrap().event_id, stored[0].id);
    }

    #[test]
    fn failure_after_publish_rolls_back_state_and_event() {
        let (db, _dir) = temp_db();
        let mut req = request();
        let events = req.take_events();

        let outcome: Result<(), &str> = (|| {
            let tx = db.begin().unwrap();
            tx.save_request(&req).unwrap();
            OutboxPublisher::new().publish_all(&tx, &events).unwrap();
            // Simulated crash before commit; `tx` is dropped here.
            Err("downstream write failed")
        })();

        assert!(outcome.is_err());
        assert!(db.find_by_id(req.id()).unwrap().is_none());
        assert!(db.outbox_events_for(&req.id().to_string()).unwrap().is_empty());
        assert_eq!(db.pending_count().unwrap(), 0);
    }
}
