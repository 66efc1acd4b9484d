// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbox record and the wire envelope it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope version written into every payload.
pub const ENVELOPE_VERSION: u32 = 1;

/// One JSON object per event, as shipped to the bus by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    /// Epoch milliseconds.
    pub occurred_at: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub correlation_id: String,
    pub version: u32,
    pub payload: serde_json::Value,
}

/// Append-only outbox row. `published_at` is stamped by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Position in the outbox; strictly increasing across commits.
    pub sequence: u64,
    pub id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    /// Serialized [`EventEnvelope`].
    pub payload: String,
    /// Lowercase hex SHA-256 of `payload`.
    pub payload_hash: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Recompute the payload hash and compare with the stored one.
    pub fn verify_hash(&self) -> bool {
        payload_hash(&self.payload) == self.payload_hash
    }

    pub fn envelope(&self) -> serde_json::Result<EventEnvelope> {
        serde_json::from_str(&self.payload)
    }
}

pub fn payload_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}
