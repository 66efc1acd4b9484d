// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transactional Outbox
//!
//! Domain events are written as append-only rows in the same redb
//! transaction as the state change they describe. A relay outside this
//! process reads unpublished rows (`SignatureDatabase::fetch_unpublished`),
//! ships them, and stamps them (`mark_published`). Delivery is at-least-once;
//! ordering is guaranteed only within one aggregate, by sequence number.

pub mod event;
pub mod listener;
pub mod mapper;
pub mod publisher;

pub use event::{EventEnvelope, OutboxEvent};
pub use listener::OutboxCircuitBreakerListener;
pub use publisher::{OutboxError, OutboxPublisher, OutboxResult};
