// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Signature requests and the transactional outbox share one redb file so a
//! state change and the event describing it commit atomically.
//!
//! ## Layout
//!
//! ```text
//! $DATA_DIR/
//!   signatures.redb   # requests, indexes, outbox, counters
//! ```

pub mod database;
pub mod repository;

pub use database::{
    PageRequest, SignatureDatabase, SignatureTx, SortDirection, StoreError, StoreResult,
};
pub use repository::SignatureRequestRepository;

/// Database file name under the data directory.
pub const DATABASE_FILE: &str = "signatures.redb";
