// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded signature database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `signature_requests`: request id → serialized SignatureRequest
//! - `customer_index`: `customer|!created_be|id` → () (newest first)
//! - `status_index`: `status_tag|created_be|id` → () (oldest first)
//! - `expiry_index`: `expires_be|id` → () for non-terminal requests only
//! - `outbox_events`: sequence → serialized OutboxEvent
//! - `outbox_unpublished`: sequence → () while the relay has not shipped it
//! - `outbox_aggregate_index`: `aggregate_id|sequence_be` → ()
//! - `meta`: key → u64 (outbox sequence counter)
//!
//! ## Units of work
//!
//! Every mutation goes through a [`SignatureTx`], one redb write transaction.
//! Aggregate rows and outbox rows written through the same `SignatureTx`
//! commit together or not at all. redb allows a single writer at a time, so
//! a load-mutate-save inside one `SignatureTx` is serialized per process.
//! Never hold a `SignatureTx` across an `.await`.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use uuid::Uuid;

use crate::domain::{SignatureRequest, SignatureStatus};
use crate::outbox::OutboxEvent;

// =============================================================================
// Table Definitions
// =============================================================================

const SIGNATURE_REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("signature_requests");

const CUSTOMER_INDEX: TableDefinition<&[u8], ()> = TableDefinition::new("customer_index");

const STATUS_INDEX: TableDefinition<&[u8], ()> = TableDefinition::new("status_index");

const EXPIRY_INDEX: TableDefinition<&[u8], ()> = TableDefinition::new("expiry_index");

const OUTBOX_EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox_events");

const OUTBOX_UNPUBLISHED: TableDefinition<u64, ()> = TableDefinition::new("outbox_unpublished");

const OUTBOX_AGGREGATE_INDEX: TableDefinition<&[u8], ()> =
    TableDefinition::new("outbox_aggregate_index");

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const OUTBOX_SEQUENCE_KEY: &str = "outbox_sequence";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Paging
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn first(size: usize) -> Self {
        Self { page: 0, size }
    }

    fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

/// Ordering by `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Big-endian bytes that sort like the signed input.
fn sortable(millis: i64) -> [u8; 8] {
    ((millis as u64) ^ (1 << 63)).to_be_bytes()
}

/// `customer | !created_be | id` so a forward scan yields newest first.
fn customer_key(customer_id: &str, created: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = customer_prefix(customer_id);
    key.extend_from_slice(&(!u64::from_be_bytes(sortable(created.timestamp_millis()))).to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn customer_prefix(customer_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(customer_id.len() + 1 + 8 + 16);
    prefix.extend_from_slice(customer_id.as_bytes());
    prefix.push(b'|');
    prefix
}

fn status_key(status: SignatureStatus, created: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 16);
    key.push(status.index_tag());
    key.extend_from_slice(&sortable(created.timestamp_millis()));
    key.extend_from_slice(id.as_bytes());
    key
}

fn expiry_key(expires: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 16);
    key.extend_from_slice(&sortable(expires.timestamp_millis()));
    key.extend_from_slice(id.as_bytes());
    key
}

fn aggregate_key(aggregate_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = aggregate_prefix(aggregate_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn aggregate_prefix(aggregate_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(aggregate_id.len() + 1 + 8);
    prefix.extend_from_slice(aggregate_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Prefix followed by enough 0xFF bytes to be past any key with it.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.extend_from_slice(&[0xFF; 32]);
    end
}

/// Trailing 16 bytes of every request index key.
fn id_from_key(key: &[u8]) -> Option<Uuid> {
    key.len()
        .checked_sub(16)
        .and_then(|start| Uuid::from_slice(&key[start..]).ok())
}

fn sequence_from_key(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    key[start..].try_into().ok().map(u64::from_be_bytes)
}

// =============================================================================
// SignatureDatabase
// =============================================================================

pub struct SignatureDatabase {
    db: Database,
}

impl SignatureDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SIGNATURE_REQUESTS)?;
            let _ = write_txn.open_table(CUSTOMER_INDEX)?;
            let _ = write_txn.open_table(STATUS_INDEX)?;
            let _ = write_txn.open_table(EXPIRY_INDEX)?;
            let _ = write_txn.open_table(OUTBOX_EVENTS)?;
            let _ = write_txn.open_table(OUTBOX_UNPUBLISHED)?;
            let _ = write_txn.open_table(OUTBOX_AGGREGATE_INDEX)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Start a unit of work.
    pub fn begin(&self) -> StoreResult<SignatureTx> {
        Ok(SignatureTx {
            txn: self.db.begin_write()?,
        })
    }

    // =========================================================================
    // Signature requests (read side)
    // =========================================================================

    pub fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SignatureRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNATURE_REQUESTS)?;
        match table.get(id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All requests of one customer, newest first.
    pub fn find_by_customer_id(&self, customer_id: &str) -> StoreResult<Vec<SignatureRequest>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(CUSTOMER_INDEX)?;
        let table = read_txn.open_table(SIGNATURE_REQUESTS)?;

        let prefix = customer_prefix(customer_id);
        let end = prefix_end(&prefix);
        let mut results = Vec::new();
        for entry in idx_table.range(prefix.as_slice()..end.as_slice())? {
            let (key, _) = entry?;
            let Some(id) = id_from_key(key.value()) else {
                continue;
            };
            if let Some(value) = table.get(id.to_string().as_str())? {
                let request: SignatureRequest = serde_json::from_slice(value.value())?;
                // A customer id containing '|' can share a prefix with another.
                if request.customer_id() == customer_id {
                    results.push(request);
                }
            }
        }
        Ok(results)
    }

    pub fn find_by_status(
        &self,
        status: SignatureStatus,
        page: PageRequest,
        direction: SortDirection,
    ) -> StoreResult<Vec<SignatureRequest>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(STATUS_INDEX)?;
        let table = read_txn.open_table(SIGNATURE_REQUESTS)?;

        let start = [status.index_tag()];
        let end = [status.index_tag() + 1];
        let range = idx_table.range(start.as_slice()..end.as_slice())?;
        let entries: Box<dyn Iterator<Item = _> + '_> = match direction {
            SortDirection::Ascending => Box::new(range),
            SortDirection::Descending => Box::new(range.rev()),
        };

        // Only the requested page of index keys is read.
        let mut ids = Vec::new();
        for entry in entries.skip(page.offset()).take(page.size) {
            let (key, _) = entry?;
            if let Some(id) = id_from_key(key.value()) {
                ids.push(id);
            }
        }

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = table.get(id.to_string().as_str())? {
                results.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(results)
    }

    /// Non-terminal requests whose `expires_at` is before `cutoff`, soonest first.
    pub fn find_expired(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SignatureRequest>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(EXPIRY_INDEX)?;
        let table = read_txn.open_table(SIGNATURE_REQUESTS)?;

        let end = sortable(cutoff.timestamp_millis());
        let mut results = Vec::new();
        for entry in idx_table.range(..end.as_slice())? {
            if results.len() >= limit {
                break;
            }
            let (key, _) = entry?;
            let Some(id) = id_from_key(key.value()) else {
                continue;
            };
            if let Some(value) = table.get(id.to_string().as_str())? {
                let request: SignatureRequest = serde_json::from_slice(value.value())?;
                if !request.status().is_terminal() {
                    results.push(request);
                }
            }
        }
        Ok(results)
    }

    // =========================================================================
    // Outbox (relay-facing)
    // =========================================================================

    /// Oldest unpublished events first.
    pub fn fetch_unpublished(&self, limit: usize) -> StoreResult<Vec<OutboxEvent>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(OUTBOX_UNPUBLISHED)?;
        let events = read_txn.open_table(OUTBOX_EVENTS)?;

        let mut results = Vec::with_capacity(limit.min(256));
        for entry in pending.iter()?.take(limit) {
            let (sequence, _) = entry?;
            if let Some(value) = events.get(sequence.value())? {
                results.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(results)
    }

    /// Stamp `published_at` and drop the event from the pending set.
    pub fn mark_published(&self, sequence: u64, at: DateTime<Utc>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut events = write_txn.open_table(OUTBOX_EVENTS)?;
            let bytes = {
                let existing = events
                    .get(sequence)?
                    .ok_or_else(|| StoreError::NotFound(format!("outbox event {sequence}")))?;
                existing.value().to_vec()
            };
            let mut event: OutboxEvent = serde_json::from_slice(&bytes)?;
            if event.published_at.is_none() {
                event.published_at = Some(at);
                let json = serde_json::to_vec(&event)?;
                events.insert(sequence, json.as_slice())?;
            }

            let mut pending = write_txn.open_table(OUTBOX_UNPUBLISHED)?;
            pending.remove(sequence)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn pending_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(OUTBOX_UNPUBLISHED)?;
        Ok(pending.len()?)
    }

    /// Every event of one aggregate in sequence order.
    pub fn outbox_events_for(&self, aggregate_id: &str) -> StoreResult<Vec<OutboxEvent>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(OUTBOX_AGGREGATE_INDEX)?;
        let events = read_txn.open_table(OUTBOX_EVENTS)?;

        let prefix = aggregate_prefix(aggregate_id);
        let end = prefix_end(&prefix);
        let mut results = Vec::new();
        for entry in idx_table.range(prefix.as_slice()..end.as_slice())? {
            let (key, _) = entry?;
            let Some(sequence) = sequence_from_key(key.value()) else {
                continue;
            };
            if let Some(value) = events.get(sequence)? {
                let event: OutboxEvent = serde_json::from_slice(value.value())?;
                if event.aggregate_id == aggregate_id {
                    results.push(event);
                }
            }
        }
        Ok(results)
    }
}

// =============================================================================
// SignatureTx
// =============================================================================

/// One write transaction. Commit explicitly; dropping it rolls back.
pub struct SignatureTx {
    txn: WriteTransaction,
}

impl SignatureTx {
    pub fn load_request(&self, id: Uuid) -> StoreResult<Option<SignatureRequest>> {
        let table = self.txn.open_table(SIGNATURE_REQUESTS)?;
        let request = match table.get(id.to_string().as_str())? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(request)
    }

    /// Insert or replace a request and keep every index in step.
    pub fn save_request(&self, request: &SignatureRequest) -> StoreResult<()> {
        let id = request.id();
        let id_str = id.to_string();
        let json = serde_json::to_vec(request)?;

        let previous_status = {
            let table = self.txn.open_table(SIGNATURE_REQUESTS)?;
            let previous = table.get(id_str.as_str())?;
            match previous {
                Some(value) => {
                    let stored: SignatureRequest = serde_json::from_slice(value.value())?;
                    Some(stored.status())
                }
                None => None,
            }
        };

        let mut table = self.txn.open_table(SIGNATURE_REQUESTS)?;
        table.insert(id_str.as_str(), json.as_slice())?;

        let mut status_idx = self.txn.open_table(STATUS_INDEX)?;
        if let Some(previous) = previous_status {
            if previous != request.status() {
                status_idx.remove(status_key(previous, request.created_at(), id).as_slice())?;
            }
        }
        status_idx.insert(status_key(request.status(), request.created_at(), id).as_slice(), ())?;

        let mut customer_idx = self.txn.open_table(CUSTOMER_INDEX)?;
        customer_idx.insert(
            customer_key(request.customer_id(), request.created_at(), id).as_slice(),
            (),
        )?;

        let mut expiry_idx = self.txn.open_table(EXPIRY_INDEX)?;
        let expiry = expiry_key(request.expires_at(), id);
        if request.status().is_terminal() {
            expiry_idx.remove(expiry.as_slice())?;
        } else {
            expiry_idx.insert(expiry.as_slice(), ())?;
        }
        Ok(())
    }

    /// Reserve the next outbox sequence number.
    pub fn next_outbox_sequence(&self) -> StoreResult<u64> {
        let mut meta = self.txn.open_table(META)?;
        let current = meta.get(OUTBOX_SEQUENCE_KEY)?.map(|v| v.value()).unwrap_or(0);
        let next = current + 1;
        meta.insert(OUTBOX_SEQUENCE_KEY, next)?;
        Ok(next)
    }

    /// Append an outbox row. Callers go through `OutboxPublisher`.
    pub(crate) fn insert_outbox(&self, event: &OutboxEvent) -> StoreResult<()> {
        let json = serde_json::to_vec(event)?;
        let mut events = self.txn.open_table(OUTBOX_EVENTS)?;
        events.insert(event.sequence, json.as_slice())?;

        let mut pending = self.txn.open_table(OUTBOX_UNPUBLISHED)?;
        pending.insert(event.sequence, ())?;

        let mut by_aggregate = self.txn.open_table(OUTBOX_AGGREGATE_INDEX)?;
        by_aggregate.insert(aggregate_key(&event.aggregate_id, event.sequence).as_slice(), ())?;
        Ok(())
    }

    pub fn commit(self) -> StoreResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn abort(self) -> StoreResult<()> {
        self.txn.abort()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
