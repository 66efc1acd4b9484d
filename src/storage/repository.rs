// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistence port for signature requests.
//!
//! Read-heavy collaborators (recovery, expiry sweep, operator queries) depend
//! on this trait rather than on redb. Writes that must carry outbox events go
//! through [`SignatureTx`](super::SignatureTx) instead of [`save`](SignatureRequestRepository::save).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::database::{PageRequest, SignatureDatabase, SortDirection, StoreResult};
use crate::domain::{SignatureRequest, SignatureStatus};

pub trait SignatureRequestRepository: Send + Sync {
    /// Persist a request in its own transaction, without events.
    fn save(&self, request: &SignatureRequest) -> StoreResult<()>;

    fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SignatureRequest>>;

    fn find_by_customer_id(&self, customer_id: &str) -> StoreResult<Vec<SignatureRequest>>;

    fn find_by_status(
        &self,
        status: SignatureStatus,
        page: PageRequest,
        direction: SortDirection,
    ) -> StoreResult<Vec<SignatureRequest>>;

    fn find_expired(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SignatureRequest>>;
}

impl SignatureRequestRepository for SignatureDatabase {
    fn save(&self, request: &SignatureRequest) -> StoreResult<()> {
        let tx = self.begin()?;
        tx.save_request(request)?;
        tx.commit()
    }

    fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SignatureRequest>> {
        SignatureDatabase::find_by_id(self, id)
    }

    fn find_by_customer_id(&self, customer_id: &str) -> StoreResult<Vec<SignatureRequest>> {
        SignatureDatabase::find_by_customer_id(self, customer_id)
    }

    fn find_by_status(
        &self,
        status: SignatureStatus,
        page: PageRequest,
        direction: SortDirection,
    ) -> StoreResult<Vec<SignatureRequest>> {
        SignatureDatabase::find_by_status(self, status, page, direction)
    }

    fn find_expired(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SignatureRequest>> {
        SignatureDatabase::find_expired(self, cutoff, limit)
    }
}
