// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Drains requests parked in PENDING_DEGRADED once the system is NORMAL.
//!
//! Oldest first, at most `batch_size` per pass. A request that cannot be
//! sent stays parked for the next pass; one failure never stops the batch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::degraded_mode::DegradedModeManager;
use crate::domain::SignatureStatus;
use crate::signature::{RecoveryOutcome, SignatureService};
use crate::storage::{PageRequest, SignatureRequestRepository, SortDirection};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub attempted: usize,
    pub recovered: usize,
    /// Still parked after this pass (send failed or storage error).
    pub failed: usize,
    /// Expired, permanently failed or already moved on.
    pub settled: usize,
}

pub struct DegradedModeRecoveryService {
    repository: Arc<dyn SignatureRequestRepository>,
    service: Arc<SignatureService>,
    modes: Arc<DegradedModeManager>,
    batch_size: usize,
}

impl DegradedModeRecoveryService {
    pub fn new(
        repository: Arc<dyn SignatureRequestRepository>,
        service: Arc<SignatureService>,
        modes: Arc<DegradedModeManager>,
        batch_size: usize,
    ) -> Self {
        Self {
            repository,
            service,
            modes,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// One recovery pass. Does nothing unless the system is NORMAL, and stops
    /// early if the mode changes mid-pass.
    pub async fn drain(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        if !self.modes.is_normal() {
            debug!(mode = %self.modes.current_mode(), "Skipping recovery, system not normal");
            return report;
        }

        let parked = match self.repository.find_by_status(
            SignatureStatus::PendingDegraded,
            PageRequest::first(self.batch_size),
            SortDirection::Ascending,
        ) {
            Ok(parked) => parked,
            Err(e) => {
                warn!(error = %e, "Failed to load parked signature requests");
                return report;
            }
        };
        if parked.is_empty() {
            return report;
        }

        info!(queued = parked.len(), "Recovering parked signature requests");
        for request in parked {
            if !self.modes.is_normal() {
                warn!("System left normal mode, stopping recovery pass");
                break;
            }
            report.attempted += 1;
            match self.service.resume_degraded(request.id()).await {
                Ok(RecoveryOutcome::Sent) => report.recovered += 1,
                Ok(RecoveryOutcome::StillQueued { error_code }) => {
                    report.failed += 1;
                    warn!(request_id = %request.id(), %error_code, "Parked request not sent, retrying next pass");
                }
                Ok(RecoveryOutcome::Failed { .. } | RecoveryOutcome::Expired | RecoveryOutcome::Skipped) => {
                    report.settled += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(request_id = %request.id(), error = %e, "Recovery of parked request failed");
                }
            }
        }

        info!(
            attempted = report.attempted,
            recovered = report.recovered,
            failed = report.failed,
            settled = report.settled,
            "Recovery pass finished"
        );
        report
    }
}
