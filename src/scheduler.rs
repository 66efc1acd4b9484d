// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Tasks
//!
//! - [`ExpirySweeper`] expires requests whose TTL has passed.
//! - [`RecoveryPoller`] runs a recovery pass whenever the system returns to
//!   NORMAL, and on a fixed interval while it stays there.
//!
//! Both loops stop when their `CancellationToken` is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::{DegradedModeManager, DegradedModeRecoveryService, SystemMode};
use crate::signature::SignatureService;

/// Requests expired per sweep.
const SWEEP_BATCH: usize = 500;

pub struct ExpirySweeper {
    service: Arc<SignatureService>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<SignatureService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }
            self.sweep_step();
        }
    }

    fn sweep_step(&self) {
        match self.service.expire_due(Utc::now(), SWEEP_BATCH) {
            Ok(0) => {}
            Ok(expired) => info!(expired, "Expired overdue signature requests"),
            Err(e) => warn!(error = %e, "Expiry sweep failed"),
        }
    }
}

pub struct RecoveryPoller {
    recovery: Arc<DegradedModeRecoveryService>,
    mode_rx: watch::Receiver<SystemMode>,
    interval: Duration,
}

impl RecoveryPoller {
    pub fn new(
        recovery: Arc<DegradedModeRecoveryService>,
        modes: Arc<DegradedModeManager>,
        interval: Duration,
    ) -> Self {
        // Subscribed here so a transition between spawn and first poll is not missed.
        Self {
            recovery,
            mode_rx: modes.subscribe(),
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Recovery poller starting");
        let mut mode_rx = self.mode_rx;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                changed = mode_rx.changed() => {
                    if changed.is_err() {
                        warn!("Mode channel closed, recovery poller stopping");
                        return;
                    }
                    let mode = *mode_rx.borrow_and_update();
                    if mode != SystemMode::Normal {
                        debug!(%mode, "Mode changed, recovery waits for NORMAL");
                        continue;
                    }
                    info!("System back to normal, draining parked requests");
                },
                _ = shutdown.cancelled() => {
                    info!("Recovery poller shutting down");
                    return;
                }
            }
            self.recovery.drain().await;
        }
    }
}
