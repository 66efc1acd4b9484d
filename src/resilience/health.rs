// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rolling per-provider success/failure counters.
//!
//! Each provider owns a ring of time buckets. Recording and reading are
//! lock-free; a bucket is recycled by whichever writer first observes that
//! its epoch is stale. Counts racing with a recycle may be dropped, so the
//! window is exact only away from bucket boundaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::ProviderType;

const BUCKETS: usize = 10;

/// Counts observed over the current window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub provider: ProviderType,
    pub successes: u64,
    pub failures: u64,
    /// `failures / (successes + failures)`, 0.0 when no calls were observed.
    pub error_rate: f64,
}

impl HealthSnapshot {
    pub fn calls(&self) -> u64 {
        self.successes + self.failures
    }
}

struct Bucket {
    epoch: AtomicI64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Bucket {
    fn empty() -> Self {
        Self {
            epoch: AtomicI64::new(i64::MIN),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

struct Window {
    buckets: Vec<Bucket>,
    bucket_ms: i64,
}

impl Window {
    fn new(window: Duration) -> Self {
        let total_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(BUCKETS as i64);
        Self {
            buckets: (0..BUCKETS).map(|_| Bucket::empty()).collect(),
            bucket_ms: total_ms / BUCKETS as i64,
        }
    }

    fn epoch(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.bucket_ms)
    }

    fn record(&self, success: bool, now: DateTime<Utc>) {
        let epoch = self.epoch(now);
        let bucket = &self.buckets[epoch.rem_euclid(BUCKETS as i64) as usize];

        let seen = bucket.epoch.load(Ordering::Acquire);
        if seen < epoch
            && bucket
                .epoch
                .compare_exchange(seen, epoch, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            bucket.successes.store(0, Ordering::Release);
            bucket.failures.store(0, Ordering::Release);
        } else if seen > epoch {
            // Clock went backwards past this bucket; too old to count.
            return;
        }

        if success {
            bucket.successes.fetch_add(1, Ordering::AcqRel);
        } else {
            bucket.failures.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn totals(&self, now: DateTime<Utc>) -> (u64, u64) {
        let current = self.epoch(now);
        let oldest = current - (BUCKETS as i64 - 1);
        self.buckets
            .iter()
            .filter(|b| {
                let epoch = b.epoch.load(Ordering::Acquire);
                epoch >= oldest && epoch <= current
            })
            .fold((0, 0), |(s, f), b| {
                (
                    s + b.successes.load(Ordering::Acquire),
                    f + b.failures.load(Ordering::Acquire),
                )
            })
    }

    fn clear(&self) {
        for bucket in &self.buckets {
            bucket.epoch.store(i64::MIN, Ordering::Release);
            bucket.successes.store(0, Ordering::Release);
            bucket.failures.store(0, Ordering::Release);
        }
    }
}

pub struct ProviderHealthTracker {
    windows: HashMap<ProviderType, Window>,
}

impl ProviderHealthTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: ProviderType::ALL
                .into_iter()
                .map(|p| (p, Window::new(window)))
                .collect(),
        }
    }

    pub fn record_at(&self, provider: ProviderType, success: bool, now: DateTime<Utc>) {
        if let Some(window) = self.windows.get(&provider) {
            window.record(success, now);
        }
    }

    pub fn snapshot_at(&self, provider: ProviderType, now: DateTime<Utc>) -> HealthSnapshot {
        let (successes, failures) = self
            .windows
            .get(&provider)
            .map(|w| w.totals(now))
            .unwrap_or((0, 0));
        let calls = successes + failures;
        let error_rate = if calls == 0 {
            0.0
        } else {
            failures as f64 / calls as f64
        };
        HealthSnapshot {
            provider,
            successes,
            failures,
            error_rate,
        }
    }

    pub fn snapshots_at(&self, now: DateTime<Utc>) -> Vec<HealthSnapshot> {
        ProviderType::ALL
            .into_iter()
            .map(|p| self.snapshot_at(p, now))
            .collect()
    }

    /// Worst error rate across providers.
    pub fn max_error_rate_at(&self, now: DateTime<Utc>) -> f64 {
        self.snapshots_at(now)
            .into_iter()
            .map(|s| s.error_rate)
            .fold(0.0, f64::max)
    }

    /// Forget everything observed for `provider`, e.g. after its breaker closes.
    pub fn reset(&self, provider: ProviderType) {
        if let Some(window) = self.windows.get(&provider) {
            window.clear();
        }
    }
}
