//! Lock-free observability counters, named throughout §4 and §8.
//!
//! Grounded on `tracker.rs`'s use of `DashMap`/atomics for lock-free counter
//! updates, simplified to the handful of labeled counters this system needs
//! rather than a full latency-histogram tracker (dropped — see
//! `SPEC_FULL.md` §16).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Process-wide counters. Cheap to clone (wraps `Arc`-free atomics behind a
/// `DashMap` that is itself shared via `Arc<Metrics>` at the call sites).
#[derive(Default)]
pub struct Metrics {
    pub capability_conflicts_total: AtomicU64,
    pub dropped_notifications_total: AtomicU64,
    errors_total: DashMap<&'static str, AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_conflict(&self) {
        self.capability_conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_notification(&self) {
        self.dropped_notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: &'static str) {
        self.errors_total
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors_total(&self, kind: &str) -> u64 {
        self.errors_total
            .get(kind)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn conflicts_total(&self) -> u64 {
        self.capability_conflicts_total.load(Ordering::Relaxed)
    }
}
