//! Internal counters (§7 "every error kind increments a labelled
//! counter"). No Prometheus/OpenTelemetry exporter — see SPEC_FULL.md §9
//! [AMBIENT] — these are plain atomics a future admin surface could read.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub events_accepted: AtomicU64,
    pub events_invalid: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_blocked: AtomicU64,
    pub events_error: AtomicU64,

    pub deliveries_attempted: AtomicU64,
    pub deliveries_dropped: AtomicU64,

    pub storage_batches_written: AtomicU64,
    pub storage_transient_failures: AtomicU64,
    pub storage_permanent_failures: AtomicU64,
    pub storage_dropped: AtomicU64,

    pub connections_closed_slow_consumer: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
