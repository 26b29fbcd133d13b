use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Pipeline self-observability counters.
#[derive(Debug, Default)]
pub struct Metrics {
    polls_total: AtomicU64,
    fetch_failures: AtomicU64,
    stale_results_discarded: AtomicU64,
    events_received: AtomicU64,
    events_malformed: AtomicU64,
    stream_errors: AtomicU64,
    fallback_active: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub polls_total: u64,
    pub fetch_failures: u64,
    pub stale_results_discarded: u64,
    pub events_received: u64,
    pub events_malformed: u64,
    pub stream_errors: u64,
    pub fallback_active: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_polls(&self) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fetch_failures(&self, n: u64) {
        self.fetch_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_stale_results_discarded(&self) {
        self.stale_results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stream_errors(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fallback_active(&self, active: bool) {
        self.fallback_active.store(active, Ordering::Relaxed);
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::Relaxed)
    }

    pub fn polls_total(&self) -> u64 {
        self.polls_total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_total: self.polls_total.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stale_results_discarded: self.stale_results_discarded.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            fallback_active: self.fallback_active.load(Ordering::Relaxed),
        }
    }
}
