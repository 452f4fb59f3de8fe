//! Shared health state for the /health endpoint.
//! Updated by the ingestion and report handlers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process counters. Reset on restart; the event store is the source of truth.
#[derive(Default)]
pub struct HealthState {
    pub samples_ingested: AtomicU64,
    pub api_calls_ingested: AtomicU64,
    pub reports_served: AtomicU64,
    /// Nanosecond timestamp of the last successful report (0 = none).
    pub last_report_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_samples_ingested(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_calls_ingested(&self) {
        self.api_calls_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, at_ns: u64) {
        self.reports_served.fetch_add(1, Ordering::Relaxed);
        self.last_report_at_ns.store(at_ns, Ordering::Relaxed);
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested.load(Ordering::Relaxed)
    }

    pub fn api_calls_ingested(&self) -> u64 {
        self.api_calls_ingested.load(Ordering::Relaxed)
    }

    pub fn reports_served(&self) -> u64 {
        self.reports_served.load(Ordering::Relaxed)
    }

    pub fn last_report_at_ns(&self) -> u64 {
        self.last_report_at_ns.load(Ordering::Relaxed)
    }
}
