//! Report latency, from request arrival to a composed report.
//!
//! Only `/report` records here; ingestion is a single insert and is not worth tracking.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

/// Upper bound of the histogram in microseconds (100s). Slower reports are recorded at
/// the bound so they still show up in p99.
const MAX_TRACKED_US: u64 = 100_000_000;

/// Point-in-time view of the report latency distribution, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySnapshot {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub reports: u64,
}

pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKED_US, 3).expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().clamp(1, MAX_TRACKED_US as u128) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.inner.lock() else {
            return LatencySnapshot::default();
        };
        if h.is_empty() {
            return LatencySnapshot::default();
        }
        let ms = |us: u64| Some(us as f64 / 1_000.0);
        LatencySnapshot {
            p50_ms: ms(h.value_at_quantile(0.5)),
            p95_ms: ms(h.value_at_quantile(0.95)),
            p99_ms: ms(h.value_at_quantile(0.99)),
            max_ms: ms(h.max()),
            reports: h.len(),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
