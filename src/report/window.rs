use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

use crate::db::EventStore;
use crate::error::Result;
use crate::types::HashrateSample;

/// Per-container aggregates over one window. Means are plain arithmetic means over the
/// raw samples, not time-weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerWindow {
    pub container_id: String,
    pub sample_count: i64,
    pub avg_hashrate: f64,
    pub sum_hashrate: f64,
    pub max_hashrate: f64,
    pub last_sample_at: DateTime<Utc>,
}

/// Fleet-wide figures for the short window.
///
/// `total_hashrate` adds up each container's average, i.e. the fleet's current
/// throughput, so container shares of it sum to 100%. `avg_hashrate`, `max_hashrate` and
/// `sample_count` describe the raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalWindow {
    pub total_hashrate: f64,
    pub avg_hashrate: f64,
    pub max_hashrate: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ShortWindow {
    /// Only containers with at least one sample in the window.
    pub containers: BTreeMap<String, ContainerWindow>,
    pub global: GlobalWindow,
}

/// Computes rolling hash-rate statistics from the event store.
#[derive(Clone)]
pub struct WindowAggregator<S> {
    store: S,
}

impl<S: EventStore> WindowAggregator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn short_window(&self, since: DateTime<Utc>) -> Result<ShortWindow> {
        let samples = self.store.samples_since(since).await?;
        let containers = aggregate_by_container(&samples, since);
        let global = global_window(&containers);
        Ok(ShortWindow { containers, global })
    }

    /// Same per-container aggregates from `since` onwards; used for the calendar day.
    pub async fn containers_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, ContainerWindow>> {
        let samples = self.store.samples_since(since).await?;
        Ok(aggregate_by_container(&samples, since))
    }
}

pub fn aggregate_by_container(
    samples: &[HashrateSample],
    since: DateTime<Utc>,
) -> BTreeMap<String, ContainerWindow> {
    let mut out: BTreeMap<String, ContainerWindow> = BTreeMap::new();

    for s in samples.iter().filter(|s| s.timestamp >= since) {
        match out.get_mut(&s.container_id) {
            Some(w) => {
                w.sample_count += 1;
                w.sum_hashrate += s.hash_rate;
                w.max_hashrate = w.max_hashrate.max(s.hash_rate);
                w.last_sample_at = w.last_sample_at.max(s.timestamp);
            }
            None => {
                out.insert(
                    s.container_id.clone(),
                    ContainerWindow {
                        container_id: s.container_id.clone(),
                        sample_count: 1,
                        avg_hashrate: 0.0,
                        sum_hashrate: s.hash_rate,
                        max_hashrate: s.hash_rate,
                        last_sample_at: s.timestamp,
                    },
                );
            }
        }
    }

    for w in out.values_mut() {
        w.avg_hashrate = w.sum_hashrate / w.sample_count as f64;
    }
    out
}

pub fn global_window(containers: &BTreeMap<String, ContainerWindow>) -> GlobalWindow {
    let sample_count: i64 = containers.values().map(|w| w.sample_count).sum();
    if sample_count == 0 {
        return GlobalWindow::default();
    }
    let raw_sum: f64 = containers.values().map(|w| w.sum_hashrate).sum();

    GlobalWindow {
        total_hashrate: containers.values().map(|w| w.avg_hashrate).sum(),
        avg_hashrate: raw_sum / sample_count as f64,
        max_hashrate: containers
            .values()
            .map(|w| w.max_hashrate)
            .fold(f64::NEG_INFINITY, f64::max),
        sample_count,
    }
}

/// Start of the trailing window ending at `now`. Saturates at the earliest
/// representable instant.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 00:00 UTC of the day containing `now`.
pub fn start_of_day_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::default()).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(container: &str, rate: f64, at: DateTime<Utc>) -> HashrateSample {
        HashrateSample {
            id: 0,
            container_id: container.to_string(),
            miner_id: "m1".to_string(),
            hash_rate: rate,
            timestamp: at,
            description: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn averages_are_per_container_arithmetic_means() {
        let now = now();
        let samples = vec![
            sample("a", 100.0, now - TimeDelta::minutes(1)),
            sample("a", 200.0, now - TimeDelta::minutes(2)),
            sample("b", 700.0, now - TimeDelta::minutes(1)),
        ];
        let agg = aggregate_by_container(&samples, now - TimeDelta::minutes(10));

        assert_eq!(agg["a"].sample_count, 2);
        assert_eq!(agg["a"].avg_hashrate, 150.0);
        assert_eq!(agg["a"].last_sample_at, now - TimeDelta::minutes(1));
        assert_eq!(agg["b"].avg_hashrate, 700.0);
    }

    #[test]
    fn samples_before_window_are_excluded_and_empty_containers_omitted() {
        let now = now();
        let samples = vec![
            sample("a", 100.0, now - TimeDelta::minutes(11)),
            sample("b", 50.0, now - TimeDelta::minutes(10)),
        ];
        let agg = aggregate_by_container(&samples, now - TimeDelta::minutes(10));

        assert!(!agg.contains_key("a"));
        assert_eq!(agg["b"].sample_count, 1);
    }

    #[test]
    fn global_total_sums_container_averages() {
        let now = now();
        let samples = vec![
            sample("a", 100.0, now),
            sample("a", 200.0, now),
            sample("b", 700.0, now),
        ];
        let global = global_window(&aggregate_by_container(&samples, now));

        assert_eq!(global.total_hashrate, 850.0);
        assert!((global.avg_hashrate - 1000.0 / 3.0).abs() < 1e-9);
        assert_eq!(global.max_hashrate, 700.0);
        assert_eq!(global.sample_count, 3);
    }

    #[test]
    fn empty_window_has_zero_globals() {
        assert_eq!(global_window(&BTreeMap::new()), GlobalWindow::default());
    }

    #[test]
    fn day_starts_at_midnight_utc() {
        let start = start_of_day_utc(now());
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn window_start_subtracts_duration() {
        let start = window_start(now(), Duration::from_secs(600));
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 1, 12, 20, 0).unwrap());
    }
}
