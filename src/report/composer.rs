use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::EventStore;
use crate::error::Result;
use crate::report::correlation::{CorrelationResolver, ShortWindowSolutions};
use crate::report::window::{start_of_day_utc, window_start, ContainerWindow, ShortWindow, WindowAggregator};
use crate::types::WorkerReport;

/// Builds the per-worker dashboard from a fresh read of the event store.
///
/// Holds no state between calls: every report re-reads both streams, so it is
/// idempotent and safe to call from many requests at once.
#[derive(Clone)]
pub struct ReportComposer<S> {
    aggregator: WindowAggregator<S>,
    resolver: CorrelationResolver<S>,
    window: Duration,
}

impl<S: EventStore> ReportComposer<S> {
    pub fn new(store: S, window: Duration) -> Self {
        Self {
            aggregator: WindowAggregator::new(store.clone()),
            resolver: CorrelationResolver::new(store),
            window,
        }
    }

    pub async fn report(&self, now: DateTime<Utc>) -> Result<Vec<WorkerReport>> {
        self.report_with_window(now, self.window).await
    }

    /// Any failing sub-query fails the whole report; no partial rows are returned.
    pub async fn report_with_window(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<WorkerReport>> {
        let short_since = window_start(now, window);
        let day_start = start_of_day_utc(now);

        let (short, daily, solutions, daily_submissions) = tokio::try_join!(
            self.aggregator.short_window(short_since),
            self.aggregator.containers_since(day_start),
            self.resolver.short_window(short_since),
            self.resolver.submissions_since(day_start)
        )?;

        let rows = compose(short, &daily, solutions, &daily_submissions, window);
        debug!(
            workers = rows.len(),
            window_secs = window.as_secs(),
            "report composed"
        );
        Ok(rows)
    }
}

/// Merges the sub-aggregates into report rows. Only containers present in the short
/// window produce a row; everything else is left-joined onto them.
pub fn compose(
    short: ShortWindow,
    daily: &BTreeMap<String, ContainerWindow>,
    mut solutions: ShortWindowSolutions,
    daily_submissions: &HashMap<String, i64>,
    window: Duration,
) -> Vec<WorkerReport> {
    let global = short.global;

    let mut rows: Vec<WorkerReport> = short
        .containers
        .into_values()
        .map(|w| {
            let day = daily.get(&w.container_id);
            let challenge = solutions.challenges.remove(&w.container_id);
            WorkerReport {
                avg_hashrate_short: w.avg_hashrate,
                sample_count_short: w.sample_count,
                last_sample_at: w.last_sample_at,
                daily_avg_hashrate: day.map(|d| d.avg_hashrate),
                daily_sum_hashrate: day.map(|d| d.sum_hashrate),
                daily_sample_count: day.map(|d| d.sample_count),
                solutions_submitted_short: solutions
                    .submitted
                    .get(&w.container_id)
                    .copied()
                    .unwrap_or(0),
                solutions_submitted_daily: daily_submissions
                    .get(&w.container_id)
                    .copied()
                    .unwrap_or(0),
                global_total_short: global.total_hashrate,
                global_avg_short: global.avg_hashrate,
                global_max_short: global.max_hashrate,
                global_sample_count: global.sample_count,
                global_share_pct: global_share_pct(w.avg_hashrate, global.total_hashrate),
                estimated_hashes_short: estimated_hashes(w.avg_hashrate, window),
                challenge_id: challenge.as_ref().map(|c| c.challenge_id.clone()),
                difficulty: challenge.as_ref().and_then(|c| c.difficulty.clone()),
                challenge_day: challenge.as_ref().and_then(|c| c.day),
                issued_at: challenge.and_then(|c| c.issued_at),
                container_id: w.container_id,
            }
        })
        .collect();

    // Highest throughput first; container id keeps equal rates in a stable order.
    rows.sort_by(|a, b| {
        b.avg_hashrate_short
            .total_cmp(&a.avg_hashrate_short)
            .then_with(|| a.container_id.cmp(&b.container_id))
    });
    rows
}

/// `avg / total * 100`, rounded to two decimals. `None` when the fleet total is zero.
pub fn global_share_pct(avg_hashrate: f64, total_hashrate: f64) -> Option<f64> {
    if total_hashrate == 0.0 {
        return None;
    }
    Some((avg_hashrate / total_hashrate * 100.0 * 100.0).round() / 100.0)
}

/// Hashes the container would compute over the full window at its average rate.
pub fn estimated_hashes(avg_hashrate: f64, window: Duration) -> i64 {
    (avg_hashrate * window.as_secs_f64()).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::endpoints;
    use crate::db::MemoryEventStore;
    use crate::types::{NewApiCall, NewHashrateSample};
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    async fn add_sample(store: &MemoryEventStore, container: &str, rate: f64, at: DateTime<Utc>) {
        store
            .insert_sample(NewHashrateSample {
                container_id: container.into(),
                miner_id: format!("{container}-m1"),
                hash_rate: rate,
                timestamp: Some(at),
                description: None,
            })
            .await
            .unwrap();
    }

    async fn add_call(
        store: &MemoryEventStore,
        container: &str,
        endpoint: &str,
        url: &str,
        response: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) {
        store
            .insert_api_call(NewApiCall {
                container_id: container.into(),
                miner_id: format!("{container}-m1"),
                wallet_addr: Some("addrZ".into()),
                url: url.into(),
                endpoint: endpoint.into(),
                timestamp: Some(at),
                description: None,
                payload: None,
                api_response: response,
            })
            .await
            .unwrap();
    }

    async fn example_store() -> MemoryEventStore {
        let store = MemoryEventStore::new();
        let now = now();
        add_sample(&store, "A", 100.0, now - TimeDelta::minutes(1)).await;
        add_sample(&store, "A", 200.0, now - TimeDelta::minutes(2)).await;
        add_sample(&store, "B", 700.0, now - TimeDelta::minutes(1)).await;
        store
    }

    #[tokio::test]
    async fn two_container_example() {
        let composer = ReportComposer::new(example_store().await, TEN_MINUTES);
        let rows = composer.report(now()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].container_id, "B");
        assert_eq!(rows[1].container_id, "A");
        assert_eq!(rows[1].avg_hashrate_short, 150.0);
        assert_eq!(rows[0].avg_hashrate_short, 700.0);
        assert_eq!(rows[0].global_total_short, 850.0);
        assert_eq!(rows[1].global_share_pct, Some(17.65));
        assert_eq!(rows[0].global_share_pct, Some(82.35));
        assert_eq!(rows[1].estimated_hashes_short, 90_000);
        assert_eq!(rows[0].estimated_hashes_short, 420_000);
        assert_eq!(rows[1].daily_sample_count, Some(2));
        assert_eq!(rows[1].solutions_submitted_short, 0);
        assert!(rows[1].challenge_id.is_none());
    }

    #[tokio::test]
    async fn containers_without_short_window_samples_are_omitted() {
        let store = example_store().await;
        // Same day, outside the window, and with solution activity.
        add_sample(&store, "C", 5_000.0, now() - TimeDelta::minutes(45)).await;
        add_call(
            &store,
            "C",
            endpoints::SOLUTION,
            "https://x/solution/addrZ/chal1/n",
            None,
            now() - TimeDelta::minutes(1),
        )
        .await;

        let rows = ReportComposer::new(store, TEN_MINUTES).report(now()).await.unwrap();
        assert!(rows.iter().all(|r| r.container_id != "C"));
        assert_eq!(rows[0].global_total_short, 850.0);
    }

    #[tokio::test]
    async fn daily_and_short_solution_counts_are_independent() {
        let store = example_store().await;
        let url = "https://x/solution/addrZ/chal42/submit";
        add_call(&store, "A", endpoints::SOLUTION, url, None, now() - TimeDelta::hours(3)).await;
        add_call(&store, "A", endpoints::SOLUTION, url, None, now() - TimeDelta::minutes(3)).await;
        add_call(&store, "A", endpoints::SOLUTION, url, None, now() - TimeDelta::minutes(2)).await;
        // Yesterday: counts nowhere.
        add_call(&store, "A", endpoints::SOLUTION, url, None, now() - TimeDelta::hours(13)).await;

        let rows = ReportComposer::new(store, TEN_MINUTES).report(now()).await.unwrap();
        let a = rows.iter().find(|r| r.container_id == "A").unwrap();
        assert_eq!(a.solutions_submitted_short, 2);
        assert_eq!(a.solutions_submitted_daily, 3);
    }

    #[tokio::test]
    async fn challenge_context_is_attached() {
        let store = example_store().await;
        add_call(
            &store,
            "B",
            endpoints::CHALLENGE,
            "https://x/challenge",
            Some(json!({"challenge": {
                "challenge_id": "chal42", "difficulty": "000FFFFF", "day": 5,
                "issued_at": "2025-03-01T11:00:00Z"
            }})),
            now() - TimeDelta::minutes(30),
        )
        .await;
        add_call(
            &store,
            "B",
            endpoints::SOLUTION,
            "https://x/solution/addrZ/chal42/submit",
            None,
            now() - TimeDelta::minutes(1),
        )
        .await;

        let rows = ReportComposer::new(store, TEN_MINUTES).report(now()).await.unwrap();
        let b = &rows[0];
        assert_eq!(b.challenge_id.as_deref(), Some("chal42"));
        assert_eq!(b.difficulty.as_deref(), Some("000FFFFF"));
        assert_eq!(b.challenge_day, Some(5));
        assert_eq!(b.issued_at, Some(Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn malformed_solution_url_leaves_challenge_null() {
        let store = example_store().await;
        add_call(
            &store,
            "B",
            endpoints::CHALLENGE,
            "https://x/challenge",
            Some(json!({"challenge": {"challenge_id": "chal42", "difficulty": "ff"}})),
            now() - TimeDelta::minutes(5),
        )
        .await;
        add_call(
            &store,
            "B",
            endpoints::SOLUTION,
            "https://x/submit/chal42",
            None,
            now() - TimeDelta::minutes(1),
        )
        .await;

        let rows = ReportComposer::new(store, TEN_MINUTES).report(now()).await.unwrap();
        let b = &rows[0];
        assert_eq!(b.solutions_submitted_short, 1);
        assert!(b.challenge_id.is_none());
        assert!(b.difficulty.is_none());
    }

    #[tokio::test]
    async fn repeated_reports_are_identical() {
        let composer = ReportComposer::new(example_store().await, TEN_MINUTES);
        let first = composer.report(now()).await.unwrap();
        let second = composer.report(now()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn window_override_changes_estimate_and_membership() {
        let composer = ReportComposer::new(example_store().await, TEN_MINUTES);
        let rows = composer
            .report_with_window(now(), Duration::from_secs(90))
            .await
            .unwrap();

        let a = rows.iter().find(|r| r.container_id == "A").unwrap();
        assert_eq!(a.avg_hashrate_short, 100.0);
        assert_eq!(a.estimated_hashes_short, 9_000);
    }

    #[test]
    fn zero_fleet_total_has_no_share() {
        assert_eq!(global_share_pct(0.0, 0.0), None);
        assert_eq!(global_share_pct(150.0, 850.0), Some(17.65));
        assert_eq!(global_share_pct(1.0, 3.0), Some(33.33));
    }

    #[test]
    fn estimate_rounds_to_nearest_hash() {
        assert_eq!(estimated_hashes(1.0 / 3.0, TEN_MINUTES), 200);
        assert_eq!(estimated_hashes(2.5, Duration::from_secs(1)), 3);
    }

    #[test]
    fn missing_daily_row_is_tolerated() {
        let now = now();
        let mut short = ShortWindow::default();
        short.containers.insert(
            "A".into(),
            ContainerWindow {
                container_id: "A".into(),
                sample_count: 1,
                avg_hashrate: 0.0,
                sum_hashrate: 0.0,
                max_hashrate: 0.0,
                last_sample_at: now,
            },
        );
        short.global = crate::report::window::global_window(&short.containers);

        let rows = compose(
            short,
            &BTreeMap::new(),
            ShortWindowSolutions::default(),
            &HashMap::new(),
            TEN_MINUTES,
        );
        assert_eq!(rows.len(), 1);
        assert!(rows[0].daily_avg_hashrate.is_none());
        assert!(rows[0].daily_sample_count.is_none());
        assert!(rows[0].global_share_pct.is_none());
    }
}
