use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::MAX_REPORT_WINDOW_SECS;
use crate::db::EventStore;
use crate::error::AppError;
use crate::report::ReportComposer;
use crate::types::{bound_ns, ApiCallRecord, HashrateSample, NewApiCall, NewHashrateSample, WorkerReport};

#[derive(Clone)]
pub struct ApiState<S> {
    pub store: S,
    pub composer: ReportComposer<S>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

impl<S: EventStore> ApiState<S> {
    pub fn new(store: S, report_window: Duration) -> Self {
        Self {
            composer: ReportComposer::new(store.clone(), report_window),
            store,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
        }
    }
}

pub fn router<S: EventStore>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/report", get(get_report::<S>))
        .route("/insert_stat", post(insert_stat::<S>))
        .route("/insert_api_return", post(insert_api_return::<S>))
        .route("/containers/latest", get(get_latest_samples::<S>))
        .route("/api_calls/latest", get(get_latest_api_calls::<S>))
        .route("/health", get(get_health::<S>))
        .route("/stats/latency", get(get_stats_latency::<S>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ReportQuery {
    /// Overrides the configured short window for this request.
    pub window_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct InsertResponse {
    pub status: &'static str,
    pub id: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub store_ok: bool,
    pub samples_ingested: u64,
    pub api_calls_ingested: u64,
    pub reports_served: u64,
    pub last_report_at_ns: Option<u64>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub sample_count: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_report<S: EventStore>(
    State(state): State<ApiState<S>>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<Vec<WorkerReport>>, AppError> {
    let window = match params.window_secs {
        None => None,
        Some(secs) if secs > 0 && secs <= MAX_REPORT_WINDOW_SECS => Some(Duration::from_secs(secs)),
        Some(secs) => {
            return Err(AppError::BadRequest(format!(
                "window_secs must be between 1 and {MAX_REPORT_WINDOW_SECS}, got {secs}"
            )))
        }
    };

    let started = Instant::now();
    let now = Utc::now();
    let rows = match window {
        Some(w) => state.composer.report_with_window(now, w).await?,
        None => state.composer.report(now).await?,
    };

    state.latency.record(started.elapsed());
    state.health.record_report(bound_ns(now).max(0) as u64);
    Ok(Json(rows))
}

async fn insert_stat<S: EventStore>(
    State(state): State<ApiState<S>>,
    Json(payload): Json<NewHashrateSample>,
) -> Result<Json<InsertResponse>, AppError> {
    if let Err(e) = payload.validate() {
        warn!(container_id = %payload.container_id, "Rejected stat: {e}");
        return Err(e);
    }

    info!(
        event = "STAT",
        container_id = %payload.container_id,
        miner_id = %payload.miner_id,
        hash_rate = payload.hash_rate,
        "Received stat"
    );

    let id = state.store.insert_sample(payload).await?;
    state.health.inc_samples_ingested();
    Ok(Json(InsertResponse { status: "ok", id }))
}

async fn insert_api_return<S: EventStore>(
    State(state): State<ApiState<S>>,
    Json(payload): Json<NewApiCall>,
) -> Result<Json<InsertResponse>, AppError> {
    if let Err(e) = payload.validate() {
        warn!(container_id = %payload.container_id, "Rejected API return: {e}");
        return Err(e);
    }

    info!(
        event = "API_RETURN",
        container_id = %payload.container_id,
        miner_id = %payload.miner_id,
        endpoint = %payload.endpoint,
        "Received API return"
    );

    let id = state.store.insert_api_call(payload).await?;
    state.health.inc_api_calls_ingested();
    Ok(Json(InsertResponse { status: "ok", id }))
}

async fn get_latest_samples<S: EventStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<Vec<HashrateSample>>, AppError> {
    Ok(Json(state.store.latest_sample_per_container().await?))
}

async fn get_latest_api_calls<S: EventStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<Vec<ApiCallRecord>>, AppError> {
    Ok(Json(state.store.latest_api_call_per_wallet_endpoint().await?))
}

async fn get_health<S: EventStore>(State(state): State<ApiState<S>>) -> Json<HealthResponse> {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: store unreachable: {e}");
            false
        }
    };
    let last = state.health.last_report_at_ns();

    Json(HealthResponse {
        store_ok,
        samples_ingested: state.health.samples_ingested(),
        api_calls_ingested: state.health.api_calls_ingested(),
        reports_served: state.health.reports_served(),
        last_report_at_ns: (last > 0).then_some(last),
    })
}

async fn get_stats_latency<S: EventStore>(State(state): State<ApiState<S>>) -> Json<LatencyResponse> {
    let snap = state.latency.snapshot();

    Json(LatencyResponse {
        p50_ms: snap.p50_ms,
        p95_ms: snap.p95_ms,
        p99_ms: snap.p99_ms,
        max_ms: snap.max_ms,
        sample_count: snap.reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::db::MemoryEventStore;
    use crate::error::Result;
    use chrono::DateTime;

    /// Samples read fine but the API-call stream is down, so any report would be partial.
    #[derive(Clone)]
    struct BrokenApiCallStore {
        samples: MemoryEventStore,
    }

    impl EventStore for BrokenApiCallStore {
        async fn insert_sample(&self, sample: NewHashrateSample) -> Result<i64> {
            self.samples.insert_sample(sample).await
        }

        async fn insert_api_call(&self, _call: NewApiCall) -> Result<i64> {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<HashrateSample>> {
            self.samples.samples_since(since).await
        }

        async fn api_calls_since(
            &self,
            _endpoint: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<ApiCallRecord>> {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn latest_challenge(&self, _challenge_id: &str) -> Result<Option<ApiCallRecord>> {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn latest_sample_per_container(&self) -> Result<Vec<HashrateSample>> {
            self.samples.latest_sample_per_container().await
        }

        async fn latest_api_call_per_wallet_endpoint(&self) -> Result<Vec<ApiCallRecord>> {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn ping(&self) -> Result<()> {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    fn app() -> Router {
        router(ApiState::new(MemoryEventStore::new(), Duration::from_secs(600)))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ingest_then_report() {
        let app = app();
        let now = Utc::now();

        for (container, rate) in [("A", 100.0), ("A", 200.0), ("B", 700.0)] {
            let resp = app
                .clone()
                .oneshot(post_json(
                    "/insert_stat",
                    json!({"container_id": container, "miner_id": "m1", "hash_rate": rate,
                           "timestamp": now.to_rfc3339(), "uptime_secs": 12}),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_json(resp).await["status"], "ok");
        }

        let resp = app
            .clone()
            .oneshot(post_json(
                "/insert_api_return",
                json!({"container_id": "A", "miner_id": "m1", "wallet_addr": "addrZ",
                       "endpoint": "/solution", "url": "https://x/solution/addrZ/chal42/n"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(Request::get("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["container_id"], "B");
        assert_eq!(rows[0]["global_share_pct"], 82.35);
        assert_eq!(rows[1]["container_id"], "A");
        assert_eq!(rows[1]["solutions_submitted_short"], 1);
        assert_eq!(rows[1]["challenge_id"], "chal42");
        assert_eq!(rows[1]["difficulty"], Value::Null);
        assert_eq!(rows[1]["estimated_hashes_short"], 90_000);

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(resp).await;
        assert_eq!(health["store_ok"], true);
        assert_eq!(health["samples_ingested"], 3);
        assert_eq!(health["api_calls_ingested"], 1);
        assert_eq!(health["reports_served"], 1);
    }

    #[tokio::test]
    async fn negative_hash_rate_is_rejected() {
        let resp = app()
            .oneshot(post_json(
                "/insert_stat",
                json!({"container_id": "A", "miner_id": "m1", "hash_rate": -5.0}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_window_override_is_rejected() {
        let resp = app()
            .oneshot(Request::get("/report?window_secs=0").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_store_reports_empty_array() {
        let resp = app()
            .oneshot(Request::get("/report?window_secs=60").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));
    }

    #[tokio::test]
    async fn latency_reports_recorded_samples() {
        let app = app();
        app.clone()
            .oneshot(Request::get("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let resp = app
            .oneshot(Request::get("/stats/latency").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let latency = body_json(resp).await;
        assert_eq!(latency["sample_count"], 1);
        assert!(latency["p50_ms"].is_number());
        assert!(latency["p95_ms"].is_number());
        assert!(latency["max_ms"].is_number());
    }

    #[tokio::test]
    async fn store_failure_yields_generic_500_without_rows() {
        let store = BrokenApiCallStore { samples: MemoryEventStore::new() };
        let app = router(ApiState::new(store, Duration::from_secs(600)));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/insert_stat",
                json!({"container_id": "A", "miner_id": "m1", "hash_rate": 100.0}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(Request::get("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"internal server error");

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(resp).await;
        assert_eq!(health["store_ok"], false);
        assert_eq!(health["reports_served"], 0);
    }

    #[tokio::test]
    async fn ancient_timestamps_are_rejected_on_both_streams() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(post_json(
                "/insert_stat",
                json!({"container_id": "OLD", "miner_id": "m1", "hash_rate": 5.0,
                       "timestamp": "1600-01-01T00:00:00Z"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/insert_api_return",
                json!({"container_id": "OLD", "miner_id": "m1", "endpoint": "/solution",
                       "url": "https://x/solution/addrZ/c1/n", "timestamp": "1600-01-01T00:00:00Z"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(Request::get("/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!([]));
    }
}
