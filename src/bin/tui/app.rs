use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror the backend's report and health shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerRow {
    pub container_id: String,
    pub avg_hashrate_short: f64,
    pub sample_count_short: Option<i64>,
    pub last_sample_at: Option<String>,
    pub daily_avg_hashrate: Option<f64>,
    pub daily_sample_count: Option<i64>,
    pub solutions_submitted_short: i64,
    pub solutions_submitted_daily: i64,
    pub global_total_short: f64,
    pub global_share_pct: Option<f64>,
    pub estimated_hashes_short: i64,
    pub challenge_id: Option<String>,
    pub difficulty: Option<String>,
    pub challenge_day: Option<i64>,
    pub issued_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthResponse {
    pub store_ok: Option<bool>,
    pub samples_ingested: Option<u64>,
    pub api_calls_ingested: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LatencyResponse {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub workers: Vec<WorkerRow>,
    pub health: HealthResponse,
    pub latency: LatencyResponse,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            workers: Vec::new(),
            health: HealthResponse::default(),
            latency: LatencyResponse::default(),
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    /// Fleet-wide short-window total. Every report row carries the same value.
    pub fn fleet_total(&self) -> f64 {
        self.workers.first().map_or(0.0, |w| w.global_total_short)
    }

    pub fn solutions_short(&self) -> i64 {
        self.workers.iter().map(|w| w.solutions_submitted_short).sum()
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let report_url = format!("{}/report", self.base_url);
        let health_url = format!("{}/health", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (report_res, health_res, latency_res) = tokio::join!(
            client.get(&report_url).send(),
            client.get(&health_url).send(),
            client.get(&latency_url).send(),
        );

        let resp = match report_res {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                self.status = ConnectionStatus::Error(format!("report: HTTP {}", r.status()));
                return;
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        match resp.json::<Vec<WorkerRow>>().await {
            Ok(workers) => {
                self.workers = workers;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
                return;
            }
        }

        if let Ok(h) = health_res {
            if let Ok(health) = h.json::<HealthResponse>().await {
                self.health = health;
            }
        }
        if let Ok(l) = latency_res {
            if let Ok(latency) = l.json::<LatencyResponse>().await {
                self.latency = latency;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Hash rate with an SI prefix: `1234.0` → `1.23 kH/s`.
pub fn format_hashrate(v: f64) -> String {
    const UNITS: [&str; 5] = ["H/s", "kH/s", "MH/s", "GH/s", "TH/s"];
    let mut value = v;
    let mut unit = 0;
    while value.abs() >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

pub fn format_pct(v: Option<f64>) -> String {
    v.map_or("—".to_string(), |p| format!("{p:.2}%"))
}

pub fn format_ms(v: Option<f64>) -> String {
    v.map_or("—".to_string(), |ms| format!("{ms:.1}ms"))
}

pub fn format_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or("—".to_string(), |x| x.to_string())
}

/// `2025-03-01T11:55:00Z` → `11:55:00`. Anything unparseable is shown as-is.
pub fn format_clock(ts: Option<&str>) -> String {
    match ts {
        Some(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|_| s.to_string()),
        None => "—".to_string(),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
