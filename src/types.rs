use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Stored events
// ---------------------------------------------------------------------------

/// One throughput reading from one worker. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashrateSample {
    pub id: i64,
    pub container_id: String,
    pub miner_id: String,
    /// Hashes per second.
    pub hash_rate: f64,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

/// One outbound call a worker made to the challenge/solution API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCallRecord {
    pub id: i64,
    pub container_id: String,
    pub miner_id: String,
    pub wallet_addr: Option<String>,
    pub endpoint: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<Value>,
    /// `None` when absent or when the stored text was not valid JSON.
    pub api_response: Option<Value>,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Ingestion payloads
// ---------------------------------------------------------------------------

/// Body of `POST /insert_stat`. Extra producer fields (uptime, version) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct NewHashrateSample {
    pub container_id: String,
    pub miner_id: String,
    pub hash_rate: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewHashrateSample {
    pub fn validate(&self) -> Result<()> {
        if !self.hash_rate.is_finite() || self.hash_rate < 0.0 {
            return Err(AppError::BadRequest(format!(
                "hash_rate must be a non-negative number, got {}",
                self.hash_rate
            )));
        }
        if let Some(t) = self.timestamp {
            to_ns(t)?;
        }
        Ok(())
    }
}

/// Body of `POST /insert_api_return`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewApiCall {
    pub container_id: String,
    pub miner_id: String,
    #[serde(default)]
    pub wallet_addr: Option<String>,
    pub url: String,
    pub endpoint: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub api_response: Option<Value>,
}

impl NewApiCall {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.timestamp {
            to_ns(t)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One dashboard row per container seen in the short window. Built per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerReport {
    pub container_id: String,
    pub avg_hashrate_short: f64,
    pub sample_count_short: i64,
    pub last_sample_at: DateTime<Utc>,
    pub daily_avg_hashrate: Option<f64>,
    pub daily_sum_hashrate: Option<f64>,
    pub daily_sample_count: Option<i64>,
    pub solutions_submitted_short: i64,
    pub solutions_submitted_daily: i64,
    pub global_total_short: f64,
    pub global_avg_short: f64,
    pub global_max_short: f64,
    pub global_sample_count: i64,
    pub global_share_pct: Option<f64>,
    pub estimated_hashes_short: i64,
    pub challenge_id: Option<String>,
    pub difficulty: Option<String>,
    pub challenge_day: Option<i64>,
    pub issued_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Storage representation of an event time. Only 1677-09-21 through 2262-04-11 fit in
/// signed nanoseconds; anything else is rejected rather than clamped.
pub fn to_ns(t: DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt().ok_or_else(|| {
        AppError::BadRequest(format!(
            "timestamp {} is outside the supported range (1677-09-21 to 2262-04-11)",
            t.to_rfc3339()
        ))
    })
}

/// Event time as stored: the producer's value, or "now" when it sent none.
pub fn event_time(t: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
    let t = t.unwrap_or_else(Utc::now);
    to_ns(t)?;
    Ok(t)
}

/// Query bound for `timestamp_ns >= ?`. Out-of-range instants saturate toward the side
/// they fall on, so the comparison keeps its meaning.
pub fn bound_ns(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt()
        .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

pub fn from_ns(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}
