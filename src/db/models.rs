//! Database row types matching `migrations/20250101000000_events.sql`.
//! Used by sqlx for typed queries.

use crate::types::{from_ns, ApiCallRecord, HashrateSample};

#[derive(Debug, sqlx::FromRow)]
pub struct SampleRow {
    pub id: i64,
    pub container_id: String,
    pub miner_id: String,
    pub hash_rate: f64,
    pub timestamp_ns: i64,
    pub description: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ApiCallRow {
    pub id: i64,
    pub container_id: String,
    pub miner_id: String,
    pub wallet_addr: Option<String>,
    pub endpoint: String,
    pub url: String,
    pub timestamp_ns: i64,
    pub payload: Option<String>,
    pub api_response: Option<String>,
    pub description: Option<String>,
}

impl From<SampleRow> for HashrateSample {
    fn from(r: SampleRow) -> Self {
        HashrateSample {
            id: r.id,
            container_id: r.container_id,
            miner_id: r.miner_id,
            hash_rate: r.hash_rate,
            timestamp: from_ns(r.timestamp_ns),
            description: r.description,
        }
    }
}

impl From<ApiCallRow> for ApiCallRecord {
    fn from(r: ApiCallRow) -> Self {
        ApiCallRecord {
            id: r.id,
            container_id: r.container_id,
            miner_id: r.miner_id,
            wallet_addr: r.wallet_addr,
            endpoint: r.endpoint,
            url: r.url,
            timestamp: from_ns(r.timestamp_ns),
            payload: parse_json_column(r.payload),
            api_response: parse_json_column(r.api_response),
            description: r.description,
        }
    }
}

/// Malformed JSON reads back as absent rather than failing the whole query.
fn parse_json_column(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}
