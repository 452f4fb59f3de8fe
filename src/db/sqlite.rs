use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::{endpoints, Config};
use crate::db::models::{ApiCallRow, SampleRow};
use crate::db::EventStore;
use crate::error::Result;
use crate::types::{bound_ns, to_ns, ApiCallRecord, HashrateSample, NewApiCall, NewHashrateSample};

const SAMPLE_COLUMNS: &str = "id, container_id, miner_id, hash_rate, timestamp_ns, description";

const API_CALL_COLUMNS: &str = "id, container_id, miner_id, wallet_addr, endpoint, url, \
                                timestamp_ns, payload, api_response, description";

/// SQLite-backed event store. Cloning shares the underlying bounded pool; every query
/// acquires a connection for its own duration and returns it on drop.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .acquire_timeout(cfg.db_acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

impl EventStore for SqliteEventStore {
    async fn insert_sample(&self, sample: NewHashrateSample) -> Result<i64> {
        let timestamp_ns = to_ns(sample.timestamp.unwrap_or_else(Utc::now))?;

        let result = sqlx::query(
            r#"
            INSERT INTO hashrate_samples (container_id, miner_id, hash_rate, timestamp_ns, description)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.container_id)
        .bind(&sample.miner_id)
        .bind(sample.hash_rate)
        .bind(timestamp_ns)
        .bind(&sample.description)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_api_call(&self, call: NewApiCall) -> Result<i64> {
        let timestamp_ns = to_ns(call.timestamp.unwrap_or_else(Utc::now))?;
        let payload = call.payload.as_ref().map(serde_json::to_string).transpose()?;
        let api_response = call.api_response.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO api_calls (
                container_id, miner_id, wallet_addr, endpoint, url,
                timestamp_ns, payload, api_response, description
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&call.container_id)
        .bind(&call.miner_id)
        .bind(&call.wallet_addr)
        .bind(&call.endpoint)
        .bind(&call.url)
        .bind(timestamp_ns)
        .bind(payload)
        .bind(api_response)
        .bind(&call.description)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<HashrateSample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM hashrate_samples WHERE timestamp_ns >= ?"
        ))
        .bind(bound_ns(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn api_calls_since(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ApiCallRecord>> {
        let rows: Vec<ApiCallRow> = sqlx::query_as(&format!(
            "SELECT {API_CALL_COLUMNS} FROM api_calls WHERE endpoint = ? AND timestamp_ns >= ?"
        ))
        .bind(endpoint)
        .bind(bound_ns(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_challenge(&self, challenge_id: &str) -> Result<Option<ApiCallRecord>> {
        // json_extract raises on malformed text, so guard it with json_valid inside CASE.
        // Only text and integer ids can match, the same set `response_challenge_id` accepts.
        let row: Option<ApiCallRow> = sqlx::query_as(&format!(
            r#"
            SELECT {API_CALL_COLUMNS}
            FROM api_calls
            WHERE endpoint = ?
              AND CASE WHEN json_valid(api_response) THEN
                    CASE WHEN json_type(api_response, '$.challenge.challenge_id') IN ('text', 'integer')
                         THEN CAST(json_extract(api_response, '$.challenge.challenge_id') AS TEXT)
                    END
                  END = ?
            ORDER BY timestamp_ns DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(endpoints::CHALLENGE)
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn latest_sample_per_container(&self) -> Result<Vec<HashrateSample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM latest_sample_per_container ORDER BY container_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_api_call_per_wallet_endpoint(&self) -> Result<Vec<ApiCallRecord>> {
        let rows: Vec<ApiCallRow> = sqlx::query_as(&format!(
            "SELECT {API_CALL_COLUMNS} FROM latest_api_call_per_wallet_endpoint \
             ORDER BY wallet_addr, endpoint"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
