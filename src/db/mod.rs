//! Event store: durable, append-only storage for hash-rate samples and API-call records.
//!
//! The report pipeline only talks to [`EventStore`], so it runs unchanged against the
//! SQLite pool in production and the in-memory store in tests.

pub mod memory;
pub mod models;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ApiCallRecord, HashrateSample, NewApiCall, NewHashrateSample};

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Append and range-read access to both event streams.
///
/// Every read is an independent query against the store's current state; callers that
/// issue several reads get request-scoped, not snapshot, consistency.
pub trait EventStore: Clone + Send + Sync + 'static {
    /// Appends a sample and returns its row id. A missing timestamp becomes "now".
    fn insert_sample(&self, sample: NewHashrateSample) -> impl Future<Output = Result<i64>> + Send;

    /// Appends an API-call record and returns its row id.
    fn insert_api_call(&self, call: NewApiCall) -> impl Future<Output = Result<i64>> + Send;

    /// All samples with `timestamp >= since`.
    fn samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<HashrateSample>>> + Send;

    /// All records for `endpoint` with `timestamp >= since`.
    fn api_calls_since(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ApiCallRecord>>> + Send;

    /// The `/challenge` record whose `api_response.challenge.challenge_id` equals
    /// `challenge_id`. Only string and integer ids in the stored response can match.
    /// Among several matches the most recent timestamp wins, then the highest row id.
    fn latest_challenge(
        &self,
        challenge_id: &str,
    ) -> impl Future<Output = Result<Option<ApiCallRecord>>> + Send;

    /// Latest sample per container, ordered by container id.
    fn latest_sample_per_container(
        &self,
    ) -> impl Future<Output = Result<Vec<HashrateSample>>> + Send;

    /// Latest call per (wallet, endpoint), ordered by wallet then endpoint.
    fn latest_api_call_per_wallet_endpoint(
        &self,
    ) -> impl Future<Output = Result<Vec<ApiCallRecord>>> + Send;

    /// Cheap reachability probe for `/health`.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;
}
