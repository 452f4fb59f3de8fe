use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::endpoints;
use crate::db::EventStore;
use crate::error::Result;
use crate::report::correlation::response_challenge_id;
use crate::types::{event_time, ApiCallRecord, HashrateSample, NewApiCall, NewHashrateSample};

/// Process-local event store. Nothing survives a restart; meant for tests and
/// throwaway demo runs (`STORE_BACKEND=memory`).
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// container_id → samples in insertion order
    samples: DashMap<String, Vec<HashrateSample>>,
    /// endpoint → records in insertion order
    api_calls: DashMap<String, Vec<ApiCallRecord>>,
    next_id: AtomicI64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl EventStore for MemoryEventStore {
    async fn insert_sample(&self, sample: NewHashrateSample) -> Result<i64> {
        let timestamp = event_time(sample.timestamp)?;
        let id = self.next_id();
        let row = HashrateSample {
            id,
            container_id: sample.container_id,
            miner_id: sample.miner_id,
            hash_rate: sample.hash_rate,
            timestamp,
            description: sample.description,
        };
        self.inner
            .samples
            .entry(row.container_id.clone())
            .or_default()
            .push(row);
        Ok(id)
    }

    async fn insert_api_call(&self, call: NewApiCall) -> Result<i64> {
        let timestamp = event_time(call.timestamp)?;
        let id = self.next_id();
        let row = ApiCallRecord {
            id,
            container_id: call.container_id,
            miner_id: call.miner_id,
            wallet_addr: call.wallet_addr,
            endpoint: call.endpoint,
            url: call.url,
            timestamp,
            payload: call.payload,
            api_response: call.api_response,
            description: call.description,
        };
        self.inner
            .api_calls
            .entry(row.endpoint.clone())
            .or_default()
            .push(row);
        Ok(id)
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<HashrateSample>> {
        let mut out = Vec::new();
        for entry in self.inner.samples.iter() {
            out.extend(entry.value().iter().filter(|s| s.timestamp >= since).cloned());
        }
        Ok(out)
    }

    async fn api_calls_since(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ApiCallRecord>> {
        Ok(self
            .inner
            .api_calls
            .get(endpoint)
            .map(|calls| calls.iter().filter(|c| c.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_challenge(&self, challenge_id: &str) -> Result<Option<ApiCallRecord>> {
        let Some(calls) = self.inner.api_calls.get(endpoints::CHALLENGE) else {
            return Ok(None);
        };
        Ok(calls
            .iter()
            .filter(|c| {
                c.api_response
                    .as_ref()
                    .and_then(response_challenge_id)
                    .is_some_and(|id| id == challenge_id)
            })
            .max_by_key(|c| (c.timestamp, c.id))
            .cloned())
    }

    async fn latest_sample_per_container(&self) -> Result<Vec<HashrateSample>> {
        let mut out: Vec<HashrateSample> = self
            .inner
            .samples
            .iter()
            .filter_map(|entry| entry.value().iter().max_by_key(|s| (s.timestamp, s.id)).cloned())
            .collect();
        out.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        Ok(out)
    }

    async fn latest_api_call_per_wallet_endpoint(&self) -> Result<Vec<ApiCallRecord>> {
        let mut latest: std::collections::BTreeMap<(Option<String>, String), ApiCallRecord> =
            std::collections::BTreeMap::new();
        for entry in self.inner.api_calls.iter() {
            for call in entry.value() {
                let key = (call.wallet_addr.clone(), call.endpoint.clone());
                let newer = latest
                    .get(&key)
                    .map_or(true, |cur| (call.timestamp, call.id) > (cur.timestamp, cur.id));
                if newer {
                    latest.insert(key, call.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
