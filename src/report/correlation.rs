//! Joins solution submissions to the challenge metadata the workers fetched.
//!
//! The link is by value only: a `/solution` url carries the challenge id as a path
//! segment, a `/challenge` response carries it under `challenge.challenge_id`. Anything
//! that does not fit those shapes is treated as "no challenge", never as an error.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use crate::config::endpoints;
use crate::db::EventStore;
use crate::error::Result;
use crate::types::ApiCallRecord;

/// Challenge context attached to a container's most recent submission.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedChallenge {
    pub challenge_id: String,
    pub difficulty: Option<String>,
    pub day: Option<i64>,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ShortWindowSolutions {
    /// container_id → raw `/solution` row count (resubmissions included)
    pub submitted: HashMap<String, i64>,
    /// container_id → challenge of the latest submission, when its url parses
    pub challenges: HashMap<String, ResolvedChallenge>,
}

#[derive(Clone)]
pub struct CorrelationResolver<S> {
    store: S,
}

impl<S: EventStore> CorrelationResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Submission counts plus challenge context for every container that submitted
    /// since `since`.
    pub async fn short_window(&self, since: DateTime<Utc>) -> Result<ShortWindowSolutions> {
        let solutions = self.store.api_calls_since(endpoints::SOLUTION, since).await?;
        let submitted = count_by_container(&solutions);

        let mut latest: HashMap<&str, &ApiCallRecord> = HashMap::new();
        for call in &solutions {
            let slot = latest.entry(call.container_id.as_str()).or_insert(call);
            if (call.timestamp, call.id) > (slot.timestamp, slot.id) {
                *slot = call;
            }
        }

        let wanted: HashMap<&str, &str> = latest
            .iter()
            .filter_map(|(container, call)| {
                extract_challenge_id(&call.url).map(|id| (*container, id))
            })
            .collect();

        let ids: Vec<&str> = wanted
            .values()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let lookups: Vec<_> = ids.iter().map(|id| self.store.latest_challenge(id)).collect();
        let records = try_join_all(lookups).await?;
        let by_id: HashMap<&str, Option<ApiCallRecord>> = ids.into_iter().zip(records).collect();

        let challenges = wanted
            .into_iter()
            .map(|(container, id)| {
                let record = by_id.get(id).and_then(Option::as_ref);
                (container.to_string(), resolve(id, record))
            })
            .collect::<HashMap<_, _>>();

        debug!(
            submissions = solutions.len(),
            correlated = challenges.values().filter(|c| c.difficulty.is_some()).count(),
            "resolved short-window challenges"
        );

        Ok(ShortWindowSolutions { submitted, challenges })
    }

    /// Raw `/solution` row counts per container since `since`.
    pub async fn submissions_since(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let solutions = self.store.api_calls_since(endpoints::SOLUTION, since).await?;
        Ok(count_by_container(&solutions))
    }
}

fn count_by_container(calls: &[ApiCallRecord]) -> HashMap<String, i64> {
    let mut counts = HashMap::new();
    for call in calls {
        *counts.entry(call.container_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn resolve(challenge_id: &str, record: Option<&ApiCallRecord>) -> ResolvedChallenge {
    let response = record.and_then(|r| r.api_response.as_ref());
    let field = |key: &str| response.and_then(|r| challenge_field(r, key));

    ResolvedChallenge {
        challenge_id: challenge_id.to_string(),
        difficulty: field("difficulty").and_then(scalar_text),
        day: field("day").and_then(parse_day),
        issued_at: field("issued_at").and_then(parse_timestamp),
    }
}

/// Challenge id embedded in a solution url: the segment right after
/// `/solution/<wallet>/`. Query string and fragment are ignored.
///
/// `https://x/solution/addrZ/chal42/submit` → `Some("chal42")`
pub fn extract_challenge_id(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .windows(3)
        .find(|w| w[0] == "solution" && !w[1].is_empty() && !w[2].is_empty())
        .map(|w| w[2])
}

/// `challenge.challenge_id` of a `/challenge` response, rendered as text. Only strings
/// and integers count; booleans and floats have no stable text form across stores.
pub fn response_challenge_id(response: &Value) -> Option<String> {
    match challenge_field(response, "challenge_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_i64().map(|i| i.to_string()),
        _ => None,
    }
}

fn challenge_field<'a>(response: &'a Value, key: &str) -> Option<&'a Value> {
    response.get("challenge")?.get(key)
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_day(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
