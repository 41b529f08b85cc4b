//! Routing History
//!
//! Bounded, append-only log of attempts. One [`RoutingRecord`] is written per
//! chain entry the engine touched (executed or skipped), in completion order.
//! When the buffer is full the oldest record is evicted.
//!
//! History is read-side only. Nothing here is consulted during resolution.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::RoutingContext;
use super::resolver::RoutingDecision;
use super::taxonomy::TaskType;

/// Default number of records kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// What happened to one chain entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Produced the response
    Success,
    /// Per-attempt deadline exceeded
    Timeout,
    /// Executor reported an error
    ExecutionError,
    /// Skipped: endpoint not available
    Unavailable,
    /// Skipped: estimated cost above the request's limit
    OverBudget,
}

impl AttemptOutcome {
    /// Whether the endpoint was actually invoked
    #[must_use]
    pub fn was_executed(self) -> bool {
        matches!(self, Self::Success | Self::Timeout | Self::ExecutionError)
    }

    /// Whether this is an executed attempt that failed
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Timeout | Self::ExecutionError)
    }
}

/// Result of one chain entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Endpoint tried
    pub endpoint_id: String,
    /// Outcome
    pub outcome: AttemptOutcome,
    /// Wall time of the attempt (0 for skips)
    pub latency_ms: u64,
    /// Input units consumed
    #[serde(default)]
    pub input_units: u32,
    /// Output units produced
    #[serde(default)]
    pub output_units: u32,
    /// Cost incurred
    #[serde(default)]
    pub cost: f64,
    /// Error description for failures and skips
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    /// A skipped or failed entry with no usage
    pub fn failed(
        endpoint_id: impl Into<String>,
        outcome: AttemptOutcome,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            outcome,
            latency_ms,
            input_units: 0,
            output_units: 0,
            cost: 0.0,
            error: Some(error.into()),
        }
    }
}

/// One history entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Record id
    pub id: Uuid,
    /// When the attempt completed
    pub timestamp: DateTime<Utc>,
    /// Request the attempt belongs to
    pub request_id: Uuid,
    /// Task type of the request
    pub task_type: TaskType,
    /// Decision the engine was walking
    pub decision: RoutingDecision,
    /// Context captured at resolution
    pub context: RoutingContext,
    /// Attempt outcome
    pub attempt: AttemptRecord,
}

impl RoutingRecord {
    /// Stamp a new record
    #[must_use]
    pub fn new(
        request_id: Uuid,
        task_type: TaskType,
        decision: RoutingDecision,
        context: RoutingContext,
        attempt: AttemptRecord,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_id,
            task_type,
            decision,
            context,
            attempt,
        }
    }
}

/// Ring buffer of routing records
#[derive(Debug)]
pub struct RoutingHistory {
    records: RwLock<VecDeque<RoutingRecord>>,
    capacity: usize,
}

impl Default for RoutingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RoutingHistory {
    /// Create a history holding at most `capacity` records
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Maximum number of records
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Append a record, evicting the oldest if full
    pub fn append(&self, record: RoutingRecord) {
        let mut records = self.records.write();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// All records, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<RoutingRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// The most recent `n` records, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<RoutingRecord> {
        let records = self.records.read();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    /// Records belonging to one request, in attempt order
    #[must_use]
    pub fn for_request(&self, request_id: Uuid) -> Vec<RoutingRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Serialize all records as a JSON array
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.records.read())
    }

    /// Parse records previously written by [`export_json`](Self::export_json)
    pub fn import_json(json: &str) -> Result<Vec<RoutingRecord>, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::resolver::RoutingReason;

    fn record(endpoint: &str, outcome: AttemptOutcome) -> RoutingRecord {
        RoutingRecord::new(
            Uuid::new_v4(),
            TaskType::Dialogue,
            RoutingDecision {
                chain: vec![endpoint.to_string()],
                reason: RoutingReason::Fallback,
            },
            RoutingContext::default(),
            AttemptRecord::failed(endpoint, outcome, 10, "boom"),
        )
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let history = RoutingHistory::new(3);
        for i in 0..5 {
            history.append(record(&format!("e{i}"), AttemptOutcome::Timeout));
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<String> = history.snapshot().into_iter().map(|r| r.attempt.endpoint_id).collect();
        assert_eq!(ids, vec!["e2", "e3", "e4"]);

        let last_two: Vec<String> = history.recent(2).into_iter().map(|r| r.attempt.endpoint_id).collect();
        assert_eq!(last_two, vec!["e3", "e4"]);
        assert_eq!(history.recent(10).len(), 3);
    }

    #[test]
    fn test_export_import() {
        let history = RoutingHistory::default();
        history.append(record("a", AttemptOutcome::Unavailable));
        history.append(record("b", AttemptOutcome::ExecutionError));

        let json = history.export_json().unwrap();
        let records = RoutingHistory::import_json(&json).unwrap();
        assert_eq!(records, history.snapshot());
    }

    #[test]
    fn test_outcome_classes() {
        assert!(AttemptOutcome::Timeout.is_failure());
        assert!(!AttemptOutcome::Unavailable.is_failure());
        assert!(!AttemptOutcome::OverBudget.was_executed());
        assert!(AttemptOutcome::Success.was_executed());
    }
}
