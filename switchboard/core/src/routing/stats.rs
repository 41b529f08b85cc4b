//! Routing Statistics
//!
//! Pure aggregations over history records. Decision-level counts (task type,
//! reason) count each request once; endpoint-level counts count attempts.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::history::{AttemptOutcome, RoutingRecord};
use super::taxonomy::TaskType;

/// Per-endpoint figures over the analysis window
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    /// Executed attempts
    pub attempts: usize,
    /// Successful attempts
    pub successes: usize,
    /// Timeouts and execution errors
    pub failures: usize,
    /// Entries skipped without execution
    pub skips: usize,
    /// Mean latency of executed attempts
    pub avg_latency_ms: Option<f64>,
    /// Failures over executed attempts
    pub failure_rate: f64,
}

/// Aggregate view of routing history
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    /// Records examined for counts and costs
    pub total_records: usize,
    /// Distinct requests seen
    pub total_requests: usize,
    /// Window used for latency and failure rates
    pub window: usize,
    /// Attempts (executed or skipped) per endpoint
    pub by_endpoint: BTreeMap<String, usize>,
    /// Requests per task type
    pub by_task_type: BTreeMap<TaskType, usize>,
    /// Requests per resolution reason
    pub by_reason: BTreeMap<String, usize>,
    /// Latency and failure figures over the last `window` records
    pub endpoints: BTreeMap<String, EndpointStats>,
    /// Cost incurred per endpoint
    pub cost_by_endpoint: BTreeMap<String, f64>,
    /// Cost incurred overall
    pub total_cost: f64,
}

impl RoutingStats {
    /// Aggregate `records` (oldest first); rates use the last `window`
    #[must_use]
    pub fn compute(records: &[RoutingRecord], window: usize) -> Self {
        let mut stats = Self {
            total_records: records.len(),
            window,
            ..Self::default()
        };

        let mut seen_requests = HashSet::new();
        for record in records {
            let endpoint = &record.attempt.endpoint_id;
            *stats.by_endpoint.entry(endpoint.clone()).or_default() += 1;

            if record.attempt.cost > 0.0 {
                *stats.cost_by_endpoint.entry(endpoint.clone()).or_default() += record.attempt.cost;
                stats.total_cost += record.attempt.cost;
            }

            if seen_requests.insert(record.request_id) {
                *stats.by_task_type.entry(record.task_type).or_default() += 1;
                *stats.by_reason.entry(record.decision.reason.to_string()).or_default() += 1;
            }
        }
        stats.total_requests = seen_requests.len();

        let start = records.len().saturating_sub(window);
        let mut latency_sums: BTreeMap<&str, u64> = BTreeMap::new();
        for record in &records[start..] {
            let attempt = &record.attempt;
            let entry = stats.endpoints.entry(attempt.endpoint_id.clone()).or_default();

            if !attempt.outcome.was_executed() {
                entry.skips += 1;
                continue;
            }

            entry.attempts += 1;
            if attempt.outcome == AttemptOutcome::Success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            *latency_sums.entry(attempt.endpoint_id.as_str()).or_default() += attempt.latency_ms;
        }

        for (id, entry) in &mut stats.endpoints {
            if entry.attempts > 0 {
                let sum = latency_sums.get(id.as_str()).copied().unwrap_or(0);
                entry.avg_latency_ms = Some(sum as f64 / entry.attempts as f64);
                entry.failure_rate = entry.failures as f64 / entry.attempts as f64;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::routing::context::RoutingContext;
    use crate::routing::history::AttemptRecord;
    use crate::routing::resolver::{RoutingDecision, RoutingReason};

    fn attempt(
        request_id: Uuid,
        reason: RoutingReason,
        endpoint: &str,
        outcome: AttemptOutcome,
        latency_ms: u64,
        cost: f64,
    ) -> RoutingRecord {
        let mut attempt = AttemptRecord::failed(endpoint, outcome, latency_ms, "");
        attempt.cost = cost;
        RoutingRecord::new(
            request_id,
            TaskType::Dialogue,
            RoutingDecision {
                chain: vec!["a".into(), "b".into()],
                reason,
            },
            RoutingContext::default(),
            attempt,
        )
    }

    #[test]
    fn test_counts_and_rates() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let records = vec![
            attempt(first, RoutingReason::DefaultRoute, "a", AttemptOutcome::Timeout, 300, 0.0),
            attempt(first, RoutingReason::DefaultRoute, "b", AttemptOutcome::Success, 100, 0.02),
            attempt(second, RoutingReason::Fallback, "a", AttemptOutcome::Unavailable, 0, 0.0),
            attempt(second, RoutingReason::Fallback, "b", AttemptOutcome::Success, 200, 0.03),
        ];

        let stats = RoutingStats::compute(&records, 100);
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.by_task_type.get(&TaskType::Dialogue), Some(&2));
        assert_eq!(stats.by_reason.get("default_route"), Some(&1));
        assert_eq!(stats.by_reason.get("fallback"), Some(&1));
        assert_eq!(stats.by_endpoint.get("a"), Some(&2));

        let a = &stats.endpoints["a"];
        assert_eq!(a.attempts, 1);
        assert_eq!(a.skips, 1);
        assert_eq!(a.failure_rate, 1.0);
        assert_eq!(a.avg_latency_ms, Some(300.0));

        let b = &stats.endpoints["b"];
        assert_eq!(b.failure_rate, 0.0);
        assert_eq!(b.avg_latency_ms, Some(150.0));

        assert!((stats.total_cost - 0.05).abs() < 1e-12);
        assert!((stats.cost_by_endpoint["b"] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_window_limits_rates() {
        let records: Vec<RoutingRecord> = (0..10)
            .map(|i| {
                let outcome = if i < 5 { AttemptOutcome::ExecutionError } else { AttemptOutcome::Success };
                attempt(Uuid::new_v4(), RoutingReason::Fallback, "a", outcome, 10, 0.0)
            })
            .collect();

        let stats = RoutingStats::compute(&records, 5);
        assert_eq!(stats.endpoints["a"].attempts, 5);
        assert_eq!(stats.endpoints["a"].failure_rate, 0.0);
        assert_eq!(stats.by_endpoint["a"], 10);
    }

    #[test]
    fn test_empty_history() {
        let stats = RoutingStats::compute(&[], 100);
        assert_eq!(stats.total_records, 0);
        assert!(stats.endpoints.is_empty());
    }
}
