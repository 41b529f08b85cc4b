//! Router Metrics
//!
//! In-process counters for the routing system:
//! - Attempt latencies per endpoint
//! - Successes, failures, timeouts and skips per endpoint
//! - Decisions by resolution reason
//! - Fallbacks, exhausted chains and cancellations
//!
//! Everything is atomic, so recording never blocks the request path.
//! `to_prometheus` renders the text exposition format.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::resolver::RoutingReason;
use super::taxonomy::TaskType;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds; values above the last bound land in the last bucket
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket bounds
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let buckets = if buckets.is_empty() { vec![f64::MAX] } else { buckets };
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Default latency buckets in milliseconds
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0, 120000.0,
        ])
    }

    /// Record a value
    pub fn record(&self, value: f64) {
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);

        let value_u64 = value as u64;
        self.sum.fetch_add(value_u64, Ordering::Relaxed);
        self.min.fetch_min(value_u64, Ordering::Relaxed);
        self.max.fetch_max(value_u64, Ordering::Relaxed);
    }

    /// Get histogram snapshot
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            sum,
            min: if min == u64::MAX { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
            mean: if total > 0 { sum as f64 / total as f64 } else { 0.0 },
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<f64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Number of samples
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Smallest sample
    pub min: u64,
    /// Largest sample
    pub max: u64,
    /// Mean sample
    pub mean: f64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket containing the `p` quantile
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }

        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// p50
    #[must_use]
    pub fn p50(&self) -> f64 {
        self.percentile(0.5)
    }

    /// p99
    #[must_use]
    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Counter / Gauge
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Zeroed counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Zeroed gauge
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Subtract one, saturating at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Endpoint Metrics
// ============================================================================

/// Metrics for a single endpoint
#[derive(Debug)]
pub struct EndpointMetrics {
    /// Endpoint id
    pub endpoint_id: String,
    /// Attempts started
    pub attempts: Counter,
    /// Successful attempts
    pub successes: Counter,
    /// Failed attempts (timeouts included)
    pub failures: Counter,
    /// Timed-out attempts
    pub timeouts: Counter,
    /// Chain entries skipped (unavailable or over budget)
    pub skips: Counter,
    /// Latency of completed attempts
    pub latency: Histogram,
    /// Output units produced
    pub output_units: Counter,
    /// Attempts currently running
    pub active: Gauge,
}

impl EndpointMetrics {
    fn new(endpoint_id: String) -> Self {
        Self {
            endpoint_id,
            attempts: Counter::new(),
            successes: Counter::new(),
            failures: Counter::new(),
            timeouts: Counter::new(),
            skips: Counter::new(),
            latency: Histogram::latency_default(),
            output_units: Counter::new(),
            active: Gauge::new(),
        }
    }

    /// Failures over attempts
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.attempts.get();
        if total == 0 {
            return 0.0;
        }
        self.failures.get() as f64 / total as f64
    }

    /// Get summary
    #[must_use]
    pub fn summary(&self) -> EndpointMetricsSummary {
        let latency = self.latency.snapshot();
        EndpointMetricsSummary {
            endpoint_id: self.endpoint_id.clone(),
            attempts: self.attempts.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            timeouts: self.timeouts.get(),
            skips: self.skips.get(),
            error_rate: self.error_rate(),
            latency_p50_ms: latency.p50(),
            latency_p99_ms: latency.p99(),
            output_units: self.output_units.get(),
            active: self.active.get(),
        }
    }
}

/// Summary of endpoint metrics
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub struct EndpointMetricsSummary {
    pub endpoint_id: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub skips: u64,
    pub error_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub output_units: u64,
    pub active: u64,
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Centralized metrics for the router
#[derive(Debug)]
pub struct RouterMetrics {
    endpoints: DashMap<String, Arc<EndpointMetrics>>,
    reasons: DashMap<String, Counter>,
    task_types: DashMap<TaskType, Counter>,

    /// Requests submitted
    pub total_requests: Counter,
    /// Requests answered
    pub total_routed: Counter,
    /// Requests answered by an endpoint other than the first in the chain
    pub total_fallbacks: Counter,
    /// Requests whose chain was exhausted
    pub total_exhausted: Counter,
    /// Requests cancelled by the caller
    pub total_cancelled: Counter,
    /// Requests that ran out of their overall deadline
    pub total_deadline_exceeded: Counter,
    /// Time spent resolving, in microseconds
    pub resolution_time_us: Histogram,

    started_at: Instant,
}

impl RouterMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            reasons: DashMap::new(),
            task_types: DashMap::new(),
            total_requests: Counter::new(),
            total_routed: Counter::new(),
            total_fallbacks: Counter::new(),
            total_exhausted: Counter::new(),
            total_cancelled: Counter::new(),
            total_deadline_exceeded: Counter::new(),
            resolution_time_us: Histogram::new(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
            started_at: Instant::now(),
        }
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, endpoint_id: &str) -> Arc<EndpointMetrics> {
        if let Some(metrics) = self.endpoints.get(endpoint_id) {
            return metrics.value().clone();
        }
        self.endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Arc::new(EndpointMetrics::new(endpoint_id.to_string())))
            .value()
            .clone()
    }

    /// Record a new request and how it was resolved
    pub fn record_request(&self, task_type: TaskType, reason: &RoutingReason, resolution_time: Duration) {
        self.total_requests.inc();
        self.task_types.entry(task_type).or_default().inc();
        self.reasons.entry(reason.to_string()).or_default().inc();
        self.resolution_time_us.record(resolution_time.as_micros() as f64);
    }

    /// Record the start of an attempt
    pub fn record_attempt_start(&self, endpoint_id: &str) {
        let metrics = self.endpoint(endpoint_id);
        metrics.attempts.inc();
        metrics.active.inc();
    }

    /// Record a successful attempt
    pub fn record_attempt_success(&self, endpoint_id: &str, latency_ms: u64, output_units: u32) {
        let metrics = self.endpoint(endpoint_id);
        metrics.successes.inc();
        metrics.active.dec();
        metrics.latency.record(latency_ms as f64);
        metrics.output_units.add(u64::from(output_units));
    }

    /// Record a failed attempt
    pub fn record_attempt_failure(&self, endpoint_id: &str, latency_ms: u64, is_timeout: bool) {
        let metrics = self.endpoint(endpoint_id);
        metrics.failures.inc();
        metrics.active.dec();
        metrics.latency.record(latency_ms as f64);
        if is_timeout {
            metrics.timeouts.inc();
        }
    }

    /// Record an attempt abandoned because the caller cancelled
    pub fn record_attempt_cancelled(&self, endpoint_id: &str) {
        self.endpoint(endpoint_id).active.dec();
    }

    /// Record a skipped chain entry
    pub fn record_skip(&self, endpoint_id: &str) {
        self.endpoint(endpoint_id).skips.inc();
    }

    /// Record the final outcome of a request
    pub fn record_outcome(&self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Served { fell_back } => {
                self.total_routed.inc();
                if fell_back {
                    self.total_fallbacks.inc();
                }
            }
            RequestOutcome::Exhausted => self.total_exhausted.inc(),
            RequestOutcome::Cancelled => self.total_cancelled.inc(),
            RequestOutcome::DeadlineExceeded => self.total_deadline_exceeded.inc(),
        }
    }

    /// Uptime
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Summaries for every endpoint, ordered by id
    #[must_use]
    pub fn endpoint_summaries(&self) -> Vec<EndpointMetricsSummary> {
        let mut summaries: Vec<EndpointMetricsSummary> = self.endpoints.iter().map(|m| m.summary()).collect();
        summaries.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        summaries
    }

    /// Decisions per resolution reason
    #[must_use]
    pub fn reason_counts(&self) -> BTreeMap<String, u64> {
        self.reasons.iter().map(|e| (e.key().clone(), e.value().get())).collect()
    }

    /// Export as Prometheus format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP switchboard_requests_total Requests received\n\
             # TYPE switchboard_requests_total counter\n\
             switchboard_requests_total {}\n\n",
            self.total_requests.get()
        ));

        output.push_str(&format!(
            "# HELP switchboard_routed_total Requests answered\n\
             # TYPE switchboard_routed_total counter\n\
             switchboard_routed_total {}\n\n",
            self.total_routed.get()
        ));

        output.push_str(&format!(
            "# HELP switchboard_fallbacks_total Requests answered after a fallback\n\
             # TYPE switchboard_fallbacks_total counter\n\
             switchboard_fallbacks_total {}\n\n",
            self.total_fallbacks.get()
        ));

        output.push_str(&format!(
            "# HELP switchboard_exhausted_total Requests whose chain was exhausted\n\
             # TYPE switchboard_exhausted_total counter\n\
             switchboard_exhausted_total {}\n\n",
            self.total_exhausted.get()
        ));

        output.push_str(&format!(
            "# HELP switchboard_deadline_exceeded_total Requests that ran out of their deadline\n\
             # TYPE switchboard_deadline_exceeded_total counter\n\
             switchboard_deadline_exceeded_total {}\n\n",
            self.total_deadline_exceeded.get()
        ));

        output.push_str(
            "# HELP switchboard_decisions_total Decisions by resolution reason\n\
             # TYPE switchboard_decisions_total counter\n",
        );
        for (reason, count) in self.reason_counts() {
            output.push_str(&format!(
                "switchboard_decisions_total{{reason=\"{}\"}} {count}\n",
                reason.replace('"', "'")
            ));
        }
        output.push('\n');

        for summary in self.endpoint_summaries() {
            let id = &summary.endpoint_id;
            output.push_str(&format!(
                "endpoint_attempts_total{{endpoint=\"{id}\"}} {}\n",
                summary.attempts
            ));
            output.push_str(&format!(
                "endpoint_errors_total{{endpoint=\"{id}\"}} {}\n",
                summary.failures
            ));
            output.push_str(&format!(
                "endpoint_latency_p50_ms{{endpoint=\"{id}\"}} {}\n",
                summary.latency_p50_ms
            ));
            output.push_str(&format!(
                "endpoint_latency_p99_ms{{endpoint=\"{id}\"}} {}\n\n",
                summary.latency_p99_ms
            ));
        }

        output
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Final outcome of one routed request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A response was produced
    Served {
        /// Whether an earlier chain entry failed or was skipped first
        fell_back: bool,
    },
    /// Every chain entry failed or was skipped
    Exhausted,
    /// The caller cancelled
    Cancelled,
    /// The request's overall deadline passed before an endpoint answered
    DeadlineExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new(vec![10.0, 25.0, 50.0, 100.0]);

        hist.record(5.0);
        hist.record(15.0);
        hist.record(75.0);
        hist.record(200.0); // last bucket

        let snap = hist.snapshot();
        assert_eq!(snap.total, 4);
        assert_eq!(snap.min, 5);
        assert_eq!(snap.max, 200);
        assert_eq!(snap.counts, vec![1, 1, 0, 2]);
    }

    #[test]
    fn test_percentiles() {
        let hist = Histogram::new(vec![10.0, 50.0, 100.0, 500.0, 1000.0]);
        for i in 0..100 {
            hist.record(f64::from(i * 10));
        }

        let p50 = hist.snapshot().p50();
        assert!((50.0..=500.0).contains(&p50));
    }

    #[test]
    fn test_endpoint_metrics() {
        let metrics = RouterMetrics::new();

        metrics.record_request(TaskType::Dialogue, &RoutingReason::DefaultRoute, Duration::from_micros(8));
        metrics.record_attempt_start("gpt-4o");
        metrics.record_attempt_failure("gpt-4o", 30_000, true);
        metrics.record_attempt_start("gpt-4o");
        metrics.record_attempt_success("gpt-4o", 800, 120);
        metrics.record_outcome(RequestOutcome::Served { fell_back: true });

        let summary = metrics.endpoint("gpt-4o").summary();
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.active, 0);
        assert!((summary.error_rate - 0.5).abs() < 0.01);
        assert_eq!(metrics.total_fallbacks.get(), 1);
        assert_eq!(metrics.reason_counts().get("default_route"), Some(&1));
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = RouterMetrics::new();
        metrics.record_request(
            TaskType::Acknowledgment,
            &RoutingReason::AutoRule { name: "Offline".into() },
            Duration::ZERO,
        );
        metrics.record_attempt_start("llama-1b");
        metrics.record_attempt_success("llama-1b", 40, 3);

        let text = metrics.to_prometheus();
        assert!(text.contains("switchboard_requests_total 1"));
        assert!(text.contains("switchboard_decisions_total{reason=\"auto_rule(Offline)\"} 1"));
        assert!(text.contains("endpoint_attempts_total{endpoint=\"llama-1b\"} 1"));
    }
}
