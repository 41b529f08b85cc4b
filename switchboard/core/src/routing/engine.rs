//! Execution-with-Fallback Engine
//!
//! Walks a resolved chain strictly in order, one endpoint at a time:
//!
//! ```text
//! for id in chain (each id once):
//!     cancelled?            -> stop, Cancelled (no status change)
//!     deadline passed?      -> stop, DeadlineExceeded { causes }
//!     not available?        -> skip (EndpointUnavailable)
//!     estimate > max_cost?  -> skip (OverBudget)
//!     wait for slot + execute, bounded by min(attempt timeout, time left)
//!         ok       -> record, return TaskResponse
//!         timeout  -> record, count failure, next
//!         error    -> record, count failure, next
//!         limiter closed -> stop, Cancelled
//! chain exhausted -> AllEndpointsFailed { causes }
//! ```
//!
//! Every attempt or skip is appended to history as its own record. Timeouts
//! and execution errors count toward the endpoint's degrade threshold; skips,
//! cancellations and attempts cut short by the request deadline do not.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::context::RoutingContext;
use super::endpoint::Endpoint;
use super::error::{AttemptError, ExecutorError, RouterError};
use super::executor::{EndpointExecutor, ExecutionOutput};
use super::history::{AttemptOutcome, AttemptRecord, RoutingHistory, RoutingRecord};
use super::limiter::EndpointLimiter;
use super::metrics::{RequestOutcome, RouterMetrics};
use super::registry::EndpointRegistry;
use super::request::{TaskRequest, TaskResponse};
use super::resolver::RoutingDecision;
use super::telemetry::{TelemetryEvent, TelemetrySink};

/// Default consecutive failures before an endpoint is degraded
pub const DEFAULT_DEGRADE_AFTER_FAILURES: u32 = 3;

/// Engine tuning
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Consecutive failures before `available -> degraded`
    pub degrade_after_failures: u32,

    /// Attempt timeout when neither request nor endpoint sets one;
    /// `None` uses the task type's default
    pub attempt_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            degrade_after_failures: DEFAULT_DEGRADE_AFTER_FAILURES,
            attempt_timeout: None,
        }
    }
}

/// Shared state the engine reads and writes
#[derive(Clone)]
pub struct EngineParts {
    /// Endpoint statuses
    pub registry: Arc<EndpointRegistry>,
    /// Provider adapter
    pub executor: Arc<dyn EndpointExecutor>,
    /// Concurrency caps
    pub limiter: Arc<EndpointLimiter>,
    /// Attempt log
    pub history: Arc<RoutingHistory>,
    /// Counters
    pub metrics: Arc<RouterMetrics>,
    /// Event channel
    pub telemetry: TelemetrySink,
}

enum AttemptResult {
    Served(ExecutionOutput),
    Failed(AttemptError),
    Cancelled,
}

/// Executes requests along a routing decision
pub struct FallbackEngine {
    parts: EngineParts,
    config: EngineConfig,
}

impl FallbackEngine {
    /// Create an engine over shared parts
    #[must_use]
    pub fn new(parts: EngineParts, config: EngineConfig) -> Self {
        Self { parts, config }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Per-attempt deadline for `request` on `endpoint`
    ///
    /// Request override, then endpoint override, then engine default, then
    /// the task type's default.
    #[must_use]
    pub fn attempt_timeout(&self, request: &TaskRequest, endpoint: &Endpoint) -> Duration {
        request
            .constraints
            .attempt_timeout_ms
            .or(endpoint.attempt_timeout_ms)
            .map(Duration::from_millis)
            .or(self.config.attempt_timeout)
            .unwrap_or_else(|| request.task_type.default_timeout())
    }

    /// Walk `decision.chain` until an endpoint answers
    pub async fn execute_with_fallback(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        context: &RoutingContext,
        cancel: &CancellationToken,
    ) -> Result<TaskResponse, RouterError> {
        let mut causes: Vec<AttemptError> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let deadline = request
            .constraints
            .deadline_ms
            .map(|ms| (ms, Instant::now() + Duration::from_millis(ms)));

        for endpoint_id in &decision.chain {
            if cancel.is_cancelled() {
                return Err(self.cancelled(request));
            }
            if !seen.insert(endpoint_id.as_str()) {
                continue;
            }
            if let Some((deadline_ms, at)) = deadline {
                if Instant::now() >= at {
                    return Err(self.deadline_exceeded(request, deadline_ms, causes));
                }
            }

            let endpoint = match self.parts.registry.get(endpoint_id) {
                Some(endpoint) if endpoint.status.is_available() => endpoint,
                other => {
                    let status = other.map_or_else(|| "unknown".to_string(), |e| e.status.to_string());
                    let error = AttemptError::EndpointUnavailable {
                        endpoint_id: endpoint_id.clone(),
                        status,
                    };
                    self.record_skip(request, decision, context, AttemptOutcome::Unavailable, &error);
                    causes.push(error);
                    continue;
                }
            };

            if let Some(max_cost) = request.constraints.max_cost {
                let estimated = request.estimated_cost_on(&endpoint);
                if estimated > max_cost {
                    let error = AttemptError::OverBudget {
                        endpoint_id: endpoint_id.clone(),
                        estimated,
                        max_cost,
                    };
                    self.record_skip(request, decision, context, AttemptOutcome::OverBudget, &error);
                    causes.push(error);
                    continue;
                }
            }

            let mut timeout = self.attempt_timeout(request, &endpoint);
            let mut cut_by_deadline = false;
            if let Some((_, at)) = deadline {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining < timeout {
                    timeout = remaining;
                    cut_by_deadline = true;
                }
            }

            let started = Instant::now();
            self.parts.metrics.record_attempt_start(endpoint_id);

            let result = self.attempt(&endpoint, request, timeout, cancel).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                AttemptResult::Served(output) => {
                    let response = self.record_success(request, decision, context, &endpoint, output, latency_ms);
                    self.parts.metrics.record_outcome(RequestOutcome::Served {
                        fell_back: !causes.is_empty(),
                    });
                    return Ok(response);
                }
                AttemptResult::Failed(error @ AttemptError::EndpointTimeout { .. }) if cut_by_deadline => {
                    // The caller's budget ran out, not the endpoint
                    self.parts.metrics.record_attempt_cancelled(endpoint_id);
                    causes.push(error);
                    if let Some((deadline_ms, _)) = deadline {
                        return Err(self.deadline_exceeded(request, deadline_ms, causes));
                    }
                }
                AttemptResult::Failed(error) => {
                    self.record_failure(request, decision, context, &error, latency_ms);
                    causes.push(error);
                }
                AttemptResult::Cancelled => {
                    self.parts.metrics.record_attempt_cancelled(endpoint_id);
                    return Err(self.cancelled(request));
                }
            }
        }

        tracing::warn!(
            request_id = %request.id,
            task_type = %request.task_type,
            chain = ?decision.chain,
            "All endpoints failed"
        );
        self.parts.metrics.record_outcome(RequestOutcome::Exhausted);
        self.parts.telemetry.emit(TelemetryEvent::ChainExhausted {
            request_id: request.id,
            task_type: request.task_type,
        });

        Err(RouterError::AllEndpointsFailed {
            task_type: request.task_type,
            chain: decision.chain.clone(),
            causes,
        })
    }

    /// One bounded, cancellable attempt; waiting for a slot counts
    /// against the timeout
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        request: &TaskRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let run = async {
            let Some(_permit) = self.parts.limiter.acquire(endpoint).await else {
                return None;
            };
            Some(self.parts.executor.execute(endpoint, request, timeout).await)
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return AttemptResult::Cancelled,
            outcome = tokio::time::timeout(timeout, run) => outcome,
        };

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(None) => {
                tracing::info!(endpoint = %endpoint.id, "Endpoint limiter closed, abandoning request");
                AttemptResult::Cancelled
            }
            Ok(Some(Ok(output))) => AttemptResult::Served(output),
            Ok(Some(Err(ExecutorError::Timeout))) | Err(_) => AttemptResult::Failed(AttemptError::EndpointTimeout {
                endpoint_id: endpoint.id.clone(),
                timeout_ms,
            }),
            Ok(Some(Err(error))) => AttemptResult::Failed(AttemptError::EndpointExecutionError {
                endpoint_id: endpoint.id.clone(),
                error,
            }),
        }
    }

    fn cancelled(&self, request: &TaskRequest) -> RouterError {
        tracing::info!(request_id = %request.id, "Request cancelled by caller");
        self.parts.metrics.record_outcome(RequestOutcome::Cancelled);
        RouterError::Cancelled
    }

    fn deadline_exceeded(&self, request: &TaskRequest, deadline_ms: u64, causes: Vec<AttemptError>) -> RouterError {
        tracing::warn!(
            request_id = %request.id,
            task_type = %request.task_type,
            deadline_ms,
            attempts = causes.len(),
            "Request deadline exceeded"
        );
        self.parts.metrics.record_outcome(RequestOutcome::DeadlineExceeded);
        RouterError::DeadlineExceeded {
            task_type: request.task_type,
            deadline_ms,
            causes,
        }
    }

    fn append(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        context: &RoutingContext,
        attempt: AttemptRecord,
    ) {
        self.parts.history.append(RoutingRecord::new(
            request.id,
            request.task_type,
            decision.clone(),
            context.clone(),
            attempt,
        ));
    }

    fn record_skip(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        context: &RoutingContext,
        outcome: AttemptOutcome,
        error: &AttemptError,
    ) {
        let endpoint_id = error.endpoint_id();
        tracing::debug!(request_id = %request.id, endpoint = %endpoint_id, %error, "Skipping endpoint");

        self.parts.metrics.record_skip(endpoint_id);
        self.append(
            request,
            decision,
            context,
            AttemptRecord::failed(endpoint_id, outcome, 0, error.to_string()),
        );
        self.parts.telemetry.emit(TelemetryEvent::AttemptFailed {
            request_id: request.id,
            endpoint_id: endpoint_id.to_string(),
            task_type: request.task_type,
            error: error.clone(),
        });
    }

    fn record_failure(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        context: &RoutingContext,
        error: &AttemptError,
        latency_ms: u64,
    ) {
        let endpoint_id = error.endpoint_id();
        let is_timeout = matches!(error, AttemptError::EndpointTimeout { .. });
        tracing::warn!(
            request_id = %request.id,
            endpoint = %endpoint_id,
            latency_ms,
            %error,
            "Attempt failed, falling back"
        );

        let outcome = if is_timeout {
            AttemptOutcome::Timeout
        } else {
            AttemptOutcome::ExecutionError
        };
        self.parts.metrics.record_attempt_failure(endpoint_id, latency_ms, is_timeout);
        self.append(
            request,
            decision,
            context,
            AttemptRecord::failed(endpoint_id, outcome, latency_ms, error.to_string()),
        );

        let change = self
            .parts
            .registry
            .record_execution_failure(endpoint_id, self.config.degrade_after_failures);
        self.parts.telemetry.emit_status(change);
        self.parts.telemetry.emit(TelemetryEvent::AttemptFailed {
            request_id: request.id,
            endpoint_id: endpoint_id.to_string(),
            task_type: request.task_type,
            error: error.clone(),
        });
    }

    fn record_success(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        context: &RoutingContext,
        endpoint: &Endpoint,
        output: ExecutionOutput,
        latency_ms: u64,
    ) -> TaskResponse {
        let (input_units, output_units) = output.units_for(request);
        let cost = endpoint.cost_for(input_units, output_units);

        self.parts.registry.record_execution_success(&endpoint.id, latency_ms);
        self.parts
            .metrics
            .record_attempt_success(&endpoint.id, latency_ms, output_units);
        self.append(
            request,
            decision,
            context,
            AttemptRecord {
                endpoint_id: endpoint.id.clone(),
                outcome: AttemptOutcome::Success,
                latency_ms,
                input_units,
                output_units,
                cost,
                error: None,
            },
        );
        self.parts.telemetry.emit(TelemetryEvent::RequestServed {
            request_id: request.id,
            endpoint_id: endpoint.id.clone(),
            latency_ms,
            cost,
        });

        tracing::debug!(
            request_id = %request.id,
            endpoint = %endpoint.id,
            latency_ms,
            input_units,
            output_units,
            cost,
            "Request served"
        );

        TaskResponse {
            request_id: request.id,
            content: output.content,
            endpoint_used: endpoint.id.clone(),
            latency_ms,
            input_units,
            output_units,
            cost,
        }
    }
}
