//! Routing Test Utilities
//!
//! Mock collaborators for exercising the router without real providers.
//! [`ScriptedExecutor`] answers per endpoint from a script, records every
//! call, and can simulate latency, hangs and provider errors.
//! [`StaticContextProvider`] returns fixed conditions that tests can change.
//!
//! # Usage
//!
//! ```ignore
//! use switchboard_core::routing::test_utils::{ScriptedExecutor, MockBehavior};
//!
//! let executor = ScriptedExecutor::new();
//! executor.set_behavior("gpt-4o", MockBehavior::Hang);
//!
//! // ... route a request ...
//!
//! assert_eq!(executor.request_count("gpt-4o"), 1);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::context::{ContextProvider, SystemConditions};
use super::endpoint::{CostModel, Endpoint, EndpointStatus};
use super::error::ExecutorError;
use super::executor::{EndpointExecutor, ExecutionOutput, HealthProbe, ProbeResult};
use super::registry::EndpointRegistry;
use super::request::TaskRequest;
use super::taxonomy::{CapabilityTier, TaskType};

// ============================================================================
// Behaviors
// ============================================================================

/// How a mock endpoint answers
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return this content
    Reply(String),
    /// Return content with provider-reported usage
    ReplyWithUsage {
        /// Content
        content: String,
        /// Reported input units
        input_units: u32,
        /// Reported output units
        output_units: u32,
    },
    /// Return this error
    Fail(ExecutorError),
    /// Never answer
    Hang,
}

// ============================================================================
// Request Tracking
// ============================================================================

/// Captured call for test verification
#[derive(Clone, Debug)]
pub struct ExecutedCall {
    /// Endpoint that received the call
    pub endpoint_id: String,
    /// Request id
    pub request_id: Uuid,
    /// Task type
    pub task_type: TaskType,
    /// Timeout the engine passed
    pub timeout: Duration,
    /// When the call started
    pub started_at: Instant,
}

// ============================================================================
// Scripted Executor
// ============================================================================

/// Mock executor answering from per-endpoint scripts
///
/// Queued one-shot behaviors are consumed first; after that the endpoint's
/// standing behavior applies, defaulting to a canned reply.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    behaviors: Arc<RwLock<HashMap<String, MockBehavior>>>,
    queued: Arc<Mutex<HashMap<String, VecDeque<MockBehavior>>>>,
    latencies: Arc<RwLock<HashMap<String, Duration>>>,
    history: Arc<Mutex<Vec<ExecutedCall>>>,
    in_flight: Arc<Mutex<HashMap<String, usize>>>,
    peak_in_flight: Arc<Mutex<HashMap<String, usize>>>,
    total_calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("total_calls", &self.total_calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl ScriptedExecutor {
    /// Executor where every endpoint replies successfully
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the standing behavior for an endpoint
    pub fn set_behavior(&self, endpoint_id: &str, behavior: MockBehavior) {
        self.behaviors.write().insert(endpoint_id.to_string(), behavior);
    }

    /// Queue a behavior used for the next call only
    pub fn push_behavior(&self, endpoint_id: &str, behavior: MockBehavior) {
        self.queued
            .lock()
            .entry(endpoint_id.to_string())
            .or_default()
            .push_back(behavior);
    }

    /// Make an endpoint fail with a provider error
    pub fn set_failing(&self, endpoint_id: &str) {
        self.set_behavior(
            endpoint_id,
            MockBehavior::Fail(ExecutorError::Provider {
                code: Some(500),
                message: format!("{endpoint_id} is failing"),
            }),
        );
    }

    /// Simulate latency before answering
    pub fn set_latency(&self, endpoint_id: &str, latency: Duration) {
        self.latencies.write().insert(endpoint_id.to_string(), latency);
    }

    /// All calls, in start order
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutedCall> {
        self.history.lock().clone()
    }

    /// Endpoint ids called, in start order
    #[must_use]
    pub fn called_endpoints(&self) -> Vec<String> {
        self.history.lock().iter().map(|c| c.endpoint_id.clone()).collect()
    }

    /// Calls made to one endpoint
    #[must_use]
    pub fn request_count(&self, endpoint_id: &str) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|c| c.endpoint_id == endpoint_id)
            .count()
    }

    /// Calls made overall
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Highest number of simultaneous calls an endpoint has seen
    #[must_use]
    pub fn peak_concurrency(&self, endpoint_id: &str) -> usize {
        self.peak_in_flight.lock().get(endpoint_id).copied().unwrap_or(0)
    }

    /// Forget recorded calls
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn next_behavior(&self, endpoint_id: &str) -> MockBehavior {
        if let Some(behavior) = self.queued.lock().get_mut(endpoint_id).and_then(VecDeque::pop_front) {
            return behavior;
        }
        self.behaviors
            .read()
            .get(endpoint_id)
            .cloned()
            .unwrap_or_else(|| MockBehavior::Reply(format!("response from {endpoint_id}")))
    }

    fn enter(&self, endpoint_id: &str) {
        let mut in_flight = self.in_flight.lock();
        let now = in_flight.entry(endpoint_id.to_string()).or_insert(0);
        *now += 1;
        let mut peak = self.peak_in_flight.lock();
        let best = peak.entry(endpoint_id.to_string()).or_insert(0);
        *best = (*best).max(*now);
    }

    fn leave(&self, endpoint_id: &str) {
        if let Some(now) = self.in_flight.lock().get_mut(endpoint_id) {
            *now = now.saturating_sub(1);
        }
    }
}

/// Decrements the in-flight count even when the call future is dropped
struct InFlightGuard<'a> {
    executor: &'a ScriptedExecutor,
    endpoint_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.executor.leave(self.endpoint_id);
    }
}

#[async_trait]
impl EndpointExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &TaskRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExecutorError> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.history.lock().push(ExecutedCall {
            endpoint_id: endpoint.id.clone(),
            request_id: request.id,
            task_type: request.task_type,
            timeout,
            started_at: Instant::now(),
        });

        self.enter(&endpoint.id);
        let _guard = InFlightGuard {
            executor: self,
            endpoint_id: &endpoint.id,
        };

        let behavior = self.next_behavior(&endpoint.id);
        let latency = self.latencies.read().get(&endpoint.id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match behavior {
            MockBehavior::Reply(content) => Ok(ExecutionOutput::text(content)),
            MockBehavior::ReplyWithUsage {
                content,
                input_units,
                output_units,
            } => Ok(ExecutionOutput::text(content).with_usage(input_units, output_units)),
            MockBehavior::Fail(error) => Err(error),
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(ExecutorError::Timeout)
            }
        }
    }
}

// ============================================================================
// Scripted Health Probe
// ============================================================================

/// Mock probe returning configured results; unknown endpoints are healthy
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    results: Arc<RwLock<HashMap<String, ProbeResult>>>,
    hanging: Arc<RwLock<HashSet<String>>>,
    probes: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProbe {
    /// Probe reporting everything healthy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result for one endpoint
    pub fn set_result(&self, endpoint_id: &str, result: ProbeResult) {
        self.results.write().insert(endpoint_id.to_string(), result);
    }

    /// Never answer probes for one endpoint
    pub fn set_hanging(&self, endpoint_id: &str) {
        self.hanging.write().insert(endpoint_id.to_string());
    }

    /// Endpoint ids probed, in order
    #[must_use]
    pub fn probed(&self) -> Vec<String> {
        self.probes.lock().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
        self.probes.lock().push(endpoint.id.clone());
        let hang = self.hanging.read().contains(&endpoint.id);
        if hang {
            std::future::pending::<()>().await;
        }
        self.results
            .read()
            .get(&endpoint.id)
            .cloned()
            .unwrap_or(ProbeResult::Healthy { latency_ms: 25 })
    }
}

// ============================================================================
// Static Context
// ============================================================================

/// Context provider returning whatever conditions were last set
#[derive(Clone, Default)]
pub struct StaticContextProvider {
    conditions: Arc<RwLock<SystemConditions>>,
}

impl StaticContextProvider {
    /// Provider returning `conditions`
    #[must_use]
    pub fn new(conditions: SystemConditions) -> Self {
        Self {
            conditions: Arc::new(RwLock::new(conditions)),
        }
    }

    /// Replace the conditions
    pub fn set(&self, conditions: SystemConditions) {
        *self.conditions.write() = conditions;
    }

    /// Modify the conditions in place
    pub fn update(&self, f: impl FnOnce(&mut SystemConditions)) {
        f(&mut self.conditions.write());
    }
}

impl ContextProvider for StaticContextProvider {
    fn current(&self) -> SystemConditions {
        self.conditions.read().clone()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A cloud frontier model, a cheap cloud model, a LAN server and an
/// on-device model, all available
#[must_use]
pub fn standard_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::cloud(
            "gpt-4o",
            CapabilityTier::Frontier,
            "OPENAI_API_KEY",
            CostModel {
                per_input_unit: 0.000_002_5,
                per_output_unit: 0.000_01,
            },
        )
        .with_status(EndpointStatus::Available),
        Endpoint::cloud(
            "gpt-4o-mini",
            CapabilityTier::Medium,
            "OPENAI_API_KEY",
            CostModel {
                per_input_unit: 0.000_000_15,
                per_output_unit: 0.000_000_6,
            },
        )
        .with_status(EndpointStatus::Available),
        Endpoint::local_server("qwen-14b", CapabilityTier::Medium, "mac-studio.local", 11434)
            .with_status(EndpointStatus::Available),
        Endpoint::on_device("on-device-1b", CapabilityTier::Tiny, "/models/llama-3.2-1b.gguf")
            .with_status(EndpointStatus::Available),
    ]
}

/// Registry holding [`standard_endpoints`]
#[must_use]
pub fn standard_registry() -> EndpointRegistry {
    let registry = EndpointRegistry::new();
    for endpoint in standard_endpoints() {
        // ids are unique and endpoints valid
        let _ = registry.register(endpoint);
    }
    registry
}
