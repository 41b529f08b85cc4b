//! Task Router
//!
//! The single entry point calling code uses. Captures the routing context,
//! resolves a chain under a short read lock on the table, then hands the
//! chain to the fallback engine with no lock held.
//!
//! # Usage
//!
//! ```ignore
//! let router = TaskRouter::builder(registry, table, executor)
//!     .with_settings(settings)
//!     .with_context_provider(device_conditions)
//!     .build()?;
//!
//! let response = router.route(&TaskRequest::new(TaskType::Dialogue, prompt)).await?;
//! ```
//!
//! # Control Surface
//!
//! Mutating control calls (overrides, rule toggles, endpoint disable) only
//! take effect while developer mode is on. Otherwise they are logged and
//! return [`ControlOutcome::Ignored`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{load_registry, load_routing_table, RouterSettings};

use super::context::{ContextProvider, NominalConditions, RoutingContext};
use super::endpoint::{EndpointStatus, StatusSource};
use super::engine::{EngineParts, FallbackEngine};
use super::error::RouterError;
use super::executor::{EndpointExecutor, HealthProbe};
use super::health::HealthMonitor;
use super::history::RoutingHistory;
use super::limiter::EndpointLimiter;
use super::metrics::RouterMetrics;
use super::registry::EndpointRegistry;
use super::request::{TaskRequest, TaskResponse};
use super::resolver::{Resolver, RoutingDecision};
use super::stats::RoutingStats;
use super::table::RoutingTable;
use super::taxonomy::TaskType;
use super::telemetry::{TelemetryEvent, TelemetrySink};

// ============================================================================
// Control Outcome
// ============================================================================

/// Result of a control call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The change was made
    Applied,
    /// Nothing changed (developer mode off, or unknown target)
    Ignored,
}

impl ControlOutcome {
    /// Whether the change was made
    #[must_use]
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`TaskRouter`]
pub struct TaskRouterBuilder {
    registry: Arc<EndpointRegistry>,
    table: RoutingTable,
    executor: Arc<dyn EndpointExecutor>,
    context: Arc<dyn ContextProvider>,
    settings: RouterSettings,
    telemetry: TelemetrySink,
}

impl TaskRouterBuilder {
    /// Use these settings instead of the defaults
    #[must_use]
    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Supply live device and session conditions
    #[must_use]
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = provider;
        self
    }

    /// Publish events on an existing sink
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Validate settings and table, then build
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidConfiguration`] if either is invalid.
    pub fn build(self) -> Result<TaskRouter, RouterError> {
        self.settings.validate()?;
        self.table.validate(&self.registry)?;

        let limiter = match self.settings.max_concurrent_per_endpoint {
            Some(cap) => EndpointLimiter::with_default_cap(cap),
            None => EndpointLimiter::new(),
        };
        let history = Arc::new(RoutingHistory::new(self.settings.history_capacity));
        let metrics = Arc::new(RouterMetrics::new());
        let limiter = Arc::new(limiter);

        let engine = FallbackEngine::new(
            EngineParts {
                registry: Arc::clone(&self.registry),
                executor: self.executor,
                limiter: Arc::clone(&limiter),
                history: Arc::clone(&history),
                metrics: Arc::clone(&metrics),
                telemetry: self.telemetry.clone(),
            },
            self.settings.engine_config(),
        );

        tracing::info!(
            endpoints = self.registry.len(),
            rules = self.table.auto_routing_rules.len(),
            developer_mode = self.settings.developer_mode,
            "Task router ready"
        );

        Ok(TaskRouter {
            resolver: Resolver::new().with_tier_compliance(self.settings.enforce_tier_compliance),
            developer_mode: AtomicBool::new(self.settings.developer_mode),
            registry: self.registry,
            table: RwLock::new(self.table),
            history,
            limiter,
            context: self.context,
            metrics,
            telemetry: self.telemetry,
            engine,
            settings: self.settings,
        })
    }
}

// ============================================================================
// Task Router
// ============================================================================

/// Routing authority for inference tasks
pub struct TaskRouter {
    registry: Arc<EndpointRegistry>,
    table: RwLock<RoutingTable>,
    history: Arc<RoutingHistory>,
    limiter: Arc<EndpointLimiter>,
    context: Arc<dyn ContextProvider>,
    metrics: Arc<RouterMetrics>,
    telemetry: TelemetrySink,
    resolver: Resolver,
    engine: FallbackEngine,
    settings: RouterSettings,
    developer_mode: AtomicBool,
}

impl TaskRouter {
    /// Start building a router
    #[must_use]
    pub fn builder(
        registry: Arc<EndpointRegistry>,
        table: RoutingTable,
        executor: Arc<dyn EndpointExecutor>,
    ) -> TaskRouterBuilder {
        TaskRouterBuilder {
            registry,
            table,
            executor,
            context: Arc::new(NominalConditions),
            settings: RouterSettings::default(),
            telemetry: TelemetrySink::default(),
        }
    }

    /// Build a router from the data files named in `settings`
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidConfiguration`] if a file is missing, unreadable
    /// or invalid.
    pub fn from_settings(settings: RouterSettings, executor: Arc<dyn EndpointExecutor>) -> Result<Self, RouterError> {
        let endpoints_path = settings
            .endpoints_path
            .clone()
            .ok_or_else(|| RouterError::InvalidConfiguration("no endpoints file configured".into()))?;
        let table_path = settings
            .routing_table_path
            .clone()
            .ok_or_else(|| RouterError::InvalidConfiguration("no routing table file configured".into()))?;

        let registry = Arc::new(load_registry(&endpoints_path)?);
        let table = load_routing_table(&table_path)?;
        Self::builder(registry, table, executor).with_settings(settings).build()
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route a request to the first endpoint that can serve it
    ///
    /// # Errors
    ///
    /// [`RouterError::AllEndpointsFailed`] when the chain is exhausted.
    pub async fn route(&self, request: &TaskRequest) -> Result<TaskResponse, RouterError> {
        self.route_with_cancel(request, &CancellationToken::new()).await
    }

    /// Route a request, stopping as soon as `cancel` fires
    ///
    /// # Errors
    ///
    /// [`RouterError::AllEndpointsFailed`] when the chain is exhausted,
    /// [`RouterError::DeadlineExceeded`] when the request's deadline runs out,
    /// [`RouterError::Cancelled`] when cancelled or the limiter is closed.
    pub async fn route_with_cancel(
        &self,
        request: &TaskRequest,
        cancel: &CancellationToken,
    ) -> Result<TaskResponse, RouterError> {
        let started = Instant::now();
        let (decision, context) = self.resolve(request);
        self.metrics
            .record_request(request.task_type, &decision.reason, started.elapsed());

        self.engine
            .execute_with_fallback(request, &decision, &context, cancel)
            .await
    }

    /// Capture the context and resolve a chain, without executing
    #[must_use]
    pub fn resolve(&self, request: &TaskRequest) -> (RoutingDecision, RoutingContext) {
        let table = self.table.read();
        let context = self.capture_context(request, &table);
        let decision = self.resolver.resolve(request, &table, &self.registry, &context);
        (decision, context)
    }

    fn capture_context(&self, request: &TaskRequest, table: &RoutingTable) -> RoutingContext {
        RoutingContext::capture(self.context.current().into_context(), request, table, &self.registry)
    }

    // ========================================================================
    // Control Surface
    // ========================================================================

    /// Whether control calls take effect
    #[must_use]
    pub fn developer_mode(&self) -> bool {
        self.developer_mode.load(Ordering::Acquire)
    }

    /// Turn developer mode on or off
    pub fn set_developer_mode(&self, enabled: bool) {
        self.developer_mode.store(enabled, Ordering::Release);
        tracing::info!(enabled, "Developer mode changed");
    }

    fn control_allowed(&self, operation: &'static str) -> bool {
        let allowed = self.developer_mode();
        if !allowed {
            tracing::warn!(operation, "Developer mode disabled, ignoring control call");
        }
        allowed
    }

    fn known_endpoint(&self, operation: &'static str, endpoint_id: Option<&str>) -> bool {
        match endpoint_id {
            Some(id) if !self.registry.contains(id) => {
                tracing::warn!(operation, endpoint = %id, "Unknown endpoint, ignoring control call");
                false
            }
            _ => true,
        }
    }

    /// Send every task to one endpoint, or clear the override with `None`
    pub fn set_global_override(&self, endpoint_id: Option<&str>) -> ControlOutcome {
        const OP: &str = "set_global_override";
        if !self.control_allowed(OP) || !self.known_endpoint(OP, endpoint_id) {
            return ControlOutcome::Ignored;
        }
        self.table.write().set_global_override(endpoint_id.map(str::to_string));
        tracing::info!(endpoint = ?endpoint_id, "Global override changed");
        ControlOutcome::Applied
    }

    /// Pin a task type to one endpoint, or clear the pin with `None`
    pub fn set_manual_override(&self, task_type: TaskType, endpoint_id: Option<&str>) -> ControlOutcome {
        const OP: &str = "set_manual_override";
        if !self.control_allowed(OP) || !self.known_endpoint(OP, endpoint_id) {
            return ControlOutcome::Ignored;
        }
        self.table
            .write()
            .set_manual_override(task_type, endpoint_id.map(str::to_string));
        tracing::info!(%task_type, endpoint = ?endpoint_id, "Manual override changed");
        ControlOutcome::Applied
    }

    /// Enable or disable an auto-routing rule
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> ControlOutcome {
        if !self.control_allowed("set_rule_enabled") {
            return ControlOutcome::Ignored;
        }
        if !self.table.write().set_rule_enabled(rule_id, enabled) {
            tracing::warn!(rule = %rule_id, "Unknown rule, ignoring control call");
            return ControlOutcome::Ignored;
        }
        tracing::info!(rule = %rule_id, enabled, "Rule toggled");
        ControlOutcome::Applied
    }

    /// Take an endpoint out of rotation, or put it back as available
    pub fn set_endpoint_disabled(&self, endpoint_id: &str, disabled: bool) -> ControlOutcome {
        if !self.control_allowed("set_endpoint_disabled") {
            return ControlOutcome::Ignored;
        }
        let target = if disabled {
            EndpointStatus::Disabled
        } else {
            EndpointStatus::Available
        };
        match self.registry.set_status(endpoint_id, target, StatusSource::Operator) {
            Ok(change) => {
                self.telemetry.emit_status(change);
                ControlOutcome::Applied
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint_id, error = %e, "Ignoring endpoint status change");
                ControlOutcome::Ignored
            }
        }
    }

    // ========================================================================
    // Observability
    // ========================================================================

    /// Aggregates over history; latency and failure rates use the last
    /// `window` records
    #[must_use]
    pub fn routing_stats(&self, window: usize) -> RoutingStats {
        RoutingStats::compute(&self.history.snapshot(), window)
    }

    /// Current routing table
    #[must_use]
    pub fn table_snapshot(&self) -> RoutingTable {
        self.table.read().clone()
    }

    /// Routing table as pretty JSON
    pub fn export_table_json(&self) -> Result<String, serde_json::Error> {
        self.table.read().to_json_pretty()
    }

    /// History as a JSON array
    pub fn export_history_json(&self) -> Result<String, serde_json::Error> {
        self.history.export_json()
    }

    /// Receive telemetry events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry.subscribe()
    }

    /// Health monitor feeding this router's registry
    #[must_use]
    pub fn health_monitor(&self, probe: Arc<dyn HealthProbe>) -> HealthMonitor {
        HealthMonitor::new(Arc::clone(&self.registry), probe, self.telemetry.clone())
            .with_interval(self.settings.health_check_interval())
            .with_probe_timeout(self.settings.health_probe_timeout())
    }

    /// Endpoint registry
    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Routing history
    #[must_use]
    pub fn history(&self) -> &Arc<RoutingHistory> {
        &self.history
    }

    /// Concurrency limiter
    #[must_use]
    pub fn limiter(&self) -> &Arc<EndpointLimiter> {
        &self.limiter
    }

    /// Router metrics
    #[must_use]
    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Effective settings
    #[must_use]
    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::context::{NetworkType, SystemConditions};
    use crate::routing::resolver::RoutingReason;
    use crate::routing::test_utils::{standard_registry, ScriptedExecutor, StaticContextProvider};

    fn table() -> RoutingTable {
        RoutingTable::with_fallback(["gpt-4o-mini"]).with_default_route(TaskType::Dialogue, ["gpt-4o", "qwen-14b"])
    }

    fn router(developer_mode: bool) -> TaskRouter {
        let settings = RouterSettings {
            developer_mode,
            ..RouterSettings::default()
        };
        TaskRouter::builder(Arc::new(standard_registry()), table(), Arc::new(ScriptedExecutor::new()))
            .with_settings(settings)
            .build()
            .unwrap()
    }

    #[test]
    fn test_control_ignored_without_developer_mode() {
        let router = router(false);
        let before = router.table_snapshot();

        assert_eq!(router.set_global_override(Some("qwen-14b")), ControlOutcome::Ignored);
        assert_eq!(
            router.set_manual_override(TaskType::Dialogue, Some("qwen-14b")),
            ControlOutcome::Ignored
        );
        assert_eq!(router.set_endpoint_disabled("gpt-4o", true), ControlOutcome::Ignored);

        assert_eq!(router.table_snapshot(), before);
        assert_eq!(router.registry().status("gpt-4o"), Some(EndpointStatus::Available));
    }

    #[test]
    fn test_control_applies_in_developer_mode() {
        let router = router(true);
        assert!(router.set_global_override(Some("qwen-14b")).is_applied());

        let request = TaskRequest::new(TaskType::Dialogue, "hi");
        let (decision, _) = router.resolve(&request);
        assert_eq!(decision.chain, vec!["qwen-14b"]);
        assert_eq!(decision.reason, RoutingReason::GlobalOverride);

        assert!(router.set_global_override(None).is_applied());
        let (decision, _) = router.resolve(&request);
        assert_eq!(decision.reason, RoutingReason::DefaultRoute);
    }

    #[test]
    fn test_unknown_targets_ignored() {
        let router = router(true);
        assert_eq!(router.set_global_override(Some("ghost")), ControlOutcome::Ignored);
        assert_eq!(router.set_rule_enabled("no-such-rule", false), ControlOutcome::Ignored);
        assert_eq!(router.set_endpoint_disabled("ghost", true), ControlOutcome::Ignored);
    }

    #[test]
    fn test_developer_mode_toggle() {
        let router = router(false);
        router.set_developer_mode(true);
        assert!(router.set_endpoint_disabled("gpt-4o", true).is_applied());
        assert_eq!(router.registry().status("gpt-4o"), Some(EndpointStatus::Disabled));

        assert!(router.set_endpoint_disabled("gpt-4o", false).is_applied());
        assert_eq!(router.registry().status("gpt-4o"), Some(EndpointStatus::Available));
    }

    #[test]
    fn test_context_capture_fills_request_and_registry_fields() {
        let provider = StaticContextProvider::new(SystemConditions {
            network_type: NetworkType::Cellular,
            ..SystemConditions::default()
        });
        let router = TaskRouter::builder(Arc::new(standard_registry()), table(), Arc::new(ScriptedExecutor::new()))
            .with_context_provider(Arc::new(provider))
            .build()
            .unwrap();

        let request = TaskRequest::new(TaskType::Dialogue, "x".repeat(400));
        let (_, context) = router.resolve(&request);

        assert_eq!(context.network_type, NetworkType::Cellular);
        assert_eq!(context.prompt_length, 400);
        assert_eq!(context.endpoint_status.len(), 4);
        let expected = request.estimated_cost_on(&router.registry().get("gpt-4o").unwrap());
        assert_eq!(context.task_cost_estimate, Some(expected));
    }

    #[test]
    fn test_invalid_table_rejected_at_build() {
        let bad = RoutingTable::with_fallback(["ghost"]);
        let result = TaskRouter::builder(Arc::new(standard_registry()), bad, Arc::new(ScriptedExecutor::new())).build();
        assert!(matches!(result, Err(RouterError::InvalidConfiguration(_))));
    }
}
