//! Routing Resolver
//!
//! Pure function from (request, table, registry, context) to an ordered
//! endpoint chain. Never performs I/O and never awaits.
//!
//! # Precedence
//!
//! ```text
//! 1. Global override     [id]                      if available
//! 2. Manual override     [id]                      if available
//! 3. Auto rules          [target] + fallback       first match by priority, target available
//! 4. Default route       available(defaults) + fallback
//! 5. Fallback            fallback (unfiltered)
//! ```
//!
//! Each step is a [`ResolutionStep`] returning `Some(decision)` to stop the
//! pipeline or `None` to pass to the next one.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::RoutingContext;
use super::registry::EndpointRegistry;
use super::request::TaskRequest;
use super::table::RoutingTable;

// ============================================================================
// Decision
// ============================================================================

/// Why a chain was chosen
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingReason {
    /// Global override
    GlobalOverride,
    /// Per-task manual override
    ManualOverride,
    /// Auto-routing rule matched
    AutoRule {
        /// Rule name
        name: String,
    },
    /// Task type's default route
    DefaultRoute,
    /// Terminal fallback chain
    Fallback,
}

impl fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalOverride => f.write_str("global_override"),
            Self::ManualOverride => f.write_str("manual_override"),
            Self::AutoRule { name } => write!(f, "auto_rule({name})"),
            Self::DefaultRoute => f.write_str("default_route"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Ordered candidate chain plus the reason it was chosen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Endpoint ids, in attempt order
    pub chain: Vec<String>,
    /// Why this chain
    pub reason: RoutingReason,
}

impl RoutingDecision {
    /// Decision with this chain and reason
    #[must_use]
    pub fn new(chain: Vec<String>, reason: RoutingReason) -> Self {
        Self { chain, reason }
    }

    /// First endpoint in the chain
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.chain.first().map(String::as_str)
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Everything a step may look at
#[derive(Clone, Copy)]
pub struct ResolutionInput<'a> {
    /// Request being routed
    pub request: &'a TaskRequest,
    /// Routing configuration
    pub table: &'a RoutingTable,
    /// Endpoint statuses
    pub registry: &'a EndpointRegistry,
    /// Live conditions
    pub context: &'a RoutingContext,
}

/// One stage of the precedence pipeline
pub trait ResolutionStep: Send + Sync {
    /// Step name for logs
    fn name(&self) -> &'static str;

    /// Produce a decision, or `None` to defer to the next step
    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision>;
}

fn with_fallback(mut head: Vec<String>, table: &RoutingTable) -> Vec<String> {
    head.extend(table.fallback_chain.iter().cloned());
    head
}

/// Step 1: diagnostic "send everything to X"
pub struct GlobalOverrideStep;

impl ResolutionStep for GlobalOverrideStep {
    fn name(&self) -> &'static str {
        "global_override"
    }

    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision> {
        let id = input.table.global_override.as_ref()?;
        input
            .registry
            .is_available(id)
            .then(|| RoutingDecision::new(vec![id.clone()], RoutingReason::GlobalOverride))
    }
}

/// Step 2: per-task manual override
pub struct ManualOverrideStep;

impl ResolutionStep for ManualOverrideStep {
    fn name(&self) -> &'static str {
        "manual_override"
    }

    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision> {
        let id = input.table.manual_overrides.get(&input.request.task_type)?;
        input
            .registry
            .is_available(id)
            .then(|| RoutingDecision::new(vec![id.clone()], RoutingReason::ManualOverride))
    }
}

/// Step 3: first matching rule whose target is available
pub struct AutoRuleStep;

impl ResolutionStep for AutoRuleStep {
    fn name(&self) -> &'static str {
        "auto_rule"
    }

    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision> {
        input
            .table
            .rules_for(input.request.task_type)
            .into_iter()
            .find(|rule| rule.matches(input.context) && input.registry.is_available(&rule.target_endpoint))
            .map(|rule| {
                RoutingDecision::new(
                    with_fallback(vec![rule.target_endpoint.clone()], input.table),
                    RoutingReason::AutoRule {
                        name: rule.name.clone(),
                    },
                )
            })
    }
}

/// Step 4: available part of the task's default chain
pub struct DefaultRouteStep;

impl ResolutionStep for DefaultRouteStep {
    fn name(&self) -> &'static str {
        "default_route"
    }

    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision> {
        let defaults = input.table.default_routes.get(&input.request.task_type)?;
        let available: Vec<String> = defaults
            .iter()
            .filter(|id| input.registry.is_available(id))
            .cloned()
            .collect();

        if available.is_empty() {
            return None;
        }
        Some(RoutingDecision::new(
            with_fallback(available, input.table),
            RoutingReason::DefaultRoute,
        ))
    }
}

/// Step 5: the fallback chain as configured
///
/// Not filtered: availability is re-checked per attempt.
pub struct FallbackStep;

impl ResolutionStep for FallbackStep {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn resolve(&self, input: &ResolutionInput<'_>) -> Option<RoutingDecision> {
        Some(RoutingDecision::new(
            input.table.fallback_chain.clone(),
            RoutingReason::Fallback,
        ))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Fixed-order pipeline of resolution steps
pub struct Resolver {
    steps: Vec<Box<dyn ResolutionStep>>,
    enforce_tier_compliance: bool,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Standard five-step pipeline
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: vec![
                Box::new(GlobalOverrideStep),
                Box::new(ManualOverrideStep),
                Box::new(AutoRuleStep),
                Box::new(DefaultRouteStep),
                Box::new(FallbackStep),
            ],
            enforce_tier_compliance: false,
        }
    }

    /// Drop endpoints below the task's minimum tier after chain construction
    #[must_use]
    pub fn with_tier_compliance(mut self, enforce: bool) -> Self {
        self.enforce_tier_compliance = enforce;
        self
    }

    /// Names of the steps, in evaluation order
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Resolve a request to a decision
    #[must_use]
    pub fn resolve(
        &self,
        request: &TaskRequest,
        table: &RoutingTable,
        registry: &EndpointRegistry,
        context: &RoutingContext,
    ) -> RoutingDecision {
        let input = ResolutionInput {
            request,
            table,
            registry,
            context,
        };

        let decision = self
            .steps
            .iter()
            .find_map(|step| step.resolve(&input))
            .unwrap_or_else(|| RoutingDecision::new(table.fallback_chain.clone(), RoutingReason::Fallback));

        let decision = if self.enforce_tier_compliance {
            Self::filter_by_tier(decision, request, registry)
        } else {
            decision
        };

        tracing::debug!(
            request_id = %request.id,
            task_type = %request.task_type,
            reason = %decision.reason,
            chain = ?decision.chain,
            "Resolved routing decision"
        );

        decision
    }

    /// Remove registered endpoints whose tier is too low, unless that
    /// would leave nothing to try
    fn filter_by_tier(
        decision: RoutingDecision,
        request: &TaskRequest,
        registry: &EndpointRegistry,
    ) -> RoutingDecision {
        let required = request.task_type.minimum_tier();
        let compliant: Vec<String> = decision
            .chain
            .iter()
            .filter(|id| registry.get(id).map_or(true, |e| e.tier.satisfies(required)))
            .cloned()
            .collect();

        if compliant.is_empty() {
            tracing::warn!(
                task_type = %request.task_type,
                %required,
                "No tier-compliant endpoint in chain, keeping it unfiltered"
            );
            return decision;
        }
        RoutingDecision::new(compliant, decision.reason)
    }
}

/// Resolve with the standard pipeline
#[must_use]
pub fn resolve(
    request: &TaskRequest,
    table: &RoutingTable,
    registry: &EndpointRegistry,
    context: &RoutingContext,
) -> RoutingDecision {
    Resolver::new().resolve(request, table, registry, context)
}
