//! Routing Table
//!
//! Configuration read on every resolution: default chains per task type,
//! manual per-task overrides, one global override, prioritized auto-routing
//! rules and the terminal fallback chain.
//!
//! # Example (JSON)
//!
//! ```json
//! {
//!   "default_routes": { "dialogue": ["gpt-4o", "qwen-14b"] },
//!   "manual_overrides": {},
//!   "global_override": null,
//!   "auto_routing_rules": [{
//!     "id": "offline",
//!     "name": "OfflineMode",
//!     "priority": 200,
//!     "conditions": [{ "kind": "network_type", "types": { "one_of": ["none"] } }],
//!     "target_endpoint": "llama-1b"
//!   }],
//!   "fallback_chain": ["gpt-4o-mini"]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::conditions::{CombinationMode, RoutingCondition};
use super::context::RoutingContext;
use super::error::RouterError;
use super::registry::EndpointRegistry;
use super::taxonomy::TaskType;

// ============================================================================
// Auto-Routing Rules
// ============================================================================

fn enabled_by_default() -> bool {
    true
}

/// A prioritized, condition-gated redirect to one endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoRoutingRule {
    /// Unique rule id
    pub id: String,

    /// Name reported in routing decisions
    pub name: String,

    /// Disabled rules are never evaluated
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,

    /// Predicates over the routing context
    #[serde(default)]
    pub conditions: Vec<RoutingCondition>,

    /// How conditions combine
    #[serde(default)]
    pub combination: CombinationMode,

    /// Endpoint to route to when the rule matches
    pub target_endpoint: String,

    /// Task types this rule applies to; `None` means all
    #[serde(default)]
    pub apply_to_task_types: Option<Vec<TaskType>>,
}

impl AutoRoutingRule {
    /// Create an enabled rule with no conditions
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            priority,
            conditions: Vec::new(),
            combination: CombinationMode::All,
            target_endpoint: target.into(),
            apply_to_task_types: None,
        }
    }

    /// Add a condition
    #[must_use]
    pub fn with_condition(mut self, condition: RoutingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the combination mode
    #[must_use]
    pub fn with_combination(mut self, combination: CombinationMode) -> Self {
        self.combination = combination;
        self
    }

    /// Restrict to the given task types
    #[must_use]
    pub fn for_task_types(mut self, task_types: impl IntoIterator<Item = TaskType>) -> Self {
        self.apply_to_task_types = Some(task_types.into_iter().collect());
        self
    }

    /// Whether this rule is considered for `task_type`
    #[must_use]
    pub fn applies_to(&self, task_type: TaskType) -> bool {
        self.apply_to_task_types
            .as_ref()
            .map_or(true, |types| types.contains(&task_type))
    }

    /// Whether the rule's conditions hold in `ctx`
    #[must_use]
    pub fn matches(&self, ctx: &RoutingContext) -> bool {
        self.combination.evaluate(&self.conditions, ctx)
    }
}

// ============================================================================
// Routing Table
// ============================================================================

/// Routing configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Ordered endpoint chain per task type
    #[serde(default)]
    pub default_routes: BTreeMap<TaskType, Vec<String>>,

    /// Single-endpoint override per task type
    #[serde(default)]
    pub manual_overrides: BTreeMap<TaskType, String>,

    /// Send everything to one endpoint
    #[serde(default)]
    pub global_override: Option<String>,

    /// Conditional rules, in configuration order
    #[serde(default)]
    pub auto_routing_rules: Vec<AutoRoutingRule>,

    /// Terminal chain
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

impl RoutingTable {
    /// Table with only a fallback chain
    pub fn with_fallback(chain: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fallback_chain: chain.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the default chain for a task type
    #[must_use]
    pub fn with_default_route(
        mut self,
        task_type: TaskType,
        chain: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.default_routes
            .insert(task_type, chain.into_iter().map(Into::into).collect());
        self
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: AutoRoutingRule) -> Self {
        self.auto_routing_rules.push(rule);
        self
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize as pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Set or clear the global override
    pub fn set_global_override(&mut self, endpoint_id: Option<String>) {
        self.global_override = endpoint_id;
    }

    /// Set or clear the manual override for a task type
    pub fn set_manual_override(&mut self, task_type: TaskType, endpoint_id: Option<String>) {
        match endpoint_id {
            Some(id) => {
                self.manual_overrides.insert(task_type, id);
            }
            None => {
                self.manual_overrides.remove(&task_type);
            }
        }
    }

    /// Enable or disable a rule; returns whether the rule exists
    pub fn set_rule_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        match self.auto_routing_rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabled rules applying to `task_type`, highest priority first
    ///
    /// The sort is stable, so equal priorities keep configuration order.
    #[must_use]
    pub fn rules_for(&self, task_type: TaskType) -> Vec<&AutoRoutingRule> {
        let mut rules: Vec<&AutoRoutingRule> = self
            .auto_routing_rules
            .iter()
            .filter(|r| r.enabled && r.applies_to(task_type))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Every endpoint id the table mentions
    #[must_use]
    pub fn referenced_endpoints(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        ids.extend(self.default_routes.values().flatten().map(String::as_str));
        ids.extend(self.manual_overrides.values().map(String::as_str));
        ids.extend(self.global_override.as_deref());
        for rule in &self.auto_routing_rules {
            ids.push(&rule.target_endpoint);
            ids.extend(rule.conditions.iter().filter_map(RoutingCondition::referenced_endpoint));
        }
        ids.extend(self.fallback_chain.iter().map(String::as_str));
        ids
    }

    /// Check the table against the registry
    ///
    /// Reports every problem found, not just the first.
    pub fn validate(&self, registry: &EndpointRegistry) -> Result<(), RouterError> {
        let mut problems = Vec::new();

        if self.fallback_chain.is_empty() {
            problems.push("fallback chain is empty".to_string());
        }

        for (task_type, chain) in &self.default_routes {
            if chain.is_empty() {
                problems.push(format!("default route for {task_type} is empty"));
            }
        }

        let mut seen_rules = HashSet::new();
        for rule in &self.auto_routing_rules {
            if !seen_rules.insert(rule.id.as_str()) {
                problems.push(format!("duplicate rule id: {}", rule.id));
            }
            if matches!(&rule.apply_to_task_types, Some(types) if types.is_empty()) {
                problems.push(format!("rule {} applies to no task types", rule.id));
            }
            for condition in &rule.conditions {
                if let Err(e) = condition.validate() {
                    problems.push(format!("rule {}: {e}", rule.id));
                }
            }
        }

        let mut unknown: Vec<&str> = self
            .referenced_endpoints()
            .into_iter()
            .filter(|id| !registry.contains(id))
            .collect();
        unknown.sort_unstable();
        unknown.dedup();
        for id in unknown {
            problems.push(format!("unknown endpoint: {id}"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RouterError::InvalidConfiguration(problems.join("; ")))
        }
    }
}
