//! Rule Conditions
//!
//! Each [`RoutingCondition`] variant reads one field of a [`RoutingContext`]
//! and compares it against a configured threshold. A condition whose input is
//! missing from the context (no battery, unknown endpoint, no latency sample)
//! evaluates to `false`.

use std::fmt;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::context::{DeviceTier, MemoryPressure, NetworkType, RoutingContext, ThermalState};
use super::endpoint::EndpointStatus;

/// Tolerance for `eq` on fractional values
const EQ_EPSILON: f64 = 1e-9;

// ============================================================================
// Operators
// ============================================================================

/// Numeric comparison operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Eq,
}

impl ComparisonOp {
    /// Compare `lhs` (context value) against `rhs` (threshold)
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => (lhs - rhs).abs() < EQ_EPSILON,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
        })
    }
}

/// Set membership with an explicit wildcard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetMatch<T> {
    /// Matches every value
    Any,
    /// Matches the listed values
    OneOf(Vec<T>),
}

impl<T: PartialEq> SetMatch<T> {
    /// Whether `value` is in the set
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(values) => values.contains(value),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::OneOf(values) if values.is_empty())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// A single predicate over the routing context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingCondition {
    /// Thermal state is at or above `state`
    ThermalAtLeast {
        /// Threshold
        state: ThermalState,
    },

    /// Memory pressure is at or above `pressure`
    MemoryPressureAtLeast {
        /// Threshold
        pressure: MemoryPressure,
    },

    /// Battery level comparison (`value` in `[0, 1]`)
    BatteryLevel {
        /// Operator
        op: ComparisonOp,
        /// Threshold
        value: f64,
    },

    /// Device tier membership
    DeviceTier {
        /// Accepted tiers
        tiers: SetMatch<DeviceTier>,
    },

    /// Network type membership
    NetworkType {
        /// Accepted network types
        types: SetMatch<NetworkType>,
    },

    /// Network latency comparison
    NetworkLatency {
        /// Operator
        op: ComparisonOp,
        /// Threshold in milliseconds
        value: u64,
    },

    /// A named endpoint has the given status
    EndpointStatus {
        /// Endpoint to check
        endpoint_id: String,
        /// Expected status
        status: EndpointStatus,
    },

    /// A named endpoint's observed latency comparison
    EndpointLatency {
        /// Endpoint to check
        endpoint_id: String,
        /// Operator
        op: ComparisonOp,
        /// Threshold in milliseconds
        value: u64,
    },

    /// Remaining session budget comparison
    RemainingBudget {
        /// Operator
        op: ComparisonOp,
        /// Threshold
        value: f64,
    },

    /// Estimated cost of this task comparison
    TaskCostEstimate {
        /// Operator
        op: ComparisonOp,
        /// Threshold
        value: f64,
    },

    /// Local hour falls in `[start_hour, end_hour)`, wrapping past midnight
    TimeOfDay {
        /// First hour in range (0-23)
        start_hour: u8,
        /// First hour after the range (0-23)
        end_hour: u8,
    },

    /// Session duration comparison
    SessionDuration {
        /// Operator
        op: ComparisonOp,
        /// Threshold in seconds
        value: u64,
    },

    /// Prompt plus context length comparison
    PromptLength {
        /// Operator
        op: ComparisonOp,
        /// Threshold in characters
        value: usize,
    },
}

impl RoutingCondition {
    /// Evaluate against a context snapshot
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, ctx: &RoutingContext) -> bool {
        match self {
            Self::ThermalAtLeast { state } => ctx.thermal_state >= *state,
            Self::MemoryPressureAtLeast { pressure } => ctx.memory_pressure >= *pressure,
            Self::BatteryLevel { op, value } => ctx.battery_level.is_some_and(|level| op.apply(level, *value)),
            Self::DeviceTier { tiers } => tiers.contains(&ctx.device_tier),
            Self::NetworkType { types } => types.contains(&ctx.network_type),
            Self::NetworkLatency { op, value } => ctx
                .network_latency_ms
                .is_some_and(|ms| op.apply(ms as f64, *value as f64)),
            Self::EndpointStatus { endpoint_id, status } => ctx.endpoint_status.get(endpoint_id) == Some(status),
            Self::EndpointLatency { endpoint_id, op, value } => ctx
                .endpoint_latency_ms
                .get(endpoint_id)
                .is_some_and(|ms| op.apply(*ms as f64, *value as f64)),
            Self::RemainingBudget { op, value } => ctx.remaining_budget.is_some_and(|b| op.apply(b, *value)),
            Self::TaskCostEstimate { op, value } => ctx.task_cost_estimate.is_some_and(|c| op.apply(c, *value)),
            Self::TimeOfDay { start_hour, end_hour } => {
                hour_in_range(ctx.local_time.hour(), u32::from(*start_hour), u32::from(*end_hour))
            }
            Self::SessionDuration { op, value } => op.apply(ctx.session_duration_secs as f64, *value as f64),
            Self::PromptLength { op, value } => op.apply(ctx.prompt_length as f64, *value as f64),
        }
    }

    /// Endpoint this condition refers to, if any
    #[must_use]
    pub fn referenced_endpoint(&self) -> Option<&str> {
        match self {
            Self::EndpointStatus { endpoint_id, .. } | Self::EndpointLatency { endpoint_id, .. } => {
                Some(endpoint_id)
            }
            _ => None,
        }
    }

    /// Check thresholds are within their domains
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::BatteryLevel { value, .. } if !(0.0..=1.0).contains(value) => {
                Err(format!("battery level threshold {value} outside [0, 1]"))
            }
            Self::RemainingBudget { value, .. } | Self::TaskCostEstimate { value, .. }
                if !value.is_finite() || *value < 0.0 =>
            {
                Err(format!("cost threshold {value} must be a non-negative number"))
            }
            Self::TimeOfDay { start_hour, end_hour } if *start_hour > 23 || *end_hour > 23 => {
                Err(format!("time range {start_hour}-{end_hour} has an hour above 23"))
            }
            Self::TimeOfDay { start_hour, end_hour } if start_hour == end_hour => {
                Err(format!("time range {start_hour}-{end_hour} is empty"))
            }
            Self::DeviceTier { tiers } if tiers.is_empty() => Err("device tier set is empty".to_string()),
            Self::NetworkType { types } if types.is_empty() => Err("network type set is empty".to_string()),
            _ => Ok(()),
        }
    }
}

fn hour_in_range(hour: u32, start: u32, end: u32) -> bool {
    if start < end {
        hour >= start && hour < end
    } else {
        // wraps past midnight, e.g. 22-6
        hour >= start || hour < end
    }
}

// ============================================================================
// Combination
// ============================================================================

/// How a rule combines its conditions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMode {
    /// Every condition must hold (vacuously true when empty)
    #[default]
    All,
    /// At least one condition must hold (false when empty)
    Any,
}

impl CombinationMode {
    /// Combine `conditions` evaluated against `ctx`
    #[must_use]
    pub fn evaluate(self, conditions: &[RoutingCondition], ctx: &RoutingContext) -> bool {
        match self {
            Self::All => conditions.iter().all(|c| c.evaluate(ctx)),
            Self::Any => conditions.iter().any(|c| c.evaluate(ctx)),
        }
    }
}
