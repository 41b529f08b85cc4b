//! Task Requests and Responses

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::Endpoint;
use super::taxonomy::TaskType;

/// Characters per token/unit used when a provider does not report usage
pub const CHARS_PER_UNIT: usize = 4;

/// Output size assumed for cost estimates when the request sets no cap
pub const DEFAULT_OUTPUT_ESTIMATE: u32 = 256;

/// Estimate units from text length, rounding up
#[must_use]
pub fn estimate_units(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_UNIT)).unwrap_or(u32::MAX)
}

/// Optional per-request limits
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConstraints {
    /// Skip endpoints whose estimated cost exceeds this
    pub max_cost: Option<f64>,

    /// Expected upper bound on output size, used for cost estimates
    pub max_output_units: Option<u32>,

    /// Per-attempt timeout override in milliseconds
    pub attempt_timeout_ms: Option<u64>,

    /// Budget for the whole chain walk in milliseconds; attempts are cut
    /// short once it runs out
    pub deadline_ms: Option<u64>,
}

/// One unit of inference work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique request id
    pub id: Uuid,

    /// Kind of work
    pub task_type: TaskType,

    /// Prompt or content payload
    pub prompt: String,

    /// Optional structured context passed through to the executor
    #[serde(default)]
    pub context: Option<serde_json::Value>,

    /// Optional limits
    #[serde(default)]
    pub constraints: RequestConstraints,
}

impl TaskRequest {
    /// Create a request with a fresh id
    pub fn new(task_type: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            prompt: prompt.into(),
            context: None,
            constraints: RequestConstraints::default(),
        }
    }

    /// Attach structured context
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Cap the cost of any single attempt
    #[must_use]
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.constraints.max_cost = Some(max_cost);
        self
    }

    /// Set the expected output size
    #[must_use]
    pub fn with_max_output_units(mut self, units: u32) -> Self {
        self.constraints.max_output_units = Some(units);
        self
    }

    /// Override the per-attempt timeout
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.constraints.attempt_timeout_ms = Some(timeout_ms);
        self
    }

    /// Bound the whole request, across every fallback
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.constraints.deadline_ms = Some(deadline_ms);
        self
    }

    /// Length of the prompt plus serialized context, in characters
    #[must_use]
    pub fn prompt_length(&self) -> usize {
        let context_len = self
            .context
            .as_ref()
            .map_or(0, |c| c.to_string().chars().count());
        self.prompt.chars().count() + context_len
    }

    /// Estimated input units
    #[must_use]
    pub fn estimated_input_units(&self) -> u32 {
        u32::try_from(self.prompt_length().div_ceil(CHARS_PER_UNIT)).unwrap_or(u32::MAX)
    }

    /// Estimated output units
    #[must_use]
    pub fn estimated_output_units(&self) -> u32 {
        self.constraints
            .max_output_units
            .unwrap_or(DEFAULT_OUTPUT_ESTIMATE)
    }

    /// Estimated cost of running this request on `endpoint`
    #[must_use]
    pub fn estimated_cost_on(&self, endpoint: &Endpoint) -> f64 {
        endpoint.cost_for(self.estimated_input_units(), self.estimated_output_units())
    }
}

/// Result of a successfully routed request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Id of the request this answers
    pub request_id: Uuid,

    /// Generated content
    pub content: String,

    /// Endpoint that actually served the request
    pub endpoint_used: String,

    /// Latency of the successful attempt
    pub latency_ms: u64,

    /// Input units consumed (reported or estimated)
    pub input_units: u32,

    /// Output units produced (reported or estimated)
    pub output_units: u32,

    /// Computed cost
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::endpoint::CostModel;
    use crate::routing::taxonomy::CapabilityTier;

    #[test]
    fn test_unit_estimate_rounds_up() {
        assert_eq!(estimate_units(""), 0);
        assert_eq!(estimate_units("abcd"), 1);
        assert_eq!(estimate_units("abcde"), 2);
    }

    #[test]
    fn test_estimated_cost_uses_output_cap() {
        let endpoint = Endpoint::cloud(
            "cloud",
            CapabilityTier::Medium,
            "KEY",
            CostModel {
                per_input_unit: 0.01,
                per_output_unit: 0.1,
            },
        );
        let request = TaskRequest::new(TaskType::Summarization, "x".repeat(40)).with_max_output_units(10);

        // 10 input units, 10 output units
        assert!((request.estimated_cost_on(&endpoint) - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_prompt_length_includes_context() {
        let request = TaskRequest::new(TaskType::Dialogue, "hello")
            .with_context(serde_json::json!({"k": 1}));
        assert_eq!(request.prompt_length(), 5 + r#"{"k":1}"#.len());
    }
}
