//! Task Taxonomy
//!
//! The closed set of inference task kinds and the capability tier each one
//! needs. This mapping is static metadata: resolution does not filter on it
//! unless tier compliance is switched on in the router settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Task Types
// ============================================================================

/// Kind of inference work submitted to the router
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Primary tutoring dialogue generation
    Dialogue,

    /// Rewriting content at a simpler reading level
    Simplification,

    /// Classifying what the learner is trying to do
    IntentClassification,

    /// Short filler acknowledgment while a longer answer is produced
    Acknowledgment,

    /// Liveness probe sent through the normal routing path
    HealthCheck,

    /// Embedding vector generation
    Embedding,

    /// Condensing a transcript or section into a summary
    Summarization,

    /// Grading a learner's answer against a reference
    AnswerEvaluation,
}

impl TaskType {
    /// Every task type, in declaration order
    pub const ALL: [TaskType; 8] = [
        Self::Dialogue,
        Self::Simplification,
        Self::IntentClassification,
        Self::Acknowledgment,
        Self::HealthCheck,
        Self::Embedding,
        Self::Summarization,
        Self::AnswerEvaluation,
    ];

    /// Minimum capability tier an endpoint should have to serve this task
    #[must_use]
    pub fn minimum_tier(self) -> CapabilityTier {
        match self {
            Self::Dialogue => CapabilityTier::Frontier,
            Self::AnswerEvaluation => CapabilityTier::Medium,
            Self::Simplification | Self::Summarization => CapabilityTier::Small,
            Self::IntentClassification | Self::Acknowledgment => CapabilityTier::Tiny,
            Self::HealthCheck => CapabilityTier::Any,
            Self::Embedding => CapabilityTier::Embedding,
        }
    }

    /// Default per-attempt timeout when neither the endpoint nor the
    /// settings override it
    #[must_use]
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Acknowledgment => Duration::from_secs(3),
            Self::IntentClassification | Self::HealthCheck => Duration::from_secs(5),
            Self::Embedding => Duration::from_secs(10),
            Self::Simplification | Self::Summarization => Duration::from_secs(30),
            Self::AnswerEvaluation => Duration::from_secs(45),
            Self::Dialogue => Duration::from_secs(60),
        }
    }

    /// Wire name used in configuration files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialogue => "dialogue",
            Self::Simplification => "simplification",
            Self::IntentClassification => "intent_classification",
            Self::Acknowledgment => "acknowledgment",
            Self::HealthCheck => "health_check",
            Self::Embedding => "embedding",
            Self::Summarization => "summarization",
            Self::AnswerEvaluation => "answer_evaluation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// Minimum tier for a task type
#[must_use]
pub fn minimum_tier(task_type: TaskType) -> CapabilityTier {
    task_type.minimum_tier()
}

// ============================================================================
// Capability Tiers
// ============================================================================

/// Capability classification for endpoints and task requirements
///
/// `Tiny < Small < Medium < Frontier` form a total order. `Any` (no
/// requirement) and `Embedding` (a different kind of model) sit outside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// No capability requirement
    Any,
    /// Very small model (filler, classification)
    Tiny,
    /// Small general model
    Small,
    /// Mid-size general model
    Medium,
    /// Frontier-class model
    Frontier,
    /// Embedding model
    Embedding,
}

impl CapabilityTier {
    /// Position in the generative ordering, `None` for `Any` and `Embedding`
    #[must_use]
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Tiny => Some(1),
            Self::Small => Some(2),
            Self::Medium => Some(3),
            Self::Frontier => Some(4),
            Self::Any | Self::Embedding => None,
        }
    }

    /// Whether an endpoint of this tier can serve work needing `required`
    #[must_use]
    pub fn satisfies(self, required: CapabilityTier) -> bool {
        match required {
            Self::Any => true,
            Self::Embedding => self == Self::Embedding,
            _ => match (self.rank(), required.rank()) {
                (Some(have), Some(need)) => have >= need,
                _ => false,
            },
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Frontier => "frontier",
            Self::Embedding => "embedding",
        };
        f.write_str(name)
    }
}
