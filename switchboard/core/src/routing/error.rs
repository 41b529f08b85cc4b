//! Routing Errors
//!
//! Per-endpoint failures (`EndpointUnavailable`, `EndpointTimeout`,
//! `EndpointExecutionError`) are recovered inside the fallback loop and never
//! reach the caller on their own. Callers only ever see `AllEndpointsFailed`,
//! `DeadlineExceeded`, `Cancelled`, or a configuration problem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::taxonomy::TaskType;

// ============================================================================
// Executor Errors
// ============================================================================

/// Failure reported by an endpoint executor
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorError {
    /// Network or socket level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with an error
    #[error("provider error{}: {message}", status_suffix(.code))]
    Provider {
        /// Provider status code, when there is one
        code: Option<u16>,
        /// Provider message
        message: String,
    },

    /// The executor gave up before the router's deadline
    #[error("executor timed out")]
    Timeout,

    /// Request exceeds what the endpoint accepts
    #[error("request rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors from registry writes
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An endpoint with this id is already registered
    #[error("endpoint {0} is already registered")]
    DuplicateEndpoint(String),

    /// No endpoint with this id
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Endpoint definition is malformed
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The state machine does not allow this change from this source
    #[error("endpoint {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Endpoint id
        id: String,
        /// Current status
        from: super::endpoint::EndpointStatus,
        /// Requested status
        to: super::endpoint::EndpointStatus,
    },
}

// ============================================================================
// Attempt Failures
// ============================================================================

/// Why a single chain entry did not produce a response
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// Endpoint was not `available` when its turn came
    #[error("endpoint {endpoint_id} unavailable ({status})")]
    EndpointUnavailable {
        /// Endpoint id
        endpoint_id: String,
        /// Status at attempt time, or "unknown" if unregistered
        status: String,
    },

    /// Per-attempt deadline exceeded
    #[error("endpoint {endpoint_id} timed out after {timeout_ms}ms")]
    EndpointTimeout {
        /// Endpoint id
        endpoint_id: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Provider-level failure
    #[error("endpoint {endpoint_id} failed: {error}")]
    EndpointExecutionError {
        /// Endpoint id
        endpoint_id: String,
        /// Underlying executor error
        error: ExecutorError,
    },

    /// Estimated cost exceeds the request's `max_cost`
    #[error("endpoint {endpoint_id} skipped: estimated cost {estimated:.6} exceeds {max_cost:.6}")]
    OverBudget {
        /// Endpoint id
        endpoint_id: String,
        /// Estimated cost of the attempt
        estimated: f64,
        /// Request limit
        max_cost: f64,
    },
}

impl AttemptError {
    /// Endpoint this failure belongs to
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        match self {
            Self::EndpointUnavailable { endpoint_id, .. }
            | Self::EndpointTimeout { endpoint_id, .. }
            | Self::EndpointExecutionError { endpoint_id, .. }
            | Self::OverBudget { endpoint_id, .. } => endpoint_id,
        }
    }

    /// Whether this failure counts toward the degrade threshold
    #[must_use]
    pub fn counts_against_endpoint(&self) -> bool {
        matches!(
            self,
            Self::EndpointTimeout { .. } | Self::EndpointExecutionError { .. }
        )
    }
}

// ============================================================================
// Router Errors
// ============================================================================

/// Failure surfaced to callers of `TaskRouter::route`
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RouterError {
    /// Every chain entry was skipped or failed
    #[error("{}", describe_exhaustion(.task_type, .chain, .causes))]
    AllEndpointsFailed {
        /// Task type of the request
        task_type: TaskType,
        /// Chain that was walked
        chain: Vec<String>,
        /// Per-entry failures, in attempt order
        causes: Vec<AttemptError>,
    },

    /// The request's overall deadline ran out before an endpoint answered
    #[error("deadline of {deadline_ms}ms exceeded for {task_type} after {} attempt(s)", .causes.len())]
    DeadlineExceeded {
        /// Task type of the request
        task_type: TaskType,
        /// Deadline that ran out
        deadline_ms: u64,
        /// Per-entry failures before the deadline, in attempt order
        causes: Vec<AttemptError>,
    },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// Routing table or registry is malformed
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RouterError {
    /// Last underlying error of an exhausted chain
    #[must_use]
    pub fn last_error(&self) -> Option<&AttemptError> {
        match self {
            Self::AllEndpointsFailed { causes, .. } | Self::DeadlineExceeded { causes, .. } => causes.last(),
            _ => None,
        }
    }
}

fn status_suffix(code: &Option<u16>) -> String {
    match code {
        Some(code) => format!(" {code}"),
        None => String::new(),
    }
}

fn describe_exhaustion(task_type: &TaskType, chain: &[String], causes: &[AttemptError]) -> String {
    let mut out = format!(
        "all endpoints failed for {task_type} (chain: [{}])",
        chain.join(", ")
    );
    match causes.last() {
        Some(last) => out.push_str(&format!("; last error: {last}")),
        None => out.push_str("; chain was empty"),
    }
    out
}
