//! Collaborator Interfaces
//!
//! Provider adapters implement [`EndpointExecutor`] (run a prompt on one
//! endpoint) and [`HealthProbe`] (report whether an endpoint is up). The
//! router never knows whether "execute" is an HTTP call, a local socket, or
//! an on-device model invocation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::endpoint::Endpoint;
use super::error::ExecutorError;
use super::request::{estimate_units, TaskRequest};

/// Raw result of one execution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Generated content
    pub content: String,

    /// Input units reported by the provider
    pub input_units: Option<u32>,

    /// Output units reported by the provider
    pub output_units: Option<u32>,
}

impl ExecutionOutput {
    /// Output with no usage information
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_units: None,
            output_units: None,
        }
    }

    /// Attach provider-reported usage
    #[must_use]
    pub fn with_usage(mut self, input_units: u32, output_units: u32) -> Self {
        self.input_units = Some(input_units);
        self.output_units = Some(output_units);
        self
    }

    /// Reported usage, falling back to length-based estimates
    #[must_use]
    pub fn units_for(&self, request: &TaskRequest) -> (u32, u32) {
        let input = self
            .input_units
            .unwrap_or_else(|| request.estimated_input_units());
        let output = self
            .output_units
            .unwrap_or_else(|| estimate_units(&self.content));
        (input, output)
    }
}

/// Executes requests against endpoints
///
/// `timeout` is advisory. The engine enforces it regardless, so an
/// implementation that ignores it is still bounded.
#[async_trait]
pub trait EndpointExecutor: Send + Sync {
    /// Run `request` on `endpoint`
    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &TaskRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// Outcome of one health probe
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeResult {
    /// Endpoint answered
    Healthy {
        /// Probe round-trip time
        latency_ms: u64,
    },
    /// Endpoint is up but its model is still loading
    Loading,
    /// Endpoint did not answer or answered with an error
    Unreachable {
        /// Description of the failure
        reason: String,
    },
}

/// Checks endpoint liveness
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one endpoint
    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult;
}
