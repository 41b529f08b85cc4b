//! Endpoint Definitions
//!
//! Static description of an inference backend plus its mutable status.
//! Connection details are keyed by location so a cloud endpoint never
//! carries a model path and an on-device model never carries an API key.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::taxonomy::CapabilityTier;

// ============================================================================
// Provider / Location
// ============================================================================

/// Who operates the model behind an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Commercial cloud API (`OpenAI`, Anthropic, ...)
    CloudVendor,
    /// Model server run by the user on their own network
    SelfHosted,
    /// Model running on the device itself
    OnDevice,
}

/// Where an endpoint runs relative to the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationClass {
    /// Remote cloud service
    RemoteCloud,
    /// Server on the local network
    LocalNetworkServer,
    /// On-device inference
    OnDevice,
}

impl LocationClass {
    /// Default concurrency cap for endpoints at this location
    ///
    /// A single local server or on-device model cannot usefully serve
    /// parallel heavy requests, so they are serialized.
    #[must_use]
    pub fn default_max_concurrent(self) -> usize {
        match self {
            Self::RemoteCloud => 4,
            Self::LocalNetworkServer | Self::OnDevice => 1,
        }
    }
}

/// Location-specific connection parameters, opaque to the router
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Remote cloud API
    RemoteCloud {
        /// Environment variable holding the API key
        api_key_env: String,
        /// Optional base URL override
        #[serde(default)]
        base_url: Option<String>,
    },
    /// Self-hosted server reachable over the network
    LocalNetwork {
        /// Server host
        host: String,
        /// Server port
        port: u16,
    },
    /// On-device model
    OnDevice {
        /// Path to the model weights
        model_path: String,
    },
}

impl ConnectionConfig {
    /// Location class implied by this connection
    #[must_use]
    pub fn location(&self) -> LocationClass {
        match self {
            Self::RemoteCloud { .. } => LocationClass::RemoteCloud,
            Self::LocalNetwork { .. } => LocationClass::LocalNetworkServer,
            Self::OnDevice { .. } => LocationClass::OnDevice,
        }
    }
}

// ============================================================================
// Capabilities / Performance / Cost
// ============================================================================

/// Size limits of an endpoint, in tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimits {
    /// Maximum input size
    pub max_input_units: u32,
    /// Maximum output size
    pub max_output_units: u32,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self {
            max_input_units: 8_192,
            max_output_units: 2_048,
        }
    }
}

/// Optional features an endpoint supports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointFeatures {
    /// Token streaming
    pub streaming: bool,
    /// Separate system prompt
    pub system_prompt: bool,
    /// Tool / function calling
    pub function_calling: bool,
}

/// Expected performance, used as metadata only
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    /// Expected time to first output unit
    pub expected_ttft_ms: u64,
    /// Expected steady-state output units per second
    pub expected_units_per_sec: f32,
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self {
            expected_ttft_ms: 1_000,
            expected_units_per_sec: 20.0,
        }
    }
}

/// Price per input and output unit
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Cost per input unit
    pub per_input_unit: f64,
    /// Cost per output unit
    pub per_output_unit: f64,
}

impl CostModel {
    /// Free (local and on-device endpoints)
    #[must_use]
    pub fn free() -> Self {
        Self::default()
    }

    /// Cost of a call consuming the given units
    #[must_use]
    pub fn cost_for(&self, input_units: u32, output_units: u32) -> f64 {
        f64::from(input_units) * self.per_input_unit + f64::from(output_units) * self.per_output_unit
    }
}

// ============================================================================
// Status
// ============================================================================

/// Live status of an endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// Accepting requests
    Available,
    /// Repeated execution failures, waiting for a health check
    Degraded,
    /// Health check failed or explicitly disconnected
    Unavailable,
    /// Switched off by an operator
    Disabled,
    /// Model still loading
    #[default]
    Loading,
}

/// What caused a status change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// Result of a health probe
    HealthCheck,
    /// Outcome of an execution attempt
    ExecutionFeedback,
    /// Explicit operator action
    Operator,
}

impl EndpointStatus {
    /// Whether the resolver and engine may use the endpoint
    #[must_use]
    pub fn is_available(self) -> bool {
        self == Self::Available
    }

    /// Whether `self -> to` is a legal transition when caused by `source`
    ///
    /// ```text
    /// loading ──hc──> available <──hc/fb──> degraded
    ///    │               │                     │
    ///    └──hc──> unavailable <──hc/op─────────┘
    ///                 │
    ///                 └──hc──> available | loading
    /// * ──op──> disabled ──op──> available
    /// ```
    #[must_use]
    pub fn can_transition(self, to: EndpointStatus, source: StatusSource) -> bool {
        use EndpointStatus::{Available, Degraded, Disabled, Loading, Unavailable};

        if self == to {
            return true;
        }

        match source {
            StatusSource::Operator => match (self, to) {
                (_, Disabled) | (Disabled, Available) => true,
                // explicit disconnect
                (Available | Degraded, Unavailable) => true,
                _ => false,
            },
            StatusSource::ExecutionFeedback => matches!((self, to), (Available, Degraded)),
            StatusSource::HealthCheck => matches!(
                (self, to),
                (Loading, Available)
                    | (Loading, Unavailable)
                    | (Degraded, Available)
                    | (Available | Degraded, Unavailable)
                    | (Unavailable, Available | Loading)
            ),
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "available",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
            Self::Disabled => "disabled",
            Self::Loading => "loading",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Endpoint
// ============================================================================

fn default_reliability() -> f64 {
    0.95
}

/// One registered inference backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub display_name: String,

    /// Operator category
    pub provider: ProviderKind,

    /// Capability tier of the model behind this endpoint
    pub tier: CapabilityTier,

    /// Input/output size limits
    #[serde(default)]
    pub limits: EndpointLimits,

    /// Supported features
    #[serde(default)]
    pub features: EndpointFeatures,

    /// Expected latency and throughput
    #[serde(default)]
    pub performance: PerformanceProfile,

    /// Reliability score in `[0, 1]`
    #[serde(default = "default_reliability")]
    pub reliability: f64,

    /// Unit pricing (ignored for non-cloud locations)
    #[serde(default)]
    pub cost: CostModel,

    /// Location-specific connection parameters
    pub connection: ConnectionConfig,

    /// Current status
    #[serde(default)]
    pub status: EndpointStatus,

    /// When the last health check completed
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,

    /// Concurrency cap override
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Per-attempt timeout override in milliseconds
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl Endpoint {
    /// Create an endpoint with default metadata
    pub fn new(
        id: impl Into<String>,
        provider: ProviderKind,
        tier: CapabilityTier,
        connection: ConnectionConfig,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider,
            tier,
            limits: EndpointLimits::default(),
            features: EndpointFeatures::default(),
            performance: PerformanceProfile::default(),
            reliability: default_reliability(),
            cost: CostModel::free(),
            connection,
            status: EndpointStatus::Loading,
            last_health_check: None,
            max_concurrent: None,
            attempt_timeout_ms: None,
        }
    }

    /// Cloud endpoint with per-unit pricing
    pub fn cloud(
        id: impl Into<String>,
        tier: CapabilityTier,
        api_key_env: impl Into<String>,
        cost: CostModel,
    ) -> Self {
        let mut endpoint = Self::new(
            id,
            ProviderKind::CloudVendor,
            tier,
            ConnectionConfig::RemoteCloud {
                api_key_env: api_key_env.into(),
                base_url: None,
            },
        );
        endpoint.cost = cost;
        endpoint
    }

    /// Self-hosted network server
    pub fn local_server(
        id: impl Into<String>,
        tier: CapabilityTier,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::new(
            id,
            ProviderKind::SelfHosted,
            tier,
            ConnectionConfig::LocalNetwork {
                host: host.into(),
                port,
            },
        )
    }

    /// On-device model
    pub fn on_device(
        id: impl Into<String>,
        tier: CapabilityTier,
        model_path: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            ProviderKind::OnDevice,
            tier,
            ConnectionConfig::OnDevice {
                model_path: model_path.into(),
            },
        )
    }

    /// Set the initial status
    #[must_use]
    pub fn with_status(mut self, status: EndpointStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the concurrency cap
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout_ms);
        self
    }

    /// Location class derived from the connection parameters
    #[must_use]
    pub fn location(&self) -> LocationClass {
        self.connection.location()
    }

    /// Effective concurrency cap
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent
            .unwrap_or_else(|| self.location().default_max_concurrent())
            .max(1)
    }

    /// Cost of a call; always zero off the cloud
    #[must_use]
    pub fn cost_for(&self, input_units: u32, output_units: u32) -> f64 {
        match self.location() {
            LocationClass::RemoteCloud => self.cost.cost_for(input_units, output_units),
            LocationClass::LocalNetworkServer | LocationClass::OnDevice => 0.0,
        }
    }

    /// Check static invariants, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("endpoint id must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(format!(
                "endpoint {}: reliability {} outside [0, 1]",
                self.id, self.reliability
            ));
        }
        if self.cost.per_input_unit < 0.0 || self.cost.per_output_unit < 0.0 {
            return Err(format!("endpoint {}: negative unit cost", self.id));
        }
        if self.max_concurrent == Some(0) {
            return Err(format!("endpoint {}: max_concurrent must be at least 1", self.id));
        }
        Ok(())
    }
}
