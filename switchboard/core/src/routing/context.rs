//! Routing Context
//!
//! A point-in-time snapshot of device, network, cost and time conditions.
//! Rule conditions evaluate against this snapshot only, so a resolution is
//! a pure function of (request, table, registry, context).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};

use super::endpoint::EndpointStatus;
use super::registry::EndpointRegistry;
use super::request::TaskRequest;
use super::table::RoutingTable;

// ============================================================================
// Device Conditions
// ============================================================================

/// Thermal state reported by the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    /// Normal
    #[default]
    Nominal,
    /// Slightly elevated
    Fair,
    /// Throttling likely
    Serious,
    /// Throttling in effect
    Critical,
}

/// Memory pressure reported by the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    /// Plenty of free memory
    #[default]
    Normal,
    /// Memory is getting tight
    Warning,
    /// The OS is reclaiming memory
    Critical,
}

/// Hardware class of the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTier {
    /// Older or low-memory hardware
    Low,
    /// Typical hardware
    #[default]
    Mid,
    /// Recent high-end hardware
    High,
}

/// Current network connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Wi-Fi
    #[default]
    Wifi,
    /// Mobile data
    Cellular,
    /// Wired
    Ethernet,
    /// Offline
    None,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Conditions captured once per resolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingContext {
    /// Device thermal state
    pub thermal_state: ThermalState,

    /// Device memory pressure
    pub memory_pressure: MemoryPressure,

    /// Battery level in `[0, 1]`; `None` when on mains power
    pub battery_level: Option<f64>,

    /// Device hardware class
    pub device_tier: DeviceTier,

    /// Network connection type
    pub network_type: NetworkType,

    /// Measured network latency
    pub network_latency_ms: Option<u64>,

    /// Cost budget left in the session
    pub remaining_budget: Option<f64>,

    /// Estimated cost of the task on its default route
    pub task_cost_estimate: Option<f64>,

    /// Local wall-clock time
    pub local_time: NaiveTime,

    /// Time since the session started
    pub session_duration_secs: u64,

    /// Length of the prompt and context in characters
    pub prompt_length: usize,

    /// Status of every registered endpoint
    pub endpoint_status: HashMap<String, EndpointStatus>,

    /// Observed latency of endpoints that have served requests
    pub endpoint_latency_ms: HashMap<String, u64>,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self {
            thermal_state: ThermalState::Nominal,
            memory_pressure: MemoryPressure::Normal,
            battery_level: None,
            device_tier: DeviceTier::Mid,
            network_type: NetworkType::Wifi,
            network_latency_ms: None,
            remaining_budget: None,
            task_cost_estimate: None,
            local_time: NaiveTime::default(),
            session_duration_secs: 0,
            prompt_length: 0,
            endpoint_status: HashMap::new(),
            endpoint_latency_ms: HashMap::new(),
        }
    }
}

impl RoutingContext {
    /// Session duration as a `Duration`
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    /// Set the network type
    #[must_use]
    pub fn with_network(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    /// Set the thermal state
    #[must_use]
    pub fn with_thermal(mut self, thermal_state: ThermalState) -> Self {
        self.thermal_state = thermal_state;
        self
    }

    /// Set the battery level
    #[must_use]
    pub fn with_battery(mut self, level: f64) -> Self {
        self.battery_level = Some(level);
        self
    }

    /// Set the remaining cost budget
    #[must_use]
    pub fn with_remaining_budget(mut self, budget: f64) -> Self {
        self.remaining_budget = Some(budget);
        self
    }

    /// Set the local time
    #[must_use]
    pub fn with_local_time(mut self, time: NaiveTime) -> Self {
        self.local_time = time;
        self
    }

    /// Complete `base` with the request- and registry-derived fields
    ///
    /// Fills prompt length, endpoint status, observed latency, and the cost
    /// estimate on the first endpoint of the task's default route. The
    /// estimate stays `None` when the task has no default route or its first
    /// entry is unregistered.
    #[must_use]
    pub fn capture(
        base: RoutingContext,
        request: &TaskRequest,
        table: &RoutingTable,
        registry: &EndpointRegistry,
    ) -> RoutingContext {
        let task_cost_estimate = table
            .default_routes
            .get(&request.task_type)
            .and_then(|chain| chain.first())
            .and_then(|id| registry.get(id))
            .map(|endpoint| request.estimated_cost_on(&endpoint));

        RoutingContext {
            prompt_length: request.prompt_length(),
            endpoint_status: registry.status_snapshot(),
            endpoint_latency_ms: registry.latency_snapshot(),
            task_cost_estimate,
            ..base
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Device and session conditions, without request or registry data
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConditions {
    /// Device thermal state
    pub thermal_state: ThermalState,
    /// Device memory pressure
    pub memory_pressure: MemoryPressure,
    /// Battery level in `[0, 1]`
    pub battery_level: Option<f64>,
    /// Device hardware class
    pub device_tier: DeviceTier,
    /// Network connection type
    pub network_type: NetworkType,
    /// Measured network latency
    pub network_latency_ms: Option<u64>,
    /// Cost budget left in the session
    pub remaining_budget: Option<f64>,
    /// Local time; `None` means read the clock
    pub local_time: Option<NaiveTime>,
    /// Time since the session started
    pub session_duration_secs: u64,
}

impl SystemConditions {
    /// Expand into a full context; request and registry fields stay empty
    #[must_use]
    pub fn into_context(self) -> RoutingContext {
        RoutingContext {
            thermal_state: self.thermal_state,
            memory_pressure: self.memory_pressure,
            battery_level: self.battery_level,
            device_tier: self.device_tier,
            network_type: self.network_type,
            network_latency_ms: self.network_latency_ms,
            remaining_budget: self.remaining_budget,
            local_time: self.local_time.unwrap_or_else(|| Local::now().time()),
            session_duration_secs: self.session_duration_secs,
            ..RoutingContext::default()
        }
    }
}

/// Supplies live system conditions
///
/// Called once per resolution on the request path, so implementations must
/// return a cached reading rather than measure anything.
pub trait ContextProvider: Send + Sync {
    /// Current conditions
    fn current(&self) -> SystemConditions;
}

/// Provider for hosts with no device telemetry
#[derive(Clone, Copy, Debug, Default)]
pub struct NominalConditions;

impl ContextProvider for NominalConditions {
    fn current(&self) -> SystemConditions {
        SystemConditions::default()
    }
}
