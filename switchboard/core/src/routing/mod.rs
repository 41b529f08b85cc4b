//! Task Routing
//!
//! Decides which inference endpoint serves each task, and falls back along
//! an ordered chain when an endpoint is unavailable, slow or failing.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    TaskRouter    |  <-- route(request), control surface
//! +--------+---------+
//!          |  context snapshot (ContextProvider + registry)
//!          v
//! +------------------+
//! |     Resolver     |  <-- pure: global > manual > auto-rule > default > fallback
//! +--------+---------+
//!          |  RoutingDecision { chain, reason }
//!          v
//! +------------------+
//! |  FallbackEngine  |  <-- walk chain: limiter, timeout, cancellation
//! +--------+---------+
//!          |
//!    +-----+------+-----------+
//!    |            |           |
//!    v            v           v
//! +--------+ +---------+ +-----------+
//! |Executor| | History | | Telemetry |
//! +--------+ +---------+ +-----------+
//!
//! HealthMonitor --probe--> EndpointRegistry <--feedback-- FallbackEngine
//! ```
//!
//! # Design Principles
//!
//! 1. **Pure Resolution**: resolving never waits on I/O; it reads a context
//!    captured once per request
//! 2. **Strict Fallback Order**: one endpoint at a time, in chain order
//! 3. **Bounded Attempts**: every attempt has a timeout and a concurrency slot
//! 4. **Observability**: every attempt is recorded, every failure is broadcast

pub mod conditions;
pub mod context;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod history;
pub mod limiter;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod router;
pub mod stats;
pub mod table;
pub mod taxonomy;
pub mod telemetry;
pub mod test_utils;

pub use conditions::{CombinationMode, ComparisonOp, RoutingCondition, SetMatch};
pub use context::{
    ContextProvider, DeviceTier, MemoryPressure, NetworkType, NominalConditions, RoutingContext, SystemConditions,
    ThermalState,
};
pub use endpoint::{
    ConnectionConfig, CostModel, Endpoint, EndpointStatus, LocationClass, ProviderKind, StatusSource,
};
pub use engine::{EngineConfig, FallbackEngine};
pub use error::{AttemptError, ExecutorError, RegistryError, RouterError};
pub use executor::{EndpointExecutor, ExecutionOutput, HealthProbe, ProbeResult};
pub use health::HealthMonitor;
pub use history::{AttemptOutcome, AttemptRecord, RoutingHistory, RoutingRecord};
pub use limiter::EndpointLimiter;
pub use metrics::RouterMetrics;
pub use registry::{EndpointRegistry, StatusChange};
pub use request::{RequestConstraints, TaskRequest, TaskResponse};
pub use resolver::{resolve, Resolver, RoutingDecision, RoutingReason};
pub use router::{ControlOutcome, TaskRouter, TaskRouterBuilder};
pub use stats::{EndpointStats, RoutingStats};
pub use table::{AutoRoutingRule, RoutingTable};
pub use taxonomy::{minimum_tier, CapabilityTier, TaskType};
pub use telemetry::{TelemetryEvent, TelemetrySink};
