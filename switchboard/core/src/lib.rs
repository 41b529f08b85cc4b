//! Switchboard Core - Task Routing Authority for Inference Endpoints
//!
//! Routes inference tasks (dialogue, simplification, classification,
//! embeddings, ...) across heterogeneous endpoints: cloud APIs, self-hosted
//! servers on the local network, and on-device models. Calling code submits
//! a [`TaskRequest`] and receives a [`TaskResponse`] or a typed
//! [`RouterError`]; which endpoint served it is the router's business.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Calling code (UI / logic)                 │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ route(TaskRequest)
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │                         TaskRouter                            │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────┐ │
//! │  │  Routing   │  │  Resolver  │  │  Fallback  │  │ History │ │
//! │  │   Table    │─▶│   (pure)   │─▶│   Engine   │─▶│ & Stats │ │
//! │  └────────────┘  └─────┬──────┘  └─────┬──────┘  └─────────┘ │
//! │                        │               │                      │
//! │                 ┌──────┴───────────────┴──────┐               │
//! │                 │      Endpoint Registry      │◀── health     │
//! │                 └─────────────────────────────┘    probes     │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ execute(endpoint, request, timeout)
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//!   Cloud API              LAN model server        On-device model
//! ```
//!
//! # Key Types
//!
//! - [`TaskRouter`]: entry point and developer control surface
//! - [`RoutingTable`]: defaults, overrides, auto-routing rules, fallback chain
//! - [`EndpointRegistry`]: endpoints and their live status
//! - [`EndpointExecutor`]: implemented by each provider adapter
//! - [`RoutingHistory`]: bounded log of attempts for analysis
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchboard_core::{config, TaskRequest, TaskRouter, TaskType};
//!
//! let settings = config::load_settings()?;
//! let router = TaskRouter::from_settings(settings, Arc::new(my_executor))?;
//!
//! let response = router
//!     .route(&TaskRequest::new(TaskType::Simplification, "Explain photosynthesis"))
//!     .await?;
//! println!("{} answered in {} ms", response.endpoint_used, response.latency_ms);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod routing;

// Re-exports for convenience
pub use config::{ConfigError, ConfigSource, RouterSettings, SettingsOverrides};
pub use routing::{
    AttemptError, AutoRoutingRule, CapabilityTier, ControlOutcome, Endpoint, EndpointExecutor, EndpointRegistry,
    EndpointStatus, ExecutionOutput, ExecutorError, HealthProbe, ProbeResult, RouterError, RoutingContext,
    RoutingDecision, RoutingHistory, RoutingReason, RoutingTable, TaskRequest, TaskResponse, TaskRouter, TaskType,
};
