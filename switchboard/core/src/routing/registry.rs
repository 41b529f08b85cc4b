//! Endpoint Registry
//!
//! Holds every known endpoint and its live status. Endpoints are registered
//! once at startup and never removed; operators disable them instead.
//!
//! # Thread Safety
//!
//! Entries live in a `DashMap`, and each entry guards its status with its own
//! lock, so a health check on one endpoint never blocks execution feedback
//! on another. Failure counts and latency averages are atomics.
//!
//! Read paths never error on unknown ids: an endpoint that is not registered
//! is simply not available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, EndpointStatus, StatusSource};
use super::error::RegistryError;
use super::executor::ProbeResult;
use super::taxonomy::CapabilityTier;

/// Weight of the newest sample in the latency moving average
const LATENCY_EMA_ALPHA: f64 = 0.3;

/// A status change that was applied
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Endpoint id
    pub endpoint_id: String,
    /// Previous status
    pub from: EndpointStatus,
    /// New status
    pub to: EndpointStatus,
    /// What caused the change
    pub source: StatusSource,
}

// ============================================================================
// Entry
// ============================================================================

struct StatusState {
    status: EndpointStatus,
    last_health_check: Option<DateTime<Utc>>,
}

struct EndpointEntry {
    endpoint: Endpoint,
    state: RwLock<StatusState>,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    /// Moving average of observed latency, 0 until the first sample
    avg_latency_ms: AtomicU64,
}

impl EndpointEntry {
    fn new(endpoint: Endpoint) -> Self {
        let state = StatusState {
            status: endpoint.status,
            last_health_check: endpoint.last_health_check,
        };
        Self {
            endpoint,
            state: RwLock::new(state),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            avg_latency_ms: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Endpoint {
        let state = self.state.read();
        let mut endpoint = self.endpoint.clone();
        endpoint.status = state.status;
        endpoint.last_health_check = state.last_health_check;
        endpoint
    }

    fn status(&self) -> EndpointStatus {
        self.state.read().status
    }

    /// Apply `to` if the state machine allows it, under the entry lock
    fn transition(&self, to: EndpointStatus, source: StatusSource) -> Result<Option<StatusChange>, RegistryError> {
        let mut state = self.state.write();
        let from = state.status;

        if from == to {
            return Ok(None);
        }
        if !from.can_transition(to, source) {
            return Err(RegistryError::IllegalTransition {
                id: self.endpoint.id.clone(),
                from,
                to,
            });
        }

        state.status = to;
        drop(state);

        if to == EndpointStatus::Available {
            self.consecutive_failures.store(0, Ordering::Release);
        }

        tracing::info!(
            endpoint = %self.endpoint.id,
            %from,
            %to,
            source = ?source,
            "Endpoint status changed"
        );

        Ok(Some(StatusChange {
            endpoint_id: self.endpoint.id.clone(),
            from,
            to,
            source,
        }))
    }

    fn record_latency(&self, latency_ms: u64) {
        loop {
            let current = self.avg_latency_ms.load(Ordering::Acquire);
            let next = if current == 0 {
                latency_ms.max(1)
            } else {
                let blended = LATENCY_EMA_ALPHA * latency_ms as f64 + (1.0 - LATENCY_EMA_ALPHA) * current as f64;
                (blended.round() as u64).max(1)
            };

            if self
                .avg_latency_ms
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of inference endpoints
#[derive(Default)]
pub struct EndpointRegistry {
    entries: DashMap<String, EndpointEntry>,
}

impl EndpointRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of endpoints
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for endpoint in endpoints {
            registry.register(endpoint)?;
        }
        Ok(registry)
    }

    /// Add an endpoint; ids must be unique
    pub fn register(&self, endpoint: Endpoint) -> Result<(), RegistryError> {
        endpoint.validate().map_err(RegistryError::InvalidEndpoint)?;

        match self.entries.entry(endpoint.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::DuplicateEndpoint(endpoint.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(
                    endpoint = %endpoint.id,
                    tier = %endpoint.tier,
                    status = %endpoint.status,
                    "Registered endpoint"
                );
                slot.insert(EndpointEntry::new(endpoint));
                Ok(())
            }
        }
    }

    /// Number of registered endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no endpoints are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Endpoint with its current status
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Endpoint> {
        self.entries.get(id).map(|entry| entry.snapshot())
    }

    /// Available endpoints whose tier satisfies `min_tier`, ordered by id
    #[must_use]
    pub fn list_available(&self, min_tier: CapabilityTier) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .entries
            .iter()
            .filter(|entry| entry.status().is_available() && entry.endpoint.tier.satisfies(min_tier))
            .map(|entry| entry.snapshot())
            .collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    /// Every endpoint, ordered by id
    #[must_use]
    pub fn all(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.entries.iter().map(|entry| entry.snapshot()).collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    /// Current status, `None` for unknown ids
    #[must_use]
    pub fn status(&self, id: &str) -> Option<EndpointStatus> {
        self.entries.get(id).map(|entry| entry.status())
    }

    /// Whether `id` is registered and available
    #[must_use]
    pub fn is_available(&self, id: &str) -> bool {
        self.status(id).is_some_and(EndpointStatus::is_available)
    }

    /// Status of every endpoint
    #[must_use]
    pub fn status_snapshot(&self) -> HashMap<String, EndpointStatus> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.status()))
            .collect()
    }

    /// Observed latency of every endpoint that has one
    #[must_use]
    pub fn latency_snapshot(&self) -> HashMap<String, u64> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let latency = entry.avg_latency_ms.load(Ordering::Acquire);
                (latency > 0).then(|| (entry.key().clone(), latency))
            })
            .collect()
    }

    /// Change status, enforcing the state machine for `source`
    pub fn set_status(
        &self,
        id: &str,
        status: EndpointStatus,
        source: StatusSource,
    ) -> Result<Option<StatusChange>, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(id.to_string()))?;
        entry.transition(status, source)
    }

    /// Feed a probe result into the endpoint's status
    ///
    /// Results for disabled endpoints are ignored. A loading report from an
    /// endpoint that is already serving is ignored too.
    pub fn apply_health_check(&self, id: &str, result: &ProbeResult) -> Option<StatusChange> {
        let entry = self.entries.get(id)?;

        let current = {
            let mut state = entry.state.write();
            if state.status == EndpointStatus::Disabled {
                return None;
            }
            state.last_health_check = Some(Utc::now());
            state.status
        };

        let target = match result {
            ProbeResult::Healthy { latency_ms } => {
                entry.record_latency(*latency_ms);
                EndpointStatus::Available
            }
            ProbeResult::Loading => match current {
                EndpointStatus::Unavailable | EndpointStatus::Loading => EndpointStatus::Loading,
                _ => return None,
            },
            ProbeResult::Unreachable { reason } => {
                tracing::debug!(endpoint = %id, %reason, "Health probe failed");
                EndpointStatus::Unavailable
            }
        };

        match entry.transition(target, StatusSource::HealthCheck) {
            Ok(change) => change,
            Err(e) => {
                // An operator may have disabled the endpoint mid-probe
                tracing::debug!(endpoint = %id, error = %e, "Ignoring health check result");
                None
            }
        }
    }

    /// Count a failed execution; degrade after `threshold` consecutive ones
    pub fn record_execution_failure(&self, id: &str, threshold: u32) -> Option<StatusChange> {
        let entry = self.entries.get(id)?;
        entry.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = entry.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures < threshold.max(1) || entry.status() != EndpointStatus::Available {
            return None;
        }

        tracing::warn!(
            endpoint = %id,
            consecutive_failures = failures,
            "Failure threshold reached, degrading endpoint"
        );
        entry
            .transition(EndpointStatus::Degraded, StatusSource::ExecutionFeedback)
            .ok()
            .flatten()
    }

    /// Count a successful execution
    pub fn record_execution_success(&self, id: &str, latency_ms: u64) {
        if let Some(entry) = self.entries.get(id) {
            entry.consecutive_failures.store(0, Ordering::Release);
            entry.total_successes.fetch_add(1, Ordering::Relaxed);
            entry.record_latency(latency_ms);
        }
    }

    /// Moving average of observed latency
    #[must_use]
    pub fn observed_latency_ms(&self, id: &str) -> Option<u64> {
        let latency = self.entries.get(id)?.avg_latency_ms.load(Ordering::Acquire);
        (latency > 0).then_some(latency)
    }

    /// Current consecutive failure count
    #[must_use]
    pub fn consecutive_failures(&self, id: &str) -> u32 {
        self.entries
            .get(id)
            .map_or(0, |entry| entry.consecutive_failures.load(Ordering::Acquire))
    }

    /// Lifetime (successes, failures) for an endpoint
    #[must_use]
    pub fn execution_totals(&self, id: &str) -> Option<(u64, u64)> {
        self.entries.get(id).map(|entry| {
            (
                entry.total_successes.load(Ordering::Relaxed),
                entry.total_failures.load(Ordering::Relaxed),
            )
        })
    }
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.entries.len())
            .finish()
    }
}
