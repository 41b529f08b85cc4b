//! Endpoint Health Monitor
//!
//! Periodically probes every endpoint that is not disabled and feeds the
//! result into the registry:
//!
//! ```text
//! healthy     -> available     (from loading, unavailable, degraded)
//! loading     -> loading       (only from unavailable / loading)
//! unreachable -> unavailable
//! ```
//!
//! Probes run concurrently within one round, each bounded by the probe
//! timeout; a probe that does not answer in time counts as unreachable. A
//! round never touches a disabled endpoint; only an operator can re-enable
//! it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::endpoint::EndpointStatus;
use super::executor::{HealthProbe, ProbeResult};
use super::registry::{EndpointRegistry, StatusChange};
use super::telemetry::TelemetrySink;

/// Default interval between probe rounds
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a single probe may take
pub const DEFAULT_HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives health probes into the registry
pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    probe: Arc<dyn HealthProbe>,
    telemetry: TelemetrySink,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(registry: Arc<EndpointRegistry>, probe: Arc<dyn HealthProbe>, telemetry: TelemetrySink) -> Self {
        Self {
            registry,
            probe,
            telemetry,
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            probe_timeout: DEFAULT_HEALTH_PROBE_TIMEOUT,
        }
    }

    /// Set the round interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the per-probe time limit
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Round interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Per-probe time limit
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probe every non-disabled endpoint once; returns the status changes
    pub async fn check_once(&self) -> Vec<StatusChange> {
        let targets: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|e| e.status != EndpointStatus::Disabled)
            .collect();

        let probes = targets.iter().map(|endpoint| async move {
            let result = match tokio::time::timeout(self.probe_timeout, self.probe.probe(endpoint)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        endpoint = %endpoint.id,
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Health probe timed out"
                    );
                    ProbeResult::Unreachable {
                        reason: "probe timed out".to_string(),
                    }
                }
            };
            (endpoint.id.as_str(), result)
        });
        let results = futures::future::join_all(probes).await;

        let mut changes = Vec::new();
        for (id, result) in results {
            if let Some(change) = self.registry.apply_health_check(id, &result) {
                self.telemetry.emit_status(Some(change.clone()));
                changes.push(change);
            }
        }

        tracing::debug!(probed = targets.len(), changed = changes.len(), "Health check round complete");
        changes
    }

    /// Run rounds on a fixed interval until `cancel` fires
    ///
    /// The first round runs immediately.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(interval_ms = self.interval.as_millis() as u64, "Health monitor started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.check_once().await;
                    }
                }
            }
            tracing::info!("Health monitor stopped");
        })
    }
}
