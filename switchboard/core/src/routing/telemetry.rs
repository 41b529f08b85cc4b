//! Routing Telemetry Events
//!
//! Broadcast to any number of subscribers. Sending never blocks and never
//! fails the request: with no subscribers events are dropped, and a slow
//! subscriber sees `Lagged` rather than holding up routing.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::AttemptError;
use super::registry::StatusChange;
use super::taxonomy::TaskType;

/// Events buffered per subscriber before it starts lagging
pub const TELEMETRY_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened while routing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A chain entry failed or was skipped
    AttemptFailed {
        /// Request id
        request_id: Uuid,
        /// Endpoint the failure is keyed by
        endpoint_id: String,
        /// Task type
        task_type: TaskType,
        /// What went wrong
        error: AttemptError,
    },

    /// A request was served
    RequestServed {
        /// Request id
        request_id: Uuid,
        /// Endpoint that served it
        endpoint_id: String,
        /// Latency of the successful attempt
        latency_ms: u64,
        /// Cost of the successful attempt
        cost: f64,
    },

    /// Every chain entry failed
    ChainExhausted {
        /// Request id
        request_id: Uuid,
        /// Task type
        task_type: TaskType,
    },

    /// An endpoint changed status
    StatusChanged(StatusChange),
}

/// Sending half of the telemetry channel
#[derive(Clone, Debug)]
pub struct TelemetrySink {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new(TELEMETRY_CHANNEL_CAPACITY)
    }
}

impl TelemetrySink {
    /// Channel with the given per-subscriber buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber, receiving events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn emit(&self, event: TelemetryEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Publish a status change, if there was one
    pub fn emit_status(&self, change: Option<StatusChange>) {
        if let Some(change) = change {
            self.emit(TelemetryEvent::StatusChanged(change));
        }
    }
}
