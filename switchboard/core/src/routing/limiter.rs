//! Per-Endpoint Concurrency Limits
//!
//! One semaphore per endpoint, sized from the endpoint's `max_concurrent` or
//! its location default. Requests beyond the cap queue for a permit instead
//! of launching in parallel; a single local server or on-device model gets
//! exactly one request at a time by default.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::endpoint::Endpoint;

struct Slot {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Held while an attempt runs; releases the slot on drop
#[derive(Debug)]
pub struct EndpointPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for EndpointPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Concurrency caps for every endpoint
#[derive(Default)]
pub struct EndpointLimiter {
    slots: DashMap<String, Slot>,
    /// Cap override applied to endpoints without their own `max_concurrent`
    default_cap: Option<usize>,
    closed: AtomicBool,
}

impl EndpointLimiter {
    /// Limiter using per-location defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter with one cap for endpoints that do not set their own
    #[must_use]
    pub fn with_default_cap(cap: usize) -> Self {
        Self {
            slots: DashMap::new(),
            default_cap: Some(cap.max(1)),
            closed: AtomicBool::new(false),
        }
    }

    fn capacity_for(&self, endpoint: &Endpoint) -> usize {
        match (endpoint.max_concurrent, self.default_cap) {
            (Some(cap), _) => cap.max(1),
            (None, Some(cap)) => cap,
            (None, None) => endpoint.concurrency_limit(),
        }
    }

    /// Wait for a slot on `endpoint`
    ///
    /// Returns `None` only if the limiter has been shut down, including for
    /// endpoints first seen after the shutdown.
    pub async fn acquire(&self, endpoint: &Endpoint) -> Option<EndpointPermit> {
        let (semaphore, in_flight, peak) = {
            let slot = self.slots.entry(endpoint.id.clone()).or_insert_with(|| {
                let capacity = self.capacity_for(endpoint);
                Slot {
                    semaphore: Arc::new(Semaphore::new(capacity)),
                    capacity,
                    in_flight: Arc::new(AtomicUsize::new(0)),
                    peak: Arc::new(AtomicUsize::new(0)),
                }
            });
            (
                Arc::clone(&slot.semaphore),
                Arc::clone(&slot.in_flight),
                Arc::clone(&slot.peak),
            )
        };

        // Checked after the slot exists so close() either sees the slot or we see the flag
        if self.is_closed() {
            return None;
        }

        if semaphore.available_permits() == 0 {
            tracing::debug!(endpoint = %endpoint.id, "Endpoint at concurrency cap, queueing");
        }

        let permit = semaphore.acquire_owned().await.ok()?;
        let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        peak.fetch_max(now, Ordering::AcqRel);

        Some(EndpointPermit {
            _permit: permit,
            in_flight,
        })
    }

    /// Configured cap, once the endpoint has been used
    #[must_use]
    pub fn capacity(&self, endpoint_id: &str) -> Option<usize> {
        self.slots.get(endpoint_id).map(|slot| slot.capacity)
    }

    /// Attempts currently holding a slot
    #[must_use]
    pub fn in_flight(&self, endpoint_id: &str) -> usize {
        self.slots
            .get(endpoint_id)
            .map_or(0, |slot| slot.in_flight.load(Ordering::Acquire))
    }

    /// Highest number of simultaneous attempts seen
    #[must_use]
    pub fn peak_in_flight(&self, endpoint_id: &str) -> usize {
        self.slots
            .get(endpoint_id)
            .map_or(0, |slot| slot.peak.load(Ordering::Acquire))
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop handing out permits; queued waiters are released with `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for slot in self.slots.iter() {
            slot.semaphore.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::routing::endpoint::CostModel;
    use crate::routing::taxonomy::CapabilityTier;

    #[tokio::test]
    async fn test_on_device_is_serialized() {
        let limiter = EndpointLimiter::new();
        let device = Endpoint::on_device("llama-1b", CapabilityTier::Tiny, "/m");

        let first = limiter.acquire(&device).await.unwrap();
        assert_eq!(limiter.capacity("llama-1b"), Some(1));
        assert_eq!(limiter.in_flight("llama-1b"), 1);

        // Second caller has to wait
        let waited = tokio::time::timeout(Duration::from_millis(20), limiter.acquire(&device)).await;
        assert!(waited.is_err());

        drop(first);
        assert_eq!(limiter.in_flight("llama-1b"), 0);
        assert!(limiter.acquire(&device).await.is_some());
        assert_eq!(limiter.peak_in_flight("llama-1b"), 1);
    }

    #[tokio::test]
    async fn test_endpoint_override_wins() {
        let limiter = EndpointLimiter::with_default_cap(2);
        let cloud = Endpoint::cloud("gpt-4o", CapabilityTier::Frontier, "KEY", CostModel::free());
        let wide = Endpoint::cloud("wide", CapabilityTier::Frontier, "KEY", CostModel::free()).with_max_concurrent(8);

        let _a = limiter.acquire(&cloud).await.unwrap();
        let _b = limiter.acquire(&wide).await.unwrap();
        assert_eq!(limiter.capacity("gpt-4o"), Some(2));
        assert_eq!(limiter.capacity("wide"), Some(8));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let limiter = Arc::new(EndpointLimiter::new());
        let device = Endpoint::on_device("llama-1b", CapabilityTier::Tiny, "/m");
        let _held = limiter.acquire(&device).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let device = device.clone();
            tokio::spawn(async move { limiter.acquire(&device).await.is_none() })
        };
        tokio::task::yield_now().await;
        limiter.close();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_covers_endpoints_not_yet_used() {
        let limiter = EndpointLimiter::new();
        let used = Endpoint::on_device("llama-1b", CapabilityTier::Tiny, "/m");
        drop(limiter.acquire(&used).await.unwrap());

        limiter.close();
        assert!(limiter.is_closed());

        let fresh = Endpoint::cloud("gpt-4o", CapabilityTier::Frontier, "KEY", CostModel::free());
        assert!(limiter.acquire(&fresh).await.is_none());
        assert!(limiter.acquire(&used).await.is_none());
        assert_eq!(limiter.in_flight("gpt-4o"), 0);
    }

    #[test]
    fn test_waiter_woken_when_slot_frees() {
        let limiter = EndpointLimiter::new();
        let device = Endpoint::on_device("llama-1b", CapabilityTier::Tiny, "/m");
        let held = tokio_test::block_on(limiter.acquire(&device)).unwrap();

        let mut waiter = tokio_test::task::spawn(limiter.acquire(&device));
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let permit = tokio_test::assert_ready!(waiter.poll());
        assert!(permit.is_some());
    }
}
