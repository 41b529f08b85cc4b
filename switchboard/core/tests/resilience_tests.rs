//! Resilience Tests
//!
//! Cancellation, per-endpoint concurrency caps, and the degrade/recover
//! cycle driven by execution feedback and health probes.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use switchboard_core::config::RouterSettings;
use switchboard_core::routing::executor::ProbeResult;
use switchboard_core::routing::test_utils::{standard_registry, MockBehavior, ScriptedExecutor, ScriptedProbe};
use switchboard_core::routing::TelemetryEvent;
use switchboard_core::{EndpointStatus, RouterError, RoutingTable, TaskRequest, TaskRouter, TaskType};

fn table() -> RoutingTable {
    RoutingTable::with_fallback(["gpt-4o-mini"])
        .with_default_route(TaskType::Dialogue, ["gpt-4o"])
        .with_default_route(TaskType::Simplification, ["qwen-14b"])
}

fn router(executor: &ScriptedExecutor) -> TaskRouter {
    TaskRouter::builder(Arc::new(standard_registry()), table(), Arc::new(executor.clone()))
        .build()
        .expect("valid router")
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_before_route_attempts_nothing() {
    let executor = ScriptedExecutor::new();
    let router = router(&executor);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = router
        .route_with_cancel(&TaskRequest::new(TaskType::Dialogue, "hi"), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, RouterError::Cancelled);
    assert_eq!(executor.total_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_attempt_stops_chain() {
    let executor = ScriptedExecutor::new();
    executor.set_behavior("gpt-4o", MockBehavior::Hang);
    let router = router(&executor);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        trigger.cancel();
    });

    let err = router
        .route_with_cancel(&TaskRequest::new(TaskType::Dialogue, "hi"), &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, RouterError::Cancelled);
    assert_eq!(executor.called_endpoints(), vec!["gpt-4o"]);
    assert_eq!(router.registry().status("gpt-4o"), Some(EndpointStatus::Available));
    assert_eq!(router.registry().consecutive_failures("gpt-4o"), 0);
    assert_eq!(router.limiter().in_flight("gpt-4o"), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_single_slot_endpoint_serializes_requests() {
    let executor = ScriptedExecutor::new();
    executor.set_latency("qwen-14b", Duration::from_millis(40));
    let router = router(&executor);

    let first = TaskRequest::new(TaskType::Simplification, "one");
    let second = TaskRequest::new(TaskType::Simplification, "two");
    let (a, b) = tokio::join!(router.route(&first), router.route(&second));

    assert_eq!(a.unwrap().endpoint_used, "qwen-14b");
    assert_eq!(b.unwrap().endpoint_used, "qwen-14b");
    assert_eq!(executor.peak_concurrency("qwen-14b"), 1);
    assert_eq!(router.limiter().peak_in_flight("qwen-14b"), 1);
}

#[tokio::test]
async fn test_cloud_endpoint_allows_parallel_requests() {
    let executor = ScriptedExecutor::new();
    executor.set_latency("gpt-4o", Duration::from_millis(40));
    let router = router(&executor);

    let requests: Vec<TaskRequest> = (0..3).map(|i| TaskRequest::new(TaskType::Dialogue, format!("{i}"))).collect();
    let results = futures::future::join_all(requests.iter().map(|r| router.route(r))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(executor.peak_concurrency("gpt-4o"), 3);
}

#[tokio::test]
async fn test_queue_wait_counts_against_timeout() {
    let executor = ScriptedExecutor::new();
    executor.set_latency("qwen-14b", Duration::from_millis(200));
    let router = router(&executor);

    let first = TaskRequest::new(TaskType::Simplification, "one").with_attempt_timeout_ms(1_000);
    let second = TaskRequest::new(TaskType::Simplification, "two").with_attempt_timeout_ms(50);
    let (a, b) = tokio::join!(router.route(&first), router.route(&second));

    assert_eq!(a.unwrap().endpoint_used, "qwen-14b");
    // The second request gave up waiting for the slot and fell back
    assert_eq!(b.unwrap().endpoint_used, "gpt-4o-mini");
}

// =============================================================================
// Degrade / Recover
// =============================================================================

#[tokio::test]
async fn test_repeated_failures_degrade_then_probe_recovers() {
    let executor = ScriptedExecutor::new();
    executor.set_failing("qwen-14b");
    let router = router(&executor);
    let mut events = router.subscribe();

    for _ in 0..3 {
        let response = router
            .route(&TaskRequest::new(TaskType::Simplification, "text"))
            .await
            .unwrap();
        assert_eq!(response.endpoint_used, "gpt-4o-mini");
    }
    assert_eq!(router.registry().status("qwen-14b"), Some(EndpointStatus::Degraded));

    let mut saw_degrade = false;
    while let Ok(event) = events.try_recv() {
        if let TelemetryEvent::StatusChanged(change) = event {
            saw_degrade |= change.endpoint_id == "qwen-14b" && change.to == EndpointStatus::Degraded;
        }
    }
    assert!(saw_degrade);

    // Degraded endpoints are left out of the default route
    let (decision, _) = router.resolve(&TaskRequest::new(TaskType::Simplification, "text"));
    assert_eq!(decision.chain, vec!["gpt-4o-mini"]);

    let probe = ScriptedProbe::new();
    probe.set_result("qwen-14b", ProbeResult::Healthy { latency_ms: 30 });
    router.health_monitor(Arc::new(probe)).check_once().await;
    assert_eq!(router.registry().status("qwen-14b"), Some(EndpointStatus::Available));

    executor.set_behavior("qwen-14b", MockBehavior::Reply("back".into()));
    let response = router
        .route(&TaskRequest::new(TaskType::Simplification, "text"))
        .await
        .unwrap();
    assert_eq!(response.endpoint_used, "qwen-14b");
    assert_eq!(response.content, "back");
}

#[tokio::test]
async fn test_custom_degrade_threshold() {
    let executor = ScriptedExecutor::new();
    executor.set_failing("qwen-14b");
    let router = TaskRouter::builder(Arc::new(standard_registry()), table(), Arc::new(executor.clone()))
        .with_settings(RouterSettings {
            degrade_after_failures: 1,
            ..RouterSettings::default()
        })
        .build()
        .unwrap();

    router
        .route(&TaskRequest::new(TaskType::Simplification, "text"))
        .await
        .unwrap();
    assert_eq!(router.registry().status("qwen-14b"), Some(EndpointStatus::Degraded));
}

#[tokio::test]
async fn test_probe_reports_unreachable_endpoint() {
    let executor = ScriptedExecutor::new();
    let router = router(&executor);

    let probe = ScriptedProbe::new();
    probe.set_result(
        "gpt-4o",
        ProbeResult::Unreachable {
            reason: "dns failure".into(),
        },
    );
    router.health_monitor(Arc::new(probe)).check_once().await;

    let response = router
        .route(&TaskRequest::new(TaskType::Dialogue, "hi"))
        .await
        .unwrap();
    assert_eq!(response.endpoint_used, "gpt-4o-mini");
    assert_eq!(executor.request_count("gpt-4o"), 0);
}
