//! End-to-end Routing Tests
//!
//! Drive the public `TaskRouter` API with scripted executors and static
//! context, covering precedence, fallback, history and the control surface.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use pretty_assertions::assert_eq;

use switchboard_core::config::RouterSettings;
use switchboard_core::routing::conditions::{ComparisonOp, RoutingCondition, SetMatch};
use switchboard_core::routing::context::{NetworkType, SystemConditions};
use switchboard_core::routing::endpoint::{CostModel, Endpoint, EndpointStatus};
use switchboard_core::routing::history::AttemptOutcome;
use switchboard_core::routing::telemetry::TelemetryEvent;
use switchboard_core::routing::test_utils::{
    standard_endpoints, standard_registry, MockBehavior, ScriptedExecutor, StaticContextProvider,
};
use switchboard_core::{
    AutoRoutingRule, CapabilityTier, EndpointRegistry, RouterError, RoutingReason, RoutingTable, TaskRequest,
    TaskRouter, TaskType,
};

// =============================================================================
// Helpers
// =============================================================================

fn fixed_conditions(network_type: NetworkType) -> StaticContextProvider {
    StaticContextProvider::new(SystemConditions {
        network_type,
        local_time: NaiveTime::from_hms_opt(14, 30, 0),
        ..SystemConditions::default()
    })
}

fn build(
    registry: EndpointRegistry,
    table: RoutingTable,
    executor: &ScriptedExecutor,
    provider: StaticContextProvider,
    developer_mode: bool,
) -> TaskRouter {
    TaskRouter::builder(Arc::new(registry), table, Arc::new(executor.clone()))
        .with_context_provider(Arc::new(provider))
        .with_settings(RouterSettings {
            developer_mode,
            ..RouterSettings::default()
        })
        .build()
        .expect("valid router")
}

fn standard_table() -> RoutingTable {
    RoutingTable::with_fallback(["gpt-4o-mini"])
        .with_default_route(TaskType::Dialogue, ["gpt-4o", "qwen-14b"])
        .with_default_route(TaskType::Acknowledgment, ["on-device-1b"])
        .with_default_route(TaskType::Simplification, ["qwen-14b"])
}

// =============================================================================
// Resolution Scenarios
// =============================================================================

#[test]
fn test_global_override_wins_for_every_task_type() {
    let mut table = standard_table();
    table.global_override = Some("gpt-4o-mini".into());
    table.manual_overrides.insert(TaskType::Dialogue, "qwen-14b".into());
    table.auto_routing_rules.push(
        AutoRoutingRule::new("always", "Always", 500, "on-device-1b").with_condition(RoutingCondition::NetworkType {
            types: SetMatch::Any,
        }),
    );

    let executor = ScriptedExecutor::new();
    let router = build(standard_registry(), table, &executor, fixed_conditions(NetworkType::Wifi), false);

    for task_type in TaskType::ALL {
        let (decision, _) = router.resolve(&TaskRequest::new(task_type, "hello"));
        assert_eq!(decision.chain, vec!["gpt-4o-mini"]);
        assert_eq!(decision.reason, RoutingReason::GlobalOverride);
    }
}

#[test]
fn test_unavailable_default_falls_through_to_fallback() {
    let registry = EndpointRegistry::from_endpoints(standard_endpoints().into_iter().map(|e| {
        if e.id == "on-device-1b" {
            e.with_status(EndpointStatus::Unavailable)
        } else {
            e
        }
    }))
    .unwrap();

    let executor = ScriptedExecutor::new();
    let router = build(registry, standard_table(), &executor, fixed_conditions(NetworkType::Wifi), false);

    let (decision, _) = router.resolve(&TaskRequest::new(TaskType::Acknowledgment, "ok"));
    assert_eq!(decision.chain, vec!["gpt-4o-mini"]);
    assert_eq!(decision.reason, RoutingReason::Fallback);
}

#[test]
fn test_offline_rule_routes_on_device() {
    let mut endpoints = standard_endpoints();
    endpoints.push(
        Endpoint::on_device("on-device-model", CapabilityTier::Small, "/models/phi.gguf")
            .with_status(EndpointStatus::Available),
    );
    let registry = EndpointRegistry::from_endpoints(endpoints).unwrap();

    let table = standard_table().with_rule(
        AutoRoutingRule::new("offline", "OfflineMode", 200, "on-device-model").with_condition(
            RoutingCondition::NetworkType {
                types: SetMatch::OneOf(vec![NetworkType::None]),
            },
        ),
    );

    let executor = ScriptedExecutor::new();
    let router = build(registry, table, &executor, fixed_conditions(NetworkType::None), false);

    for task_type in TaskType::ALL {
        let (decision, _) = router.resolve(&TaskRequest::new(task_type, "hello"));
        assert_eq!(decision.chain, vec!["on-device-model", "gpt-4o-mini"]);
        assert_eq!(
            decision.reason,
            RoutingReason::AutoRule {
                name: "OfflineMode".into()
            }
        );
    }
}

#[test]
fn test_higher_priority_rule_chosen() {
    let table = standard_table()
        .with_rule(
            AutoRoutingRule::new("cheap", "CheapWhenLong", 100, "qwen-14b").with_condition(
                RoutingCondition::PromptLength {
                    op: ComparisonOp::Gt,
                    value: 10,
                },
            ),
        )
        .with_rule(
            AutoRoutingRule::new("cellular", "CellularSaver", 200, "on-device-1b").with_condition(
                RoutingCondition::NetworkType {
                    types: SetMatch::OneOf(vec![NetworkType::Cellular]),
                },
            ),
        );

    let executor = ScriptedExecutor::new();
    let router = build(standard_registry(), table, &executor, fixed_conditions(NetworkType::Cellular), true);
    let request = TaskRequest::new(TaskType::Dialogue, "a fairly long prompt");

    let (decision, _) = router.resolve(&request);
    assert_eq!(decision.primary(), Some("on-device-1b"));

    assert!(router.set_rule_enabled("cellular", false).is_applied());
    let (decision, _) = router.resolve(&request);
    assert_eq!(decision.primary(), Some("qwen-14b"));
    assert_eq!(
        decision.reason,
        RoutingReason::AutoRule {
            name: "CheapWhenLong".into()
        }
    );
}

#[test]
fn test_resolution_is_idempotent() {
    let table = standard_table().with_rule(
        AutoRoutingRule::new("afternoon", "Afternoon", 10, "qwen-14b").with_condition(RoutingCondition::TimeOfDay {
            start_hour: 12,
            end_hour: 18,
        }),
    );
    let executor = ScriptedExecutor::new();
    let router = build(standard_registry(), table, &executor, fixed_conditions(NetworkType::Wifi), false);
    let request = TaskRequest::new(TaskType::Summarization, "text");

    let (first, first_ctx) = router.resolve(&request);
    let (second, second_ctx) = router.resolve(&request);
    assert_eq!(first, second);
    assert_eq!(first_ctx, second_ctx);
    assert_eq!(first.primary(), Some("qwen-14b"));
}

// =============================================================================
// Execution Scenarios
// =============================================================================

#[tokio::test]
async fn test_timeout_then_success_records_both_attempts() {
    let executor = ScriptedExecutor::new();
    executor.set_behavior("gpt-4o", MockBehavior::Hang);
    let router = build(
        standard_registry(),
        standard_table(),
        &executor,
        fixed_conditions(NetworkType::Wifi),
        false,
    );
    let mut events = router.subscribe();

    let request = TaskRequest::new(TaskType::Dialogue, "hello").with_attempt_timeout_ms(50);
    let response = router.route(&request).await.unwrap();
    assert_eq!(response.endpoint_used, "qwen-14b");

    let records = router.history().for_request(request.id);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].attempt.endpoint_id, "gpt-4o");
    assert_eq!(records[0].attempt.outcome, AttemptOutcome::Timeout);
    assert_eq!(records[1].attempt.endpoint_id, "qwen-14b");
    assert_eq!(records[1].attempt.outcome, AttemptOutcome::Success);

    match events.recv().await.unwrap() {
        TelemetryEvent::AttemptFailed { endpoint_id, .. } => assert_eq!(endpoint_id, "gpt-4o"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_all_unavailable_exhausts_without_calls() {
    let registry = EndpointRegistry::from_endpoints(
        standard_endpoints()
            .into_iter()
            .map(|e| e.with_status(EndpointStatus::Unavailable)),
    )
    .unwrap();
    let executor = ScriptedExecutor::new();
    let router = build(registry, standard_table(), &executor, fixed_conditions(NetworkType::Wifi), false);

    let err = router
        .route(&TaskRequest::new(TaskType::Dialogue, "hello"))
        .await
        .unwrap_err();

    let RouterError::AllEndpointsFailed { chain, causes, .. } = err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert_eq!(chain, vec!["gpt-4o-mini"]);
    assert_eq!(causes.len(), 1);
    assert_eq!(executor.total_calls(), 0);
}

#[tokio::test]
async fn test_history_keeps_most_recent_thousand() {
    let executor = ScriptedExecutor::new();
    let router = build(
        standard_registry(),
        standard_table(),
        &executor,
        fixed_conditions(NetworkType::Wifi),
        false,
    );

    let mut last_ids = Vec::new();
    for i in 0..1005 {
        let request = TaskRequest::new(TaskType::Acknowledgment, format!("ok {i}"));
        router.route(&request).await.unwrap();
        last_ids.push(request.id);
    }

    let records = router.history().snapshot();
    assert_eq!(records.len(), 1000);
    assert_eq!(records[0].request_id, last_ids[5]);
    assert_eq!(records[999].request_id, last_ids[1004]);
}

#[tokio::test]
async fn test_max_cost_prefers_free_endpoints() {
    let registry = EndpointRegistry::from_endpoints(standard_endpoints().into_iter().map(|mut e| {
        if e.id == "gpt-4o" {
            e.cost = CostModel {
                per_input_unit: 0.01,
                per_output_unit: 0.01,
            };
        }
        e
    }))
    .unwrap();
    let executor = ScriptedExecutor::new();
    let router = build(registry, standard_table(), &executor, fixed_conditions(NetworkType::Wifi), false);

    let request = TaskRequest::new(TaskType::Dialogue, "hello").with_max_cost(0.5);
    let response = router.route(&request).await.unwrap();
    assert_eq!(response.endpoint_used, "qwen-14b");
    assert_eq!(executor.called_endpoints(), vec!["qwen-14b"]);
}

#[tokio::test]
async fn test_stats_and_exports() {
    let executor = ScriptedExecutor::new();
    executor.set_failing("gpt-4o");
    let router = build(
        standard_registry(),
        standard_table(),
        &executor,
        fixed_conditions(NetworkType::Wifi),
        false,
    );

    router.route(&TaskRequest::new(TaskType::Dialogue, "one")).await.unwrap();
    router.route(&TaskRequest::new(TaskType::Acknowledgment, "two")).await.unwrap();

    let stats = router.routing_stats(100);
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.by_reason.get("default_route"), Some(&2));
    assert_eq!(stats.endpoints["gpt-4o"].failure_rate, 1.0);
    assert_eq!(stats.endpoints["qwen-14b"].failures, 0);

    let json = router.export_history_json().unwrap();
    let imported = switchboard_core::RoutingHistory::import_json(&json).unwrap();
    assert_eq!(imported.len(), 3);

    let table = RoutingTable::from_json(&router.export_table_json().unwrap()).unwrap();
    assert_eq!(table, router.table_snapshot());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_table_round_trips_through_json() {
    let table = standard_table().with_rule(
        AutoRoutingRule::new("hot", "Hot", 50, "gpt-4o-mini")
            .with_condition(RoutingCondition::BatteryLevel {
                op: ComparisonOp::Lt,
                value: 0.2,
            })
            .for_task_types([TaskType::Dialogue, TaskType::AnswerEvaluation]),
    );

    let json = table.to_json_pretty().unwrap();
    assert_eq!(RoutingTable::from_json(&json).unwrap(), table);
}

#[test]
fn test_malformed_table_rejected() {
    let table = RoutingTable::with_fallback(["gpt-4o-mini"]).with_rule(
        AutoRoutingRule::new("bad", "Bad", 1, "ghost").with_condition(RoutingCondition::BatteryLevel {
            op: ComparisonOp::Lt,
            value: 1.5,
        }),
    );
    let result = TaskRouter::builder(Arc::new(standard_registry()), table, Arc::new(ScriptedExecutor::new())).build();

    let Err(RouterError::InvalidConfiguration(msg)) = result else {
        panic!("expected invalid configuration");
    };
    assert!(msg.contains("ghost"));
}

#[test]
fn test_router_from_settings_files() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints_path = dir.path().join("endpoints.json");
    let table_path = dir.path().join("routing.json");

    std::fs::write(&endpoints_path, serde_json::to_string(&standard_endpoints()).unwrap()).unwrap();
    std::fs::write(&table_path, standard_table().to_json_pretty().unwrap()).unwrap();

    let settings = RouterSettings {
        endpoints_path: Some(endpoints_path),
        routing_table_path: Some(table_path),
        history_capacity: 10,
        ..RouterSettings::default()
    };
    let router = TaskRouter::from_settings(settings, Arc::new(ScriptedExecutor::new())).unwrap();
    assert_eq!(router.registry().len(), 4);
    assert_eq!(router.history().capacity(), 10);
    assert_eq!(router.table_snapshot(), standard_table());
}

#[test]
fn test_router_from_settings_requires_files() {
    let result = TaskRouter::from_settings(RouterSettings::default(), Arc::new(ScriptedExecutor::new()));
    assert!(matches!(result, Err(RouterError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn test_health_monitor_uses_router_interval() {
    let executor = ScriptedExecutor::new();
    let router = build(
        standard_registry(),
        standard_table(),
        &executor,
        fixed_conditions(NetworkType::Wifi),
        false,
    );
    let monitor = router.health_monitor(Arc::new(switchboard_core::routing::test_utils::ScriptedProbe::new()));
    assert_eq!(monitor.interval(), Duration::from_secs(30));
    assert_eq!(monitor.probe_timeout(), Duration::from_secs(5));
}
