mod support;

use std::time::Duration;

use dispatch_core::broadcast::Topic;
use dispatch_core::engine::DispatchEngine;
use dispatch_core::model::{IncidentStatus, ServiceType, Severity};
use dispatch_core::runner::tick;
use dispatch_core::scenario::{seed_scenario, ScenarioParams};
use dispatch_core::store::DispatchStore;
use dispatch_core::test_helpers::{
    add_dispatcher, add_incident, add_unit, assert_single_active_assignment_per_unit,
    fast_config, km_north, TestHarness, TEST_ORIGIN,
};

use support::{eventually, on_topic, received};

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let harness = TestHarness::new(fast_config());
    let engine = DispatchEngine::new(harness.ctx.clone());

    assert!(!engine.is_dispatching());
    assert!(engine.start_dispatch());
    assert!(!engine.start_dispatch());
    assert!(engine.is_dispatching());

    assert!(engine.stop_dispatch().await);
    assert!(!engine.stop_dispatch().await);
    assert!(!engine.is_dispatching());

    assert!(engine.start_dispatch(), "restart after stop");
    engine.shutdown().await;
    assert!(!engine.is_dispatching());
}

#[tokio::test]
async fn single_tick_moves_then_matches() {
    let harness = TestHarness::new(fast_config().with_speed_factor(5));
    let store = harness.store.as_ref();
    add_dispatcher(store);
    add_incident(store, ServiceType::Fire, Some(Severity::Low), km_north(TEST_ORIGIN, 1.0), harness.now_ms());
    add_unit(store, ServiceType::Fire, TEST_ORIGIN);

    let first = tick(&harness.ctx).await;
    assert_eq!(first.moved, 0);
    assert_eq!(first.assigned.len(), 1);

    support::drain(&harness.ctx).await;
    let second = tick(&harness.ctx).await;
    assert_eq!(second.moved, 1);
    assert!(second.arrived.is_empty());
    assert!(second.assigned.is_empty());
    assert_eq!(harness.ctx.telemetry.snapshot().ticks, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loop_dispatches_and_completes_every_incident() {
    let harness = TestHarness::new(fast_config().with_speed_factor(50));
    let store = harness.store.clone();
    let params = ScenarioParams::default()
        .with_units(12)
        .with_incidents(0)
        .with_seed(11);
    let seeded = seed_scenario(store.as_ref(), &params, harness.now_ms()).expect("seed");
    // one incident next to every unit so each type has work within radius
    for unit in &seeded.units {
        add_incident(
            store.as_ref(),
            unit.service,
            Some(Severity::Medium),
            km_north(unit.position, 0.5),
            harness.now_ms(),
        );
    }

    let engine = DispatchEngine::new(harness.ctx.clone());
    assert!(engine.start_dispatch());

    let all_done = eventually(Duration::from_secs(10), || {
        store
            .all_incidents()
            .map(|incidents| {
                incidents
                    .iter()
                    .all(|i| i.status == IncidentStatus::Completed)
            })
            .unwrap_or(false)
    })
    .await;
    engine.shutdown().await;

    assert!(all_done, "every incident should complete");
    assert_single_active_assignment_per_unit(store.as_ref());
    assert_eq!(store.find_available_units().expect("read").len(), 12);
    let telemetry = engine.telemetry();
    assert_eq!(telemetry.completed_assignments, 12);
    assert!(telemetry.ticks > 0);
    assert!(harness.ctx.routes.is_empty());
}

#[tokio::test]
async fn stopping_keeps_routes_for_resume() {
    let harness = TestHarness::new(fast_config().with_speed_factor(1));
    let unit = add_unit(harness.store.as_ref(), ServiceType::Police, TEST_ORIGIN);
    let route: Vec<_> = (1..=10_000)
        .map(|i| km_north(TEST_ORIGIN, i as f64 * 0.001))
        .collect();
    harness.ctx.routes.install(unit.id, route);
    let engine = DispatchEngine::new(harness.ctx.clone());

    engine.start_dispatch();
    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.stop_dispatch().await;

    let remaining = harness.ctx.routes.remaining(unit.id).expect("route kept");
    assert!(remaining < 10_000);

    engine.start_dispatch();
    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.shutdown().await;
    let resumed = harness.ctx.routes.remaining(unit.id).expect("route kept");
    assert!(resumed < remaining, "trip continues after restart");
}

#[tokio::test]
async fn location_snapshots_are_broadcast_in_batches() {
    let harness = TestHarness::new(fast_config());
    let engine = DispatchEngine::new(harness.ctx.clone());
    let mut rx = harness.broadcaster.subscribe();

    assert!(engine.start_location_broadcast());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(
        on_topic(&received(&mut rx), Topic::UnitLocationBatch).is_empty(),
        "empty store publishes nothing"
    );

    let unit = add_unit(harness.store.as_ref(), ServiceType::Fire, TEST_ORIGIN);
    harness.ctx.routes.install(unit.id, vec![km_north(TEST_ORIGIN, 0.1), km_north(TEST_ORIGIN, 0.2)]);
    dispatch_core::systems::movement::advance_movement(&harness.ctx);
    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.shutdown().await;

    let messages = received(&mut rx);
    let batches = on_topic(&messages, Topic::UnitLocationBatch);
    assert!(!batches.is_empty());
    let batch = batches[0].payload.as_array().expect("array");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["unit_id"], unit.id.0);
}
