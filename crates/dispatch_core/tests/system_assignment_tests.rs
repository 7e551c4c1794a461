mod support;

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::broadcast::{ChannelBroadcaster, Topic};
use dispatch_core::clock::ManualClock;
use dispatch_core::context::DispatchContext;
use dispatch_core::distributions::FixedWorkDuration;
use dispatch_core::engine::DispatchEngine;
use dispatch_core::error::{DispatchError, ErrorKind};
use dispatch_core::model::{Availability, IncidentId, IncidentStatus, ServiceType, Severity, UnitId, UserId};
use dispatch_core::routing::StraightLineRouteProvider;
use dispatch_core::store::{DispatchStore, EntityRef, InMemoryStore};
use dispatch_core::systems::assignment::create_assignment;
use dispatch_core::test_helpers::{
    add_dispatcher, add_incident, add_unit, assert_single_active_assignment_per_unit,
    fast_config, km_north, TestHarness, TEST_EPOCH_MS, TEST_ORIGIN,
};

use support::flaky::FlakyStore;
use support::routers::SwitchableRouter;
use support::{drain, on_topic, received};

fn flaky_context(flaky: Arc<FlakyStore>) -> Arc<DispatchContext> {
    DispatchContext::builder(flaky)
        .config(fast_config().with_commit_retry(3, Duration::from_millis(5)))
        .clock(Arc::new(ManualClock::new(TEST_EPOCH_MS)))
        .broadcaster(Arc::new(ChannelBroadcaster::default()))
        .router(Arc::new(StraightLineRouteProvider::default()))
        .work(Arc::new(FixedWorkDuration(Duration::ZERO)))
        .build()
        .expect("context")
}

#[tokio::test]
async fn commit_marks_unit_busy_and_incident_dispatched() {
    let harness = TestHarness::new(fast_config());
    let store = harness.store.as_ref();
    let user = add_dispatcher(store);
    let incident = add_incident(store, ServiceType::Fire, Some(Severity::Medium), km_north(TEST_ORIGIN, 2.0), harness.now_ms());
    let unit = add_unit(store, ServiceType::Fire, TEST_ORIGIN);

    let assignment = create_assignment(&harness.ctx, user.id, incident.id, unit.id)
        .await
        .expect("assignment");

    assert!(assignment.active);
    assert_eq!(assignment.resolved_at, None);
    assert_eq!(assignment.assigned_at, harness.now_ms());
    assert_eq!(assignment.user_id, user.id);
    let unit = store.find_unit(unit.id).expect("read").expect("row");
    assert_eq!(unit.availability, Availability::Busy);
    let incident = store.find_incident(incident.id).expect("read").expect("row");
    assert_eq!(incident.status, IncidentStatus::Dispatched);
    assert_single_active_assignment_per_unit(store);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_for_one_unit_yield_one_conflict() {
    let harness = TestHarness::new(fast_config());
    let store = harness.store.as_ref();
    let user = add_dispatcher(store);
    let now = harness.now_ms();
    let first = add_incident(store, ServiceType::Police, Some(Severity::Low), TEST_ORIGIN, now);
    let second = add_incident(store, ServiceType::Police, Some(Severity::Low), TEST_ORIGIN, now);
    let unit = add_unit(store, ServiceType::Police, TEST_ORIGIN);

    let (a, b) = tokio::join!(
        create_assignment(&harness.ctx, user.id, first.id, unit.id),
        create_assignment(&harness.ctx, user.id, second.id, unit.id),
    );

    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "exactly one commit wins: {results:?}");
    let winner = results
        .iter()
        .find_map(|r| r.as_ref().ok())
        .expect("winner");
    let loser = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("loser");
    assert_eq!(loser.kind(), ErrorKind::Conflict);
    match loser {
        DispatchError::Conflict { unit_id, existing } => {
            assert_eq!(*unit_id, unit.id);
            assert_eq!(*existing, winner.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_single_active_assignment_per_unit(store);
}

#[tokio::test]
async fn conflict_leaves_losing_incident_pending() {
    let harness = TestHarness::new(fast_config());
    let store = harness.store.as_ref();
    let user = add_dispatcher(store);
    let now = harness.now_ms();
    let first = add_incident(store, ServiceType::Fire, None, TEST_ORIGIN, now);
    let second = add_incident(store, ServiceType::Fire, None, TEST_ORIGIN, now);
    let unit = add_unit(store, ServiceType::Fire, TEST_ORIGIN);

    create_assignment(&harness.ctx, user.id, first.id, unit.id)
        .await
        .expect("first");
    let err = create_assignment(&harness.ctx, user.id, second.id, unit.id)
        .await
        .expect_err("second must conflict");

    assert_eq!(err.kind(), ErrorKind::Conflict);
    let second = store.find_incident(second.id).expect("read").expect("row");
    assert_eq!(second.status, IncidentStatus::Pending);
    assert_eq!(store.find_assignments_by_incident(second.id).expect("read").len(), 0);
}

#[tokio::test]
async fn missing_entities_are_not_found_without_retry() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
    let ctx = flaky_context(flaky.clone());
    let user = add_dispatcher(flaky.as_ref());
    let incident = add_incident(flaky.as_ref(), ServiceType::Fire, None, TEST_ORIGIN, TEST_EPOCH_MS);
    let unit = add_unit(flaky.as_ref(), ServiceType::Fire, TEST_ORIGIN);

    let err = create_assignment(&ctx, user.id, IncidentId(404), unit.id)
        .await
        .expect_err("missing incident");
    assert!(matches!(err, DispatchError::NotFound(EntityRef::Incident(IncidentId(404)))));

    let err = create_assignment(&ctx, user.id, incident.id, UnitId(404))
        .await
        .expect_err("missing unit");
    assert!(matches!(err, DispatchError::NotFound(EntityRef::Unit(UnitId(404)))));

    let err = create_assignment(&ctx, UserId(404), incident.id, unit.id)
        .await
        .expect_err("missing user");
    assert!(matches!(err, DispatchError::NotFound(EntityRef::User(UserId(404)))));

    assert_eq!(flaky.begins(), 3, "not-found is never retried");
    assert!(flaky.all_assignments().expect("read").is_empty());
    assert!(flaky.find_unit(unit.id).expect("read").expect("row").is_available());
}

#[tokio::test]
async fn contention_is_retried_until_commit_succeeds() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
    let ctx = flaky_context(flaky.clone());
    let user = add_dispatcher(flaky.as_ref());
    let incident = add_incident(flaky.as_ref(), ServiceType::Ambulance, None, TEST_ORIGIN, TEST_EPOCH_MS);
    let unit = add_unit(flaky.as_ref(), ServiceType::Ambulance, TEST_ORIGIN);
    flaky.fail_next(2);

    let assignment = create_assignment(&ctx, user.id, incident.id, unit.id)
        .await
        .expect("third attempt commits");

    assert_eq!(assignment.unit_id, unit.id);
    assert_eq!(flaky.begins(), 3);
    let telemetry = ctx.telemetry.snapshot();
    assert_eq!(telemetry.contention_retries, 2);
    assert_eq!(telemetry.assignments_created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_unit_row_times_out_then_commit_succeeds_on_retry() {
    let store = Arc::new(InMemoryStore::with_lock_timeout(Duration::from_millis(20)));
    let harness = TestHarness::with_store(
        fast_config().with_commit_retry(5, Duration::from_millis(50)),
        store.clone(),
    );
    let user = add_dispatcher(store.as_ref());
    let incident = add_incident(store.as_ref(), ServiceType::Fire, None, km_north(TEST_ORIGIN, 1.0), harness.now_ms());
    let unit = add_unit(store.as_ref(), ServiceType::Fire, TEST_ORIGIN);

    let (held_tx, held_rx) = tokio::sync::oneshot::channel();
    let holder = {
        let store = store.clone();
        std::thread::spawn(move || {
            let mut tx = store.begin().expect("begin");
            tx.lock_unit(unit.id).expect("lock unit");
            let _ = held_tx.send(());
            // longer than one lock wait, shorter than the first backoff plus a wait
            std::thread::sleep(Duration::from_millis(60));
            drop(tx);
        })
    };
    held_rx.await.expect("row held");

    let assignment = create_assignment(&harness.ctx, user.id, incident.id, unit.id)
        .await
        .expect("commit after the row is released");
    holder.join().expect("holder thread");

    assert_eq!(assignment.unit_id, unit.id);
    let telemetry = harness.ctx.telemetry.snapshot();
    assert!(telemetry.contention_retries >= 1, "lock timeout should be retried");
    assert_eq!(telemetry.dispatch_failures, 0);
    assert_eq!(telemetry.assignments_created, 1);
    let unit = store.find_unit(unit.id).expect("read").expect("row");
    assert_eq!(unit.availability, Availability::Busy);
    assert_single_active_assignment_per_unit(store.as_ref());
}

#[tokio::test]
async fn exhausted_retries_surface_dispatch_failed() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
    let ctx = flaky_context(flaky.clone());
    let user = add_dispatcher(flaky.as_ref());
    let incident = add_incident(flaky.as_ref(), ServiceType::Ambulance, None, TEST_ORIGIN, TEST_EPOCH_MS);
    let unit = add_unit(flaky.as_ref(), ServiceType::Ambulance, TEST_ORIGIN);
    flaky.fail_next(10);

    let err = create_assignment(&ctx, user.id, incident.id, unit.id)
        .await
        .expect_err("retries exhausted");

    assert_eq!(err.kind(), ErrorKind::DispatchFailed);
    assert!(matches!(err, DispatchError::DispatchFailed { attempts: 3, .. }));
    assert_eq!(flaky.begins(), 3);
    assert!(flaky.all_assignments().expect("read").is_empty());
    assert_eq!(ctx.telemetry.snapshot().dispatch_failures, 1);
}

#[tokio::test]
async fn completed_incident_status_is_not_regressed() {
    let harness = TestHarness::new(fast_config());
    let engine = DispatchEngine::new(harness.ctx.clone());
    let store = harness.store.as_ref();
    let user = add_dispatcher(store);
    let incident = add_incident(store, ServiceType::Fire, None, TEST_ORIGIN, harness.now_ms());
    let first = add_unit(store, ServiceType::Fire, TEST_ORIGIN);
    let second = add_unit(store, ServiceType::Fire, TEST_ORIGIN);

    engine.create_assignment(user.id, incident.id, first.id).await.expect("first");
    engine.complete_incident(incident.id).await.expect("complete");
    engine.create_assignment(user.id, incident.id, second.id).await.expect("late unit");

    let incident = store.find_incident(incident.id).expect("read").expect("row");
    assert_eq!(incident.status, IncidentStatus::Completed);
    assert_single_active_assignment_per_unit(store);
}

#[tokio::test]
async fn updates_are_published_after_commit_and_route_follows() {
    let harness = TestHarness::new(fast_config());
    let mut rx = harness.broadcaster.subscribe();
    let store = harness.store.as_ref();
    let user = add_dispatcher(store);
    let incident = add_incident(store, ServiceType::Police, None, km_north(TEST_ORIGIN, 1.0), harness.now_ms());
    let unit = add_unit(store, ServiceType::Police, TEST_ORIGIN);

    create_assignment(&harness.ctx, user.id, incident.id, unit.id)
        .await
        .expect("assignment");
    drain(&harness.ctx).await;

    let messages = received(&mut rx);
    assert_eq!(on_topic(&messages, Topic::Incidents).len(), 1);
    assert_eq!(on_topic(&messages, Topic::Units).len(), 1);
    assert_eq!(on_topic(&messages, Topic::Assignments).len(), 1);
    let routes = on_topic(&messages, Topic::UnitRoute);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].payload["unit_id"], unit.id.0);
    assert_eq!(routes[0].payload["incident_type"], "POLICE");

    // 1 km at 0.1 km per waypoint
    assert_eq!(harness.ctx.routes.remaining(unit.id), Some(10));
}

#[tokio::test]
async fn routing_outage_parks_unit_until_retried() {
    let router = Arc::new(SwitchableRouter::down());
    let store = Arc::new(InMemoryStore::new());
    let ctx = DispatchContext::builder(store.clone())
        .config(fast_config())
        .clock(Arc::new(ManualClock::new(TEST_EPOCH_MS)))
        .router(router.clone())
        .work(Arc::new(FixedWorkDuration(Duration::ZERO)))
        .build()
        .expect("context");
    let engine = DispatchEngine::new(ctx.clone());
    let user = add_dispatcher(store.as_ref());
    let incident = add_incident(store.as_ref(), ServiceType::Fire, None, km_north(TEST_ORIGIN, 0.5), TEST_EPOCH_MS);
    let unit = add_unit(store.as_ref(), ServiceType::Fire, TEST_ORIGIN);

    engine
        .create_assignment(user.id, incident.id, unit.id)
        .await
        .expect("commit survives routing failure");
    drain(&ctx).await;

    assert!(!ctx.routes.has_route(unit.id));
    assert_eq!(ctx.telemetry.snapshot().route_failures, 1);
    assert!(store.find_active_assignment_by_unit(unit.id).expect("read").is_some());

    let err = engine.retry_route(unit.id).await.expect_err("still down");
    assert_eq!(err.kind(), ErrorKind::ExternalUnavailable);

    router.set_down(false);
    let waypoints = engine.retry_route(unit.id).await.expect("retry");
    assert_eq!(waypoints, Some(5));
    assert!(ctx.routes.has_route(unit.id));
}

#[tokio::test]
async fn retry_route_without_assignment_is_a_no_op() {
    let harness = TestHarness::new(fast_config());
    let engine = DispatchEngine::new(harness.ctx.clone());
    let unit = add_unit(harness.store.as_ref(), ServiceType::Fire, TEST_ORIGIN);

    assert_eq!(engine.retry_route(unit.id).await.expect("retry"), None);
    let err = engine.retry_route(UnitId(999)).await.expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
