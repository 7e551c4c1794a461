//! Test helpers for common test setup and utilities.
//!
//! Shared fixtures for unit tests, integration tests and benches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::ChannelBroadcaster;
use crate::clock::ManualClock;
use crate::config::DispatchConfig;
use crate::context::DispatchContext;
use crate::distributions::FixedWorkDuration;
use crate::model::{
    Availability, Incident, NewIncident, NewUnit, ServiceType, Severity, Unit, UnitId, User,
    UserRole,
};
use crate::routing::StraightLineRouteProvider;
use crate::spatial::GeoPoint;
use crate::store::{DispatchStore, InMemoryStore};

/// Central Las Vegas; every fixture is placed relative to it.
pub const TEST_ORIGIN: GeoPoint = GeoPoint::new(36.1147, -115.1728);

/// Clock start for fixtures, far enough from zero that "reported N seconds
/// ago" never underflows.
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

/// A point `km` kilometres due north of `origin`.
pub fn km_north(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + km / 111.195, origin.lon)
}

/// Config with short periods and no simulated work delay, for fast tests.
pub fn fast_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_tick_interval(Duration::from_millis(20))
        .with_commit_retry(3, Duration::from_millis(5))
        .with_work_duration(Duration::ZERO, Duration::ZERO)
        .with_escalation(Duration::from_millis(20), Duration::from_secs(120))
        .with_location_broadcast_interval(Duration::from_millis(20))
        .with_seed(42)
}

/// A context over an in-memory store with a manual clock and a channel
/// broadcaster that tests can subscribe to.
pub struct TestHarness {
    pub ctx: Arc<DispatchContext>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub broadcaster: Arc<ChannelBroadcaster>,
}

impl TestHarness {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: DispatchConfig, store: Arc<InMemoryStore>) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let broadcaster = Arc::new(ChannelBroadcaster::new(4096));
        let ctx = DispatchContext::builder(store.clone())
            .config(config)
            .clock(clock.clone())
            .broadcaster(broadcaster.clone())
            .router(Arc::new(StraightLineRouteProvider::default()))
            .work(Arc::new(FixedWorkDuration(Duration::ZERO)))
            .build()
            .expect("test context should build");
        Self {
            ctx,
            store,
            clock,
            broadcaster,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.ctx.now_ms()
    }
}

pub fn add_dispatcher(store: &dyn DispatchStore) -> User {
    store
        .insert_user("dispatcher", UserRole::Dispatcher)
        .expect("insert user")
}

pub fn add_unit(store: &dyn DispatchStore, service: ServiceType, position: GeoPoint) -> Unit {
    store
        .insert_unit(NewUnit {
            service,
            position,
            capacity: 2,
        })
        .expect("insert unit")
}

pub fn add_incident(
    store: &dyn DispatchStore,
    service: ServiceType,
    severity: Option<Severity>,
    position: GeoPoint,
    reported_at: u64,
) -> Incident {
    store
        .insert_incident(NewIncident {
            service,
            position,
            severity,
            reported_at,
            needs: 1,
        })
        .expect("insert incident")
}

/// A unit has at most one active assignment, and is busy exactly when it
/// has one.
///
/// # Panics
///
/// Panics with a description of the first violation found.
pub fn assert_single_active_assignment_per_unit(store: &dyn DispatchStore) {
    let mut active: HashMap<UnitId, usize> = HashMap::new();
    for assignment in store.all_assignments().expect("assignments") {
        if assignment.active {
            *active.entry(assignment.unit_id).or_default() += 1;
        }
    }
    for (unit_id, count) in &active {
        assert!(*count <= 1, "unit {unit_id} has {count} active assignments");
    }
    for unit in store.all_units().expect("units") {
        let busy = unit.availability == Availability::Busy;
        let assigned = active.contains_key(&unit.id);
        assert_eq!(
            busy, assigned,
            "unit {} busy={busy} but has active assignment={assigned}",
            unit.id
        );
    }
}
