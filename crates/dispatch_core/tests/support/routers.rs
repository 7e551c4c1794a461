use std::sync::atomic::{AtomicBool, Ordering};

use dispatch_core::routing::{Route, RouteProvider, RoutingError, StraightLineRouteProvider};
use dispatch_core::spatial::GeoPoint;

/// Straight-line routing that can be switched off to simulate an outage.
#[derive(Debug, Default)]
pub struct SwitchableRouter {
    down: AtomicBool,
}

impl SwitchableRouter {
    pub fn down() -> Self {
        Self {
            down: AtomicBool::new(true),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl RouteProvider for SwitchableRouter {
    fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Route, RoutingError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RoutingError::Http("connection refused".into()));
        }
        StraightLineRouteProvider::default().route(from, to)
    }
}

/// Always returns exactly the given waypoints.
#[derive(Debug, Clone)]
pub struct FixedRouter(pub Vec<GeoPoint>);

impl RouteProvider for FixedRouter {
    fn route(&self, _from: GeoPoint, _to: GeoPoint) -> Result<Route, RoutingError> {
        Ok(Route {
            waypoints: self.0.clone(),
            distance_km: 0.0,
            duration_secs: 0.0,
        })
    }
}
