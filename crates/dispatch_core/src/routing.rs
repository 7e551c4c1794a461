//! Pluggable route providers: trait abstraction for routing backends.
//!
//! Implementations, selectable via [`RouteProviderKind`]:
//!
//! - **`StraightLineRouteProvider`**: interpolates waypoints along the segment
//!   between start and destination. No external dependencies.
//! - **`OsrmRouteProvider`** (feature `osrm`): calls a local/remote OSRM HTTP endpoint.
//!
//! Providers are blocking; the dispatch systems call them from the blocking
//! task pool so a slow backend never stalls the tick.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spatial::{haversine_km, GeoPoint};

/// Average urban driving speed used to estimate straight-line durations.
const ESTIMATED_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route between {from:?} and {to:?}")]
    Unreachable { from: GeoPoint, to: GeoPoint },
    #[error("routing backend returned an empty route")]
    EmptyRoute,
    #[error("routing request failed: {0}")]
    Http(String),
    #[error("routing backend error: {0}")]
    Api(String),
}

/// Result of a route query: ordered waypoints from start to destination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub waypoints: Vec<GeoPoint>,
    /// Road-network distance in kilometres.
    pub distance_km: f64,
    /// Free-flow travel time in seconds.
    pub duration_secs: f64,
}

/// Which routing backend to use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteProviderKind {
    StraightLine { step_km: f64 },
    /// OSRM HTTP endpoint (e.g. `"http://router.project-osrm.org"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

impl Default for RouteProviderKind {
    fn default() -> Self {
        RouteProviderKind::StraightLine {
            step_km: StraightLineRouteProvider::DEFAULT_STEP_KM,
        }
    }
}

pub trait RouteProvider: Send + Sync {
    fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Route, RoutingError>;
}

// ---------------------------------------------------------------------------
// Straight-line provider (always available)
// ---------------------------------------------------------------------------

/// Walks the straight segment between the endpoints, one waypoint every
/// `step_km`. The destination is always the last waypoint.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouteProvider {
    step_km: f64,
}

impl StraightLineRouteProvider {
    pub const DEFAULT_STEP_KM: f64 = 0.1;

    pub fn new(step_km: f64) -> Self {
        Self {
            step_km: if step_km > 0.0 { step_km } else { Self::DEFAULT_STEP_KM },
        }
    }
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STEP_KM)
    }
}

impl RouteProvider for StraightLineRouteProvider {
    fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Route, RoutingError> {
        let distance_km = haversine_km(from, to);
        let steps = ((distance_km / self.step_km).ceil() as usize).max(1);
        let waypoints = (1..=steps)
            .map(|i| from.lerp(&to, i as f64 / steps as f64))
            .collect();
        Ok(Route {
            waypoints,
            distance_km,
            duration_secs: distance_km / ESTIMATED_SPEED_KMH * 3600.0,
        })
    }
}

// ---------------------------------------------------------------------------
// OSRM provider (behind `osrm` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "osrm")]
pub mod osrm {
    use super::*;
    use reqwest::blocking::Client;
    use std::time::Duration;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Routes via an OSRM HTTP endpoint.
    pub struct OsrmRouteProvider {
        client: Client,
        endpoint: String,
    }

    impl OsrmRouteProvider {
        pub fn new(endpoint: &str) -> Result<Self, RoutingError> {
            let client = Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|err| RoutingError::Http(err.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    /// Minimal OSRM JSON response structures.
    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        message: Option<String>,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        distance: f64, // metres
        duration: f64, // seconds
        geometry: OsrmGeometry,
    }

    #[derive(Deserialize)]
    struct OsrmGeometry {
        coordinates: Vec<Vec<f64>>, // [lon, lat]
    }

    impl RouteProvider for OsrmRouteProvider {
        fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Route, RoutingError> {
            let url = format!(
                "{}/route/v1/driving/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
                self.endpoint, from.lon, from.lat, to.lon, to.lat,
            );

            let resp: OsrmResponse = self
                .client
                .get(&url)
                .send()
                .and_then(|r| r.json())
                .map_err(|err| RoutingError::Http(err.to_string()))?;

            match resp.code.as_str() {
                "Ok" => {}
                "NoRoute" => return Err(RoutingError::Unreachable { from, to }),
                code => {
                    return Err(RoutingError::Api(format!(
                        "{code}: {}",
                        resp.message.unwrap_or_default()
                    )))
                }
            }

            let route = resp
                .routes
                .and_then(|routes| routes.into_iter().next())
                .ok_or(RoutingError::EmptyRoute)?;

            // OSRM returns [lon, lat]; waypoints are (lat, lon)
            let waypoints: Vec<GeoPoint> = route
                .geometry
                .coordinates
                .iter()
                .filter(|c| c.len() >= 2)
                .map(|c| GeoPoint::new(c[1], c[0]))
                .collect();
            if waypoints.is_empty() {
                return Err(RoutingError::EmptyRoute);
            }

            Ok(Route {
                waypoints,
                distance_km: route.distance / 1000.0,
                duration_secs: route.duration,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// Coordinates rounded to ~1 m so repeated requests between the same spots hit.
type RouteKey = (i64, i64, i64, i64);

fn route_key(from: GeoPoint, to: GeoPoint) -> RouteKey {
    let q = |v: f64| (v * 100_000.0).round() as i64;
    (q(from.lat), q(from.lon), q(to.lat), q(to.lon))
}

/// LRU-cached wrapper around any [`RouteProvider`].
///
/// On inner failure the optional straight-line fallback is tried before the
/// error is returned. Failures are never cached.
pub struct CachedRouteProvider {
    inner: Box<dyn RouteProvider>,
    cache: Mutex<LruCache<RouteKey, Route>>,
    fallback: Option<StraightLineRouteProvider>,
}

impl CachedRouteProvider {
    pub fn new(inner: Box<dyn RouteProvider>, capacity: usize, fallback_to_straight_line: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            fallback: fallback_to_straight_line.then(StraightLineRouteProvider::default),
        }
    }
}

impl RouteProvider for CachedRouteProvider {
    fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Route, RoutingError> {
        let key = route_key(from, to);

        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached.clone());
        }

        let result = match self.inner.route(from, to) {
            Ok(route) => Ok(route),
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %err, "route provider failed, using straight-line fallback");
                    fallback.route(from, to)
                }
                None => Err(err),
            },
        };

        if let Ok(route) = &result {
            self.cache.lock().put(key, route.clone());
        }
        result
    }
}

/// Default route cache capacity.
pub const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 20_000;

/// Construct a boxed [`RouteProvider`] from a [`RouteProviderKind`] descriptor.
///
/// Straight-line routing is returned uncached; OSRM is wrapped in a
/// [`CachedRouteProvider`] without fallback, so an unreachable backend leaves
/// the unit parked instead of driving through buildings.
pub fn build_route_provider(kind: &RouteProviderKind) -> Result<Box<dyn RouteProvider>, RoutingError> {
    match kind {
        RouteProviderKind::StraightLine { step_km } => {
            Ok(Box::new(StraightLineRouteProvider::new(*step_km)))
        }

        #[cfg(feature = "osrm")]
        RouteProviderKind::Osrm { endpoint } => {
            let inner = Box::new(osrm::OsrmRouteProvider::new(endpoint)?);
            Ok(Box::new(CachedRouteProvider::new(
                inner,
                DEFAULT_ROUTE_CACHE_CAPACITY,
                false,
            )))
        }
    }
}
