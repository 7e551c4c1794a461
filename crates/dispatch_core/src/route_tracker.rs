//! Remaining waypoints of every unit's current trip.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::model::{IncidentId, UnitId};
use crate::spatial::GeoPoint;

/// Outcome of advancing one unit's route by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStep {
    pub unit_id: UnitId,
    /// Incident the route was fetched for, if any.
    pub incident_id: Option<IncidentId>,
    /// Last waypoint consumed this tick.
    pub position: GeoPoint,
    /// The route is now exhausted.
    pub arrived: bool,
}

#[derive(Debug)]
struct Trip {
    incident_id: Option<IncidentId>,
    waypoints: VecDeque<GeoPoint>,
}

#[derive(Debug, Default)]
pub struct RouteTracker {
    routes: DashMap<UnitId, Trip>,
}

impl RouteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route that is not bound to any incident, replacing any
    /// route the unit already had. Empty routes are ignored.
    pub fn install(&self, unit_id: UnitId, waypoints: Vec<GeoPoint>) -> bool {
        self.insert(unit_id, None, waypoints)
    }

    /// Install a route towards `incident_id`. Its arrival only counts for
    /// that incident.
    pub fn install_for(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
        waypoints: Vec<GeoPoint>,
    ) -> bool {
        self.insert(unit_id, Some(incident_id), waypoints)
    }

    fn insert(
        &self,
        unit_id: UnitId,
        incident_id: Option<IncidentId>,
        waypoints: Vec<GeoPoint>,
    ) -> bool {
        if waypoints.is_empty() {
            return false;
        }
        self.routes.insert(
            unit_id,
            Trip {
                incident_id,
                waypoints: waypoints.into(),
            },
        );
        true
    }

    pub fn remaining(&self, unit_id: UnitId) -> Option<usize> {
        self.routes.get(&unit_id).map(|trip| trip.waypoints.len())
    }

    /// Incident the unit's current route leads to.
    pub fn destination_of(&self, unit_id: UnitId) -> Option<IncidentId> {
        self.routes.get(&unit_id).and_then(|trip| trip.incident_id)
    }

    pub fn has_route(&self, unit_id: UnitId) -> bool {
        self.routes.contains_key(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn remove(&self, unit_id: UnitId) -> Option<Vec<GeoPoint>> {
        self.routes
            .remove(&unit_id)
            .map(|(_, trip)| trip.waypoints.into_iter().collect())
    }

    /// Consume up to `max_steps` waypoints from every route. Routes that run
    /// out are removed and reported with `arrived = true`.
    pub fn advance_all(&self, max_steps: usize) -> Vec<RouteStep> {
        let max_steps = max_steps.max(1);
        let mut steps = Vec::with_capacity(self.routes.len());
        for mut entry in self.routes.iter_mut() {
            let unit_id = *entry.key();
            let trip = entry.value_mut();
            let mut last = None;
            for _ in 0..max_steps {
                match trip.waypoints.pop_front() {
                    Some(point) => last = Some(point),
                    None => break,
                }
            }
            if let Some(position) = last {
                steps.push(RouteStep {
                    unit_id,
                    incident_id: trip.incident_id,
                    position,
                    arrived: trip.waypoints.is_empty(),
                });
            }
        }

        for step in steps.iter().filter(|step| step.arrived) {
            // A replacement route may have been installed since the walk above.
            self.routes
                .remove_if(&step.unit_id, |_, trip| trip.waypoints.is_empty());
        }
        steps
    }
}
