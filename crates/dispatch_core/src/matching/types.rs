use crate::model::{IncidentId, UnitId};
use crate::spatial::GeoPoint;

/// An available unit as seen by the matcher, positioned at its freshest
/// known location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub unit_id: UnitId,
    pub position: GeoPoint,
}

/// One planned incident-to-unit pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub incident_id: IncidentId,
    pub unit_id: UnitId,
    pub distance_km: f64,
}
