//! Incident ordering for a matching pass.

use std::cmp::Ordering;

use crate::model::Incident;

/// Severity weight descending, then oldest report first. Incident id breaks
/// any remaining tie so the order is total.
pub fn by_priority(a: &Incident, b: &Incident) -> Ordering {
    b.severity_weight()
        .cmp(&a.severity_weight())
        .then(a.reported_at.cmp(&b.reported_at))
        .then(a.id.cmp(&b.id))
}

pub fn sort_by_priority(incidents: &mut [Incident]) {
    incidents.sort_by(by_priority);
}
