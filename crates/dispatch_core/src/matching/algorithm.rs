use crate::model::Incident;

use super::priority::sort_by_priority;
use super::types::{Candidate, MatchResult};

/// Strategy for choosing which available unit responds to an incident.
///
/// Implementations only score candidates; the matcher owns ordering of
/// incidents, pool bookkeeping and committing the result.
pub trait MatchingAlgorithm: Send + Sync {
    /// Index into `candidates` of the unit to send to `incident`, or `None`
    /// when no candidate lies within `radius_km`.
    fn select(&self, incident: &Incident, candidates: &[Candidate], radius_km: f64)
        -> Option<usize>;

    /// Greedy plan for one service type: incidents in priority order, each
    /// takes its selected unit out of the pool. No unit appears twice.
    ///
    /// Offline planning over a fixed pool with nothing committed. The live
    /// pass in [`crate::systems::matcher`] makes the same picks but commits
    /// each one and falls through to the next candidate on conflict, so with
    /// no competing writers both produce the same pairs.
    fn plan(
        &self,
        incidents: &[Incident],
        candidates: &[Candidate],
        radius_km: f64,
    ) -> Vec<MatchResult> {
        let mut ordered = incidents.to_vec();
        sort_by_priority(&mut ordered);
        let mut pool = candidates.to_vec();
        let mut results = Vec::new();
        for incident in &ordered {
            if pool.is_empty() {
                break;
            }
            if let Some(index) = self.select(incident, &pool, radius_km) {
                let unit = pool.swap_remove(index);
                results.push(MatchResult {
                    incident_id: incident.id,
                    unit_id: unit.unit_id,
                    distance_km: unit.position.distance_km(&incident.position),
                });
            }
        }
        results
    }
}
