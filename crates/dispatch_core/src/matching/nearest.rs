use crate::model::Incident;

use super::algorithm::MatchingAlgorithm;
use super::types::Candidate;

/// Nearest unit by great-circle distance, capped at the dispatch radius.
///
/// Ties on distance go to the lower unit id so repeated passes over the
/// same state pick the same unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestUnitMatching;

impl MatchingAlgorithm for NearestUnitMatching {
    fn select(
        &self,
        incident: &Incident,
        candidates: &[Candidate],
        radius_km: f64,
    ) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| (index, candidate, candidate.position.distance_km(&incident.position)))
            .filter(|(_, _, distance)| *distance <= radius_km)
            .min_by(|(_, a, da), (_, b, db)| {
                da.total_cmp(db).then(a.unit_id.cmp(&b.unit_id))
            })
            .map(|(index, _, _)| index)
    }
}
