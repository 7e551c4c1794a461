//! Matcher: pairs pending incidents with the nearest available unit of the
//! same service type.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::context::DispatchContext;
use crate::error::{DispatchError, ErrorKind};
use crate::location::LocationRecord;
use crate::matching::{sort_by_priority, Candidate};
use crate::model::{Assignment, Incident, IncidentStatus, ServiceType, Unit, UnitId};
use crate::store::EntityRef;

use super::assignment::create_assignment;

/// Pending incidents and available units of one service type.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub incidents: Vec<Incident>,
    pub candidates: Vec<Candidate>,
}

/// Position each unit at its fast location when one exists and is fresh,
/// otherwise at its stored position.
pub fn overlay_positions(
    units: &[Unit],
    snapshot: &HashMap<UnitId, LocationRecord>,
    now_ms: u64,
    max_age_ms: Option<u64>,
) -> Vec<(ServiceType, Candidate)> {
    units
        .iter()
        .map(|unit| {
            let position = snapshot
                .get(&unit.id)
                .filter(|record| !record.is_stale(now_ms, max_age_ms))
                .map(|record| record.point())
                .unwrap_or(unit.position);
            (
                unit.service,
                Candidate {
                    unit_id: unit.id,
                    position,
                },
            )
        })
        .collect()
}

/// Split incidents and candidates by service type. Types lacking either
/// side are omitted.
pub fn partition_by_service(
    incidents: Vec<Incident>,
    candidates: Vec<(ServiceType, Candidate)>,
) -> HashMap<ServiceType, Partition> {
    let mut partitions: HashMap<ServiceType, Partition> = HashMap::new();
    for incident in incidents {
        partitions
            .entry(incident.service)
            .or_default()
            .incidents
            .push(incident);
    }
    for (service, candidate) in candidates {
        if let Some(partition) = partitions.get_mut(&service) {
            partition.candidates.push(candidate);
        }
    }
    partitions.retain(|_, partition| !partition.candidates.is_empty());
    partitions
}

/// One matching pass over every service type. Returns the assignments made.
///
/// Per-type passes run concurrently, bounded by the context's worker permits;
/// they draw from disjoint unit pools.
pub async fn run_matching_pass(ctx: &Arc<DispatchContext>) -> Result<Vec<Assignment>, DispatchError> {
    let (incidents, units) = ctx
        .blocking(|ctx| {
            Ok((
                ctx.store.find_incidents_by_status(IncidentStatus::Pending)?,
                ctx.store.find_available_units()?,
            ))
        })
        .await?;
    if incidents.is_empty() || units.is_empty() {
        return Ok(Vec::new());
    }

    let snapshot = ctx.locations.get_all();
    let candidates = overlay_positions(&units, &snapshot, ctx.now_ms(), ctx.config.location_max_age_ms);
    let partitions = partition_by_service(incidents, candidates);

    let mut passes = JoinSet::new();
    for (service, partition) in partitions {
        let ctx = Arc::clone(ctx);
        let permits = Arc::clone(&ctx.match_permits);
        passes.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Vec::new();
            };
            match_service(&ctx, service, partition).await
        });
    }

    let mut assignments = Vec::new();
    while let Some(result) = passes.join_next().await {
        match result {
            Ok(made) => assignments.extend(made),
            Err(err) => error!(error = %err, "matching pass panicked"),
        }
    }
    Ok(assignments)
}

/// Greedy pass for one service type: incidents in priority order each take
/// the nearest remaining unit within the dispatch radius. A unit leaves the
/// pool once chosen; if its commit loses a race the incident tries the next
/// nearest unit.
async fn match_service(
    ctx: &Arc<DispatchContext>,
    service: ServiceType,
    mut partition: Partition,
) -> Vec<Assignment> {
    sort_by_priority(&mut partition.incidents);
    let radius_km = ctx.config.dispatch_radius_km;
    let user_id = ctx.config.dispatcher_user_id;
    let mut pool = partition.candidates;
    let mut made = Vec::new();

    for incident in &partition.incidents {
        while !pool.is_empty() {
            let Some(index) = ctx.matching.select(incident, &pool, radius_km) else {
                debug!(%service, incident_id = %incident.id, "no unit within radius");
                break;
            };
            let unit = pool.swap_remove(index);
            match create_assignment(ctx, user_id, incident.id, unit.unit_id).await {
                Ok(assignment) => {
                    made.push(assignment);
                    break;
                }
                Err(DispatchError::NotFound(EntityRef::Unit(_))) => continue,
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    ctx.telemetry.record_conflict();
                    debug!(%service, incident_id = %incident.id, unit_id = %unit.unit_id, "unit taken, trying next");
                }
                Err(err) => {
                    warn!(%service, incident_id = %incident.id, unit_id = %unit.unit_id, error = %err, "assignment failed");
                    break;
                }
            }
        }
        if pool.is_empty() {
            break;
        }
    }
    made
}
