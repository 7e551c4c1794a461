//! Assignment committer: binds a unit to an incident, then fetches its route.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::{publish, Topic};
use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::model::{
    Assignment, Availability, Incident, IncidentId, IncidentStatus, NewAssignment, ServiceType,
    Unit, UnitId, UserId,
};
use crate::routing::RoutingError;
use crate::spatial::GeoPoint;

use super::retry::retry_on_contention;

/// Rows written by a successful commit.
#[derive(Debug, Clone)]
pub struct CommittedAssignment {
    pub assignment: Assignment,
    pub incident: Incident,
    pub unit: Unit,
}

#[derive(Debug, Serialize)]
struct RoutePayload<'a> {
    unit_id: UnitId,
    incident_type: ServiceType,
    path: &'a [GeoPoint],
}

/// Commit an assignment and start fetching the unit's route.
///
/// Contention is retried per the configured policy; `NotFound` and
/// `Conflict` return at once. Updates are published only after the commit,
/// and the route is fetched in the background: a routing failure leaves the
/// assignment committed and the unit parked.
#[instrument(skip_all, fields(%user_id, %incident_id, %unit_id))]
pub async fn create_assignment(
    ctx: &Arc<DispatchContext>,
    user_id: UserId,
    incident_id: IncidentId,
    unit_id: UnitId,
) -> Result<Assignment, DispatchError> {
    let committed = retry_on_contention(ctx, "create_assignment", move |ctx| {
        commit_assignment(ctx, user_id, incident_id, unit_id)
    })
    .await?;

    ctx.telemetry.record_assignment();
    info!(assignment_id = %committed.assignment.id, "assignment committed");

    let sink = ctx.broadcaster.as_ref();
    publish(sink, Topic::Incidents, &committed.incident);
    publish(sink, Topic::Units, &committed.unit);
    publish(sink, Topic::Assignments, &committed.assignment);

    spawn_route_fetch(ctx, &committed.unit, &committed.incident);
    Ok(committed.assignment)
}

/// One commit attempt. Locks incident, unit, then user.
///
/// Whatever route the unit still had belongs to an earlier trip and is
/// dropped while the unit row is held; the new route is installed by the
/// follow-up fetch.
pub fn commit_assignment(
    ctx: &DispatchContext,
    user_id: UserId,
    incident_id: IncidentId,
    unit_id: UnitId,
) -> Result<CommittedAssignment, DispatchError> {
    let mut tx = ctx.store.begin()?;
    let mut incident = tx.lock_incident(incident_id)?;
    let mut unit = tx.lock_unit(unit_id)?;
    tx.lock_user(user_id)?;

    if let Some(existing) = tx.active_assignments_for_unit(unit_id)?.first() {
        return Err(DispatchError::Conflict {
            unit_id,
            existing: existing.id,
        });
    }

    if incident.status == IncidentStatus::Pending {
        incident.status = IncidentStatus::Dispatched;
        tx.put_incident(incident.clone())?;
    }
    unit.availability = Availability::Busy;
    tx.put_unit(unit.clone())?;
    let assignment = tx.insert_assignment(NewAssignment {
        incident_id,
        unit_id,
        user_id,
        assigned_at: ctx.now_ms(),
    })?;
    if ctx.routes.remove(unit_id).is_some() {
        debug!(%unit_id, "dropped route of previous trip");
    }
    tx.commit()?;

    Ok(CommittedAssignment {
        assignment,
        incident,
        unit,
    })
}

/// Fetch and install a route from the unit's freshest position to the
/// incident on the context's task tracker.
pub fn spawn_route_fetch(ctx: &Arc<DispatchContext>, unit: &Unit, incident: &Incident) {
    let ctx_task = Arc::clone(ctx);
    let unit_id = unit.id;
    let fallback = unit.position;
    let incident = incident.clone();
    ctx.spawn(async move {
        match fetch_route(&ctx_task, unit_id, fallback, &incident).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!(%unit_id, incident_id = %incident.id, "assignment superseded, route discarded"),
            Err(err) => {
                ctx_task.telemetry.record_route_failure();
                warn!(%unit_id, error = %err, "route unavailable, unit stays parked");
            }
        }
    });
}

/// Request a route to `incident` and install it in the tracker. Returns the
/// number of waypoints installed, or `None` when the unit is no longer
/// assigned to the incident by the time the route arrives.
pub async fn fetch_route(
    ctx: &Arc<DispatchContext>,
    unit_id: UnitId,
    fallback_start: GeoPoint,
    incident: &Incident,
) -> Result<Option<usize>, DispatchError> {
    let start = ctx
        .locations
        .get(unit_id)
        .map(|record| record.point())
        .unwrap_or(fallback_start);
    let destination = incident.position;
    let router = Arc::clone(&ctx.router);
    let route = tokio::task::spawn_blocking(move || router.route(start, destination)).await??;

    if route.waypoints.is_empty() {
        return Err(RoutingError::EmptyRoute.into());
    }
    let incident_id = incident.id;
    let waypoints = route.waypoints.clone();
    let installed = retry_on_contention(ctx, "install_route", move |ctx| {
        install_if_current(ctx, unit_id, incident_id, waypoints.clone())
    })
    .await?;
    if !installed {
        return Ok(None);
    }

    let count = route.waypoints.len();
    publish(
        ctx.broadcaster.as_ref(),
        Topic::UnitRoute,
        &RoutePayload {
            unit_id,
            incident_type: incident.service,
            path: &route.waypoints,
        },
    );
    ctx.telemetry.record_route_installed();
    debug!(%unit_id, waypoints = count, distance_km = route.distance_km, "route installed");
    Ok(Some(count))
}

/// Install the route under the unit's row lock, only while the unit's active
/// assignment is still for `incident_id`.
fn install_if_current(
    ctx: &DispatchContext,
    unit_id: UnitId,
    incident_id: IncidentId,
    waypoints: Vec<GeoPoint>,
) -> Result<bool, DispatchError> {
    let mut tx = ctx.store.begin()?;
    tx.lock_unit(unit_id)?;
    let current = tx
        .active_assignments_for_unit(unit_id)?
        .iter()
        .any(|assignment| assignment.incident_id == incident_id);
    if current {
        ctx.routes.install_for(unit_id, incident_id, waypoints);
    }
    tx.commit()?;
    Ok(current)
}
