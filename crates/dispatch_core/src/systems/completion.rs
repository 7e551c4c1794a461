//! Completion handler: closes an incident's active assignments and frees
//! the units.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::{publish, Topic};
use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::model::{Assignment, Availability, Incident, IncidentId, IncidentStatus, Unit};
use crate::telemetry::CompletedAssignmentRecord;

use super::retry::retry_on_contention;

#[derive(Debug, Clone)]
pub struct CompletedIncident {
    pub incident: Incident,
    pub closed: Vec<Assignment>,
    pub freed: Vec<Unit>,
}

/// Simulated on-scene work followed by completion. Failures are logged.
pub async fn complete_after_work(ctx: Arc<DispatchContext>, incident_id: IncidentId) {
    let work = ctx.work.sample();
    debug!(%incident_id, ?work, "on-scene work started");
    sleep(work).await;
    if let Err(err) = complete_incident(&ctx, incident_id).await {
        warn!(%incident_id, error = %err, "failed to complete incident");
    }
}

/// Close every active assignment of the incident, free their units and mark
/// the incident COMPLETED.
///
/// Returns `None` when the incident has no active assignment left, which is
/// the case when a concurrent path already completed it. Nothing is written
/// or published then.
#[instrument(skip_all, fields(%incident_id))]
pub async fn complete_incident(
    ctx: &Arc<DispatchContext>,
    incident_id: IncidentId,
) -> Result<Option<CompletedIncident>, DispatchError> {
    let completed = retry_on_contention(ctx, "complete_incident", move |ctx| {
        commit_completion(ctx, incident_id)
    })
    .await?;

    let Some(completed) = completed else {
        debug!("no active assignments, nothing to complete");
        return Ok(None);
    };

    let records = completed
        .closed
        .iter()
        .filter_map(|assignment| {
            CompletedAssignmentRecord::from_assignment(
                assignment,
                completed.incident.service,
                completed.incident.reported_at,
            )
        })
        .collect();
    ctx.telemetry.record_completion(records);
    info!(closed = completed.closed.len(), "incident completed");

    let sink = ctx.broadcaster.as_ref();
    publish(sink, Topic::Incidents, &completed.incident);
    for assignment in &completed.closed {
        publish(sink, Topic::AssignmentComplete, assignment);
    }
    for unit in &completed.freed {
        publish(sink, Topic::Units, unit);
    }
    Ok(Some(completed))
}

/// Locks the incident, then its assigned units in ascending id order. Freed
/// units lose any route they were still driving.
pub fn commit_completion(
    ctx: &DispatchContext,
    incident_id: IncidentId,
) -> Result<Option<CompletedIncident>, DispatchError> {
    let now = ctx.now_ms();
    let mut tx = ctx.store.begin()?;
    let mut incident = tx.lock_incident(incident_id)?;

    let mut active: Vec<Assignment> = tx
        .assignments_for_incident(incident_id)?
        .into_iter()
        .filter(|assignment| assignment.active)
        .collect();
    if active.is_empty() {
        return Ok(None);
    }
    active.sort_by_key(|assignment| assignment.unit_id);

    let mut freed = Vec::with_capacity(active.len());
    for assignment in &mut active {
        let mut unit = tx.lock_unit(assignment.unit_id)?;
        assignment.active = false;
        assignment.resolved_at = Some(now);
        tx.put_assignment(assignment.clone())?;
        unit.availability = Availability::Available;
        tx.put_unit(unit.clone())?;
        freed.push(unit);
    }
    // every row is held; units still en route stop where they are
    for unit in &freed {
        ctx.routes.remove(unit.id);
    }
    incident.status = IncidentStatus::Completed;
    tx.put_incident(incident.clone())?;
    tx.commit()?;

    Ok(Some(CompletedIncident {
        incident,
        closed: active,
        freed,
    }))
}
