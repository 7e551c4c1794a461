//! Arrival handler: runs once a unit's route is exhausted.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::broadcast::{publish, Topic};
use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::model::{IncidentId, Unit, UnitId};

use super::completion::complete_after_work;

#[derive(Debug, Clone)]
pub struct ArrivalOutcome {
    pub unit: Unit,
    /// Incident the unit is now on scene of: its active assignment, when the
    /// finished route was fetched for that same incident.
    pub incident_id: Option<IncidentId>,
}

/// Fold the unit's last fast location into its stored position and, when it
/// reached the incident of its active assignment, start the on-scene work
/// that completes the incident. Otherwise the unit is left parked.
///
/// `route_incident` is the incident the finished route was fetched for.
#[instrument(skip_all, fields(%unit_id))]
pub async fn handle_arrival(
    ctx: Arc<DispatchContext>,
    unit_id: UnitId,
    route_incident: Option<IncidentId>,
) {
    let outcome = match ctx
        .blocking(move |ctx| reconcile_arrival(ctx, unit_id, route_incident))
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "arrival handling failed");
            return;
        }
    };

    publish(ctx.broadcaster.as_ref(), Topic::Units, &outcome.unit);
    match outcome.incident_id {
        Some(incident_id) => {
            debug!(%incident_id, "unit on scene");
            ctx.spawn(complete_after_work(Arc::clone(&ctx), incident_id));
        }
        None => debug!("not on scene of an active assignment, unit parked"),
    }
}

pub fn reconcile_arrival(
    ctx: &DispatchContext,
    unit_id: UnitId,
    route_incident: Option<IncidentId>,
) -> Result<ArrivalOutcome, DispatchError> {
    let mut tx = ctx.store.begin()?;
    let mut unit = tx.lock_unit(unit_id)?;
    if let Some(record) = ctx.locations.get(unit_id) {
        unit.position = record.point();
        tx.put_unit(unit.clone())?;
    }
    // a route left over from an earlier trip never completes the current one
    let incident_id = tx
        .active_assignments_for_unit(unit_id)?
        .first()
        .map(|assignment| assignment.incident_id)
        .filter(|active| Some(*active) == route_incident);
    tx.commit()?;
    Ok(ArrivalOutcome { unit, incident_id })
}
