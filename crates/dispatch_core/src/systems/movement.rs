//! Movement advancer: moves every routed unit up to `speed_factor`
//! waypoints per tick.

use std::sync::Arc;

use tracing::trace;

use crate::context::DispatchContext;
use crate::model::UnitId;

use super::arrival::handle_arrival;

/// Advance all routes by one tick and record the new positions in the fast
/// location store. Units whose route ran out are handed to the arrival
/// handler on the task tracker and returned.
///
/// Only the fast location store is written here.
pub fn advance_movement(ctx: &Arc<DispatchContext>) -> Vec<UnitId> {
    let now = ctx.now_ms();
    let mut arrived = Vec::new();
    for step in ctx.routes.advance_all(ctx.config.speed_factor) {
        ctx.locations.put(step.unit_id, step.position, now);
        trace!(unit_id = %step.unit_id, lat = step.position.lat, lon = step.position.lon, "moved");
        if step.arrived {
            ctx.telemetry.record_arrival();
            ctx.spawn(handle_arrival(Arc::clone(ctx), step.unit_id, step.incident_id));
            arrived.push(step.unit_id);
        }
    }
    arrived
}
