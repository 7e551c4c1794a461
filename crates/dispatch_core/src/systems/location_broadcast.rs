//! Periodic snapshot of every unit's fast location, published as one batch.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcast::{publish, Topic};
use crate::context::DispatchContext;
use crate::model::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnitLocation {
    pub unit_id: UnitId,
    pub lat: f64,
    pub lon: f64,
    pub updated_at: u64,
}

/// Publish the current snapshot, ordered by unit id. Nothing is published
/// when the store is empty. Returns the number of entries sent.
pub fn broadcast_locations(ctx: &DispatchContext) -> usize {
    let mut batch: Vec<UnitLocation> = ctx
        .locations
        .get_all()
        .into_iter()
        .map(|(unit_id, record)| UnitLocation {
            unit_id,
            lat: record.lat,
            lon: record.lon,
            updated_at: record.updated_at,
        })
        .collect();
    if batch.is_empty() {
        return 0;
    }
    batch.sort_by_key(|location| location.unit_id);
    publish(ctx.broadcaster.as_ref(), Topic::UnitLocationBatch, &batch);
    batch.len()
}

pub async fn run_location_broadcaster(ctx: Arc<DispatchContext>, cancel: CancellationToken) {
    let mut ticker = interval(ctx.config.location_broadcast_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms = ctx.config.location_broadcast_interval_ms, "location broadcaster started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                broadcast_locations(&ctx);
            }
        }
    }
    info!("location broadcaster stopped");
}
