//! Escalation monitor: raises long-unassigned pending incidents to CRITICAL
//! so the matcher favors them. Never touches assignments or units.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::{publish, Topic};
use crate::clock::ONE_SEC_MS;
use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::model::{Incident, IncidentId, IncidentStatus, Notification, Severity};

const ONE_MIN_MS: u64 = 60 * ONE_SEC_MS;

/// PENDING and reported strictly longer than `threshold_ms` ago.
pub fn is_overdue(incident: &Incident, now_ms: u64, threshold_ms: u64) -> bool {
    incident.status == IncidentStatus::Pending && incident.age_ms(now_ms) > threshold_ms
}

/// Overdue incidents, oldest first. Read-only.
pub fn list_overdue(ctx: &DispatchContext) -> Result<Vec<Incident>, DispatchError> {
    let now = ctx.now_ms();
    let threshold = ctx.config.overdue_threshold_ms;
    let mut overdue: Vec<Incident> = ctx
        .store
        .find_incidents_by_status(IncidentStatus::Pending)?
        .into_iter()
        .filter(|incident| is_overdue(incident, now, threshold))
        .collect();
    overdue.sort_by_key(|incident| (incident.reported_at, incident.id));
    Ok(overdue)
}

pub fn notification_message(incident: &Incident, threshold_ms: u64) -> String {
    let window = if threshold_ms % ONE_MIN_MS == 0 {
        format!("{} mins", threshold_ms / ONE_MIN_MS)
    } else {
        format!("{} secs", threshold_ms / ONE_SEC_MS)
    };
    format!(
        "CRITICAL: Incident #{} ({}) is unassigned for > {}!",
        incident.id, incident.service, window
    )
}

/// Escalate every overdue, unassigned, non-critical incident. Each incident
/// is re-checked under its row lock and committed on its own; a failure on
/// one is logged and the scan continues.
pub fn escalate_overdue(ctx: &DispatchContext) -> Result<Vec<Incident>, DispatchError> {
    let mut escalated = Vec::new();
    for incident in list_overdue(ctx)? {
        if incident.severity == Some(Severity::MAX) {
            continue;
        }
        match escalate_one(ctx, incident.id) {
            Ok(Some(updated)) => escalated.push(updated),
            Ok(None) => {}
            Err(err) => warn!(incident_id = %incident.id, error = %err, "escalation failed"),
        }
    }
    Ok(escalated)
}

fn escalate_one(ctx: &DispatchContext, incident_id: IncidentId) -> Result<Option<Incident>, DispatchError> {
    let mut tx = ctx.store.begin()?;
    let mut incident = tx.lock_incident(incident_id)?;
    if !is_overdue(&incident, ctx.now_ms(), ctx.config.overdue_threshold_ms)
        || incident.severity == Some(Severity::MAX)
    {
        return Ok(None);
    }
    let assigned = tx
        .assignments_for_incident(incident_id)?
        .iter()
        .any(|assignment| assignment.active);
    if assigned {
        return Ok(None);
    }
    incident.severity = Some(Severity::MAX);
    tx.put_incident(incident.clone())?;
    tx.commit()?;
    Ok(Some(incident))
}

/// One monitor run: escalate, then publish each escalated incident and a
/// notification per user.
#[instrument(skip_all)]
pub async fn run_escalation_pass(ctx: &Arc<DispatchContext>) -> Result<Vec<Incident>, DispatchError> {
    let escalated = ctx.blocking(escalate_overdue).await?;
    if escalated.is_empty() {
        return Ok(escalated);
    }

    let users = ctx.store.all_users()?;
    let now = ctx.now_ms();
    let sink = ctx.broadcaster.as_ref();
    for incident in &escalated {
        ctx.telemetry.record_escalation();
        info!(incident_id = %incident.id, service = %incident.service, "incident escalated to CRITICAL");
        publish(sink, Topic::Incidents, incident);
        let message = notification_message(incident, ctx.config.overdue_threshold_ms);
        for user in &users {
            publish(
                sink,
                Topic::Notify,
                &Notification {
                    user_id: user.id,
                    incident_id: incident.id,
                    message: message.clone(),
                    created_at: now,
                },
            );
        }
    }
    Ok(escalated)
}

/// Periodic monitor loop. Runs a pass every escalation interval while
/// `enabled` is set, until `cancel` fires.
pub async fn run_escalation_monitor(
    ctx: Arc<DispatchContext>,
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(ctx.config.escalation_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = ctx.config.escalation_interval_ms, "escalation monitor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !enabled.load(Ordering::Acquire) {
                    continue;
                }
                match run_escalation_pass(&ctx).await {
                    Ok(escalated) if !escalated.is_empty() => {
                        debug!(count = escalated.len(), "escalation pass finished");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "escalation pass failed"),
                }
            }
        }
    }
    info!("escalation monitor stopped");
}
