//! Control surface over the dispatch loop and its background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::context::DispatchContext;
use crate::error::DispatchError;
use crate::model::{Assignment, Incident, IncidentId, UnitId, UserId};
use crate::runner::{DispatchLoop, TaskSlot};
use crate::store::EntityRef;
use crate::systems::assignment::{self, fetch_route};
use crate::systems::completion::{self, CompletedIncident};
use crate::systems::escalation::{self, run_escalation_monitor};
use crate::systems::location_broadcast::run_location_broadcaster;
use crate::telemetry::TelemetrySnapshot;

pub struct DispatchEngine {
    ctx: Arc<DispatchContext>,
    dispatch: DispatchLoop,
    escalation: TaskSlot,
    escalation_enabled: Arc<AtomicBool>,
    location_broadcast: TaskSlot,
}

impl DispatchEngine {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        let escalation_enabled = Arc::new(AtomicBool::new(ctx.config.escalation_enabled));
        Self {
            dispatch: DispatchLoop::new(Arc::clone(&ctx)),
            escalation: TaskSlot::new("escalation-monitor"),
            escalation_enabled,
            location_broadcast: TaskSlot::new("location-broadcast"),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    /// Start ticking. No-op if already running.
    pub fn start_dispatch(&self) -> bool {
        self.dispatch.start()
    }

    /// Stop ticking. In-flight arrival, completion and route tasks keep
    /// running; see [`Self::shutdown`] to wait for them.
    pub async fn stop_dispatch(&self) -> bool {
        self.dispatch.stop().await
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatch.is_running()
    }

    /// Spawn the periodic escalation task. Whether a run escalates anything
    /// is controlled by [`Self::enable_escalation_monitor`] and
    /// [`Self::disable_escalation_monitor`].
    pub fn start_escalation_monitor(&self) -> bool {
        let ctx = Arc::clone(&self.ctx);
        let enabled = Arc::clone(&self.escalation_enabled);
        self.escalation
            .start(move |cancel| run_escalation_monitor(ctx, enabled, cancel))
    }

    pub fn enable_escalation_monitor(&self) {
        self.escalation_enabled.store(true, Ordering::Release);
        info!("escalation monitor enabled");
    }

    pub fn disable_escalation_monitor(&self) {
        self.escalation_enabled.store(false, Ordering::Release);
        info!("escalation monitor disabled");
    }

    pub fn is_escalation_enabled(&self) -> bool {
        self.escalation_enabled.load(Ordering::Acquire)
    }

    /// Run one escalation pass now, if the monitor is enabled.
    pub async fn escalate_now(&self) -> Result<Vec<Incident>, DispatchError> {
        if !self.is_escalation_enabled() {
            return Ok(Vec::new());
        }
        escalation::run_escalation_pass(&self.ctx).await
    }

    pub fn start_location_broadcast(&self) -> bool {
        let ctx = Arc::clone(&self.ctx);
        self.location_broadcast
            .start(move |cancel| run_location_broadcaster(ctx, cancel))
    }

    pub async fn create_assignment(
        &self,
        user_id: UserId,
        incident_id: IncidentId,
        unit_id: UnitId,
    ) -> Result<Assignment, DispatchError> {
        assignment::create_assignment(&self.ctx, user_id, incident_id, unit_id).await
    }

    /// Pending incidents past the overdue threshold. Read-only.
    pub fn list_overdue_incidents(&self) -> Result<Vec<Incident>, DispatchError> {
        escalation::list_overdue(&self.ctx)
    }

    /// Re-request the route of a unit whose active assignment has none, e.g.
    /// after the routing backend was unavailable. Returns the waypoint count,
    /// or `None` when the unit has no active assignment.
    pub async fn retry_route(&self, unit_id: UnitId) -> Result<Option<usize>, DispatchError> {
        let store = &self.ctx.store;
        let unit = store
            .find_unit(unit_id)?
            .ok_or(DispatchError::NotFound(EntityRef::Unit(unit_id)))?;
        let Some(active) = store.find_active_assignment_by_unit(unit_id)? else {
            return Ok(None);
        };
        let incident = store
            .find_incident(active.incident_id)?
            .ok_or(DispatchError::NotFound(EntityRef::Incident(active.incident_id)))?;
        fetch_route(&self.ctx, unit_id, unit.position, &incident).await
    }

    /// Complete an incident immediately, skipping simulated work.
    pub async fn complete_incident(
        &self,
        incident_id: IncidentId,
    ) -> Result<Option<CompletedIncident>, DispatchError> {
        completion::complete_incident(&self.ctx, incident_id).await
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.ctx.telemetry.snapshot()
    }

    /// Stop the loop and the periodic tasks, then wait for every in-flight
    /// arrival, completion and route task to finish.
    pub async fn shutdown(&self) {
        self.dispatch.stop().await;
        self.escalation.stop().await;
        self.location_broadcast.stop().await;

        let tasks = &self.ctx.tasks;
        info!(pending = tasks.len(), "draining background tasks");
        tasks.close();
        tasks.wait().await;
        tasks.reopen();
        info!("dispatch engine shut down");
    }
}
