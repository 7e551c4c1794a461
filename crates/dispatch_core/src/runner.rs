//! Dispatch loop driver and the supervised background tasks around it.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::DispatchContext;
use crate::model::{AssignmentId, UnitId};
use crate::systems::matcher::run_matching_pass;
use crate::systems::movement::advance_movement;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub moved: usize,
    pub arrived: Vec<UnitId>,
    pub assigned: Vec<AssignmentId>,
}

/// One tick: movement, then matching. Matching failures are logged; a tick
/// never fails.
pub async fn tick(ctx: &Arc<DispatchContext>) -> TickSummary {
    ctx.telemetry.record_tick();
    let moved = ctx.routes.len();
    let arrived = advance_movement(ctx);
    let assigned = match run_matching_pass(ctx).await {
        Ok(assignments) => assignments.into_iter().map(|a| a.id).collect(),
        Err(err) => {
            warn!(error = %err, "matching pass failed");
            Vec::new()
        }
    };
    TickSummary {
        moved,
        arrived,
        assigned,
    }
}

/// A cancellable task with join-on-stop.
struct Supervised {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Supervised {
    async fn shutdown(self, name: &'static str) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!(task = name, error = %err, "task ended abnormally");
        }
    }
}

/// Start/stop wrapper around a long-running task. `start` is a no-op while
/// the task is running.
pub struct TaskSlot {
    name: &'static str,
    running: Mutex<Option<Supervised>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawn `task` with a fresh cancellation token unless already running.
    /// Returns whether a task was started.
    pub fn start<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            debug!(task = self.name, "already running");
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        *running = Some(Supervised { cancel, handle });
        true
    }

    /// Cancel the task and wait for it to exit. Returns whether one was
    /// running.
    pub async fn stop(&self) -> bool {
        let task = self.running.lock().take();
        match task {
            Some(task) => {
                task.shutdown(self.name).await;
                true
            }
            None => false,
        }
    }
}

/// The tick driver. `STOPPED -> RUNNING -> STOPPED`.
///
/// Stopping cancels the sleep between ticks and waits for the current tick
/// to finish; it does not cancel arrival, completion or route tasks, and it
/// leaves the route tracker intact so a restart resumes in-flight trips.
pub struct DispatchLoop {
    ctx: Arc<DispatchContext>,
    slot: TaskSlot,
}

impl DispatchLoop {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        Self {
            ctx,
            slot: TaskSlot::new("dispatch-loop"),
        }
    }

    pub fn start(&self) -> bool {
        let ctx = Arc::clone(&self.ctx);
        self.slot.start(move |cancel| drive(ctx, cancel))
    }

    pub async fn stop(&self) -> bool {
        self.slot.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_running()
    }
}

async fn drive(ctx: Arc<DispatchContext>, cancel: CancellationToken) {
    let period = ctx.config.tick_interval();
    info!(tick_ms = ctx.config.tick_interval_ms, routes = ctx.routes.len(), "dispatch loop started");
    while !cancel.is_cancelled() {
        let summary = tick(&ctx).await;
        if !summary.arrived.is_empty() || !summary.assigned.is_empty() {
            debug!(
                moved = summary.moved,
                arrived = summary.arrived.len(),
                assigned = summary.assigned.len(),
                "tick"
            );
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {}
        }
    }
    info!("dispatch loop stopped");
}
