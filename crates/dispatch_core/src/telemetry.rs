//! Telemetry / KPIs: engine counters and completed assignment records.
//!
//! Completion means are kept as running totals; only the most recent
//! [`RECENT_COMPLETIONS_CAPACITY`] records are retained for inspection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{Assignment, AssignmentId, IncidentId, ServiceType, UnitId};

/// One closed assignment, recorded by the completion handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedAssignmentRecord {
    pub assignment_id: AssignmentId,
    pub incident_id: IncidentId,
    pub unit_id: UnitId,
    pub service: ServiceType,
    pub reported_at: u64,
    pub assigned_at: u64,
    pub resolved_at: u64,
}

impl CompletedAssignmentRecord {
    pub fn from_assignment(
        assignment: &Assignment,
        service: ServiceType,
        reported_at: u64,
    ) -> Option<Self> {
        Some(Self {
            assignment_id: assignment.id,
            incident_id: assignment.incident_id,
            unit_id: assignment.unit_id,
            service,
            reported_at,
            assigned_at: assignment.assigned_at,
            resolved_at: assignment.resolved_at?,
        })
    }

    /// Time from report to dispatch.
    pub fn time_to_dispatch(&self) -> u64 {
        self.assigned_at.saturating_sub(self.reported_at)
    }

    /// Time from dispatch to close (travel plus on-scene work).
    pub fn time_to_resolve(&self) -> u64 {
        self.resolved_at.saturating_sub(self.assigned_at)
    }
}

/// Completed records retained by [`DispatchTelemetry::recent_completions`].
pub const RECENT_COMPLETIONS_CAPACITY: usize = 1_024;

#[derive(Debug, Default)]
struct CompletionLedger {
    total: u64,
    dispatch_ms_sum: u64,
    resolve_ms_sum: u64,
    recent: VecDeque<CompletedAssignmentRecord>,
}

impl CompletionLedger {
    fn push(&mut self, record: CompletedAssignmentRecord) {
        self.total += 1;
        self.dispatch_ms_sum = self.dispatch_ms_sum.saturating_add(record.time_to_dispatch());
        self.resolve_ms_sum = self.resolve_ms_sum.saturating_add(record.time_to_resolve());
        if self.recent.len() == RECENT_COMPLETIONS_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    fn mean(&self, sum: u64) -> Option<f64> {
        (self.total > 0).then(|| sum as f64 / self.total as f64)
    }
}

#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    ticks: AtomicU64,
    assignments_created: AtomicU64,
    conflicts: AtomicU64,
    contention_retries: AtomicU64,
    dispatch_failures: AtomicU64,
    routes_installed: AtomicU64,
    route_failures: AtomicU64,
    arrivals: AtomicU64,
    completions: AtomicU64,
    escalations: AtomicU64,
    completed: Mutex<CompletionLedger>,
}

/// Point-in-time copy of [`DispatchTelemetry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub ticks: u64,
    pub assignments_created: u64,
    pub conflicts: u64,
    pub contention_retries: u64,
    pub dispatch_failures: u64,
    pub routes_installed: u64,
    pub route_failures: u64,
    pub arrivals: u64,
    pub completions: u64,
    pub escalations: u64,
    /// Every assignment closed since start, not only the retained records.
    pub completed_assignments: u64,
    pub mean_time_to_dispatch_ms: Option<f64>,
    pub mean_time_to_resolve_ms: Option<f64>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DispatchTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        bump(&self.ticks);
    }

    pub fn record_assignment(&self) {
        bump(&self.assignments_created);
    }

    pub fn record_conflict(&self) {
        bump(&self.conflicts);
    }

    pub fn record_contention_retry(&self) {
        bump(&self.contention_retries);
    }

    pub fn record_dispatch_failure(&self) {
        bump(&self.dispatch_failures);
    }

    pub fn record_route_installed(&self) {
        bump(&self.routes_installed);
    }

    pub fn record_route_failure(&self) {
        bump(&self.route_failures);
    }

    pub fn record_arrival(&self) {
        bump(&self.arrivals);
    }

    pub fn record_escalation(&self) {
        bump(&self.escalations);
    }

    pub fn record_completion(&self, records: Vec<CompletedAssignmentRecord>) {
        bump(&self.completions);
        let mut completed = self.completed.lock();
        for record in records {
            completed.push(record);
        }
    }

    /// Most recent completed records, oldest first.
    pub fn recent_completions(&self) -> Vec<CompletedAssignmentRecord> {
        self.completed.lock().recent.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let completed = self.completed.lock();
        TelemetrySnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            assignments_created: self.assignments_created.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            contention_retries: self.contention_retries.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            routes_installed: self.routes_installed.load(Ordering::Relaxed),
            route_failures: self.route_failures.load(Ordering::Relaxed),
            arrivals: self.arrivals.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            completed_assignments: completed.total,
            mean_time_to_dispatch_ms: completed.mean(completed.dispatch_ms_sum),
            mean_time_to_resolve_ms: completed.mean(completed.resolve_ms_sum),
        }
    }
}
