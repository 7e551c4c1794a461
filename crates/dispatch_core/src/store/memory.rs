//! In-memory authoritative store with row locks.
//!
//! Rows live in ordered maps behind one `RwLock`; transactions take
//! exclusive row locks from a lock table (a set of held [`EntityRef`]s plus a
//! condvar) and wait at most `lock_timeout` for a row another transaction
//! holds. A wait that times out surfaces as [`StoreError::LockTimeout`], the
//! same way a database reports a lock-wait timeout or deadlock victim.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

use super::{DispatchStore, EntityRef, StoreError, StoreTransaction};
use crate::model::{
    Assignment, AssignmentId, Availability, Incident, IncidentId, IncidentStatus, NewAssignment,
    NewIncident, NewUnit, ServiceType, Unit, UnitId, User, UserId, UserRole,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Tables {
    units: BTreeMap<UnitId, Unit>,
    incidents: BTreeMap<IncidentId, Incident>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    users: BTreeMap<UserId, User>,
}

#[derive(Debug, Default)]
struct RowLocks {
    held: Mutex<HashSet<EntityRef>>,
    released: Condvar,
}

impl RowLocks {
    fn acquire(&self, row: EntityRef, timeout: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while held.contains(&row) {
            if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(&row) {
                return Err(StoreError::LockTimeout(row));
            }
        }
        held.insert(row);
        Ok(())
    }

    fn release(&self, rows: &[EntityRef]) {
        if rows.is_empty() {
            return;
        }
        let mut held = self.held.lock();
        for row in rows {
            held.remove(row);
        }
        drop(held);
        self.released.notify_all();
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    locks: RowLocks,
    lock_timeout: Duration,
    next_unit_id: AtomicU64,
    next_incident_id: AtomicU64,
    next_assignment_id: AtomicU64,
    next_user_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            locks: RowLocks::default(),
            lock_timeout,
            next_unit_id: AtomicU64::new(1),
            next_incident_id: AtomicU64::new(1),
            next_assignment_id: AtomicU64::new(1),
            next_user_id: AtomicU64::new(1),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn transaction(&self) -> MemoryTransaction<'_> {
        MemoryTransaction {
            store: self,
            held: Vec::new(),
            incidents: HashMap::new(),
            units: HashMap::new(),
            assignments: BTreeMap::new(),
        }
    }
}

impl DispatchStore for InMemoryStore {
    fn find_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        Ok(self.tables.read().units.get(&id).cloned())
    }

    fn all_units(&self) -> Result<Vec<Unit>, StoreError> {
        Ok(self.tables.read().units.values().cloned().collect())
    }

    fn find_available_units(&self) -> Result<Vec<Unit>, StoreError> {
        Ok(self
            .tables
            .read()
            .units
            .values()
            .filter(|unit| unit.is_available())
            .cloned()
            .collect())
    }

    fn find_available_units_by_type(&self, service: ServiceType) -> Result<Vec<Unit>, StoreError> {
        Ok(self
            .tables
            .read()
            .units
            .values()
            .filter(|unit| unit.is_available() && unit.service == service)
            .cloned()
            .collect())
    }

    fn find_incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        Ok(self.tables.read().incidents.get(&id).cloned())
    }

    fn all_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        Ok(self.tables.read().incidents.values().cloned().collect())
    }

    fn find_incidents_by_status(
        &self,
        status: IncidentStatus,
    ) -> Result<Vec<Incident>, StoreError> {
        Ok(self
            .tables
            .read()
            .incidents
            .values()
            .filter(|incident| incident.status == status)
            .cloned()
            .collect())
    }

    fn find_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        Ok(self.tables.read().assignments.get(&id).cloned())
    }

    fn all_assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        Ok(self.tables.read().assignments.values().cloned().collect())
    }

    fn find_active_assignment_by_unit(
        &self,
        unit_id: UnitId,
    ) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .find(|a| a.active && a.unit_id == unit_id)
            .cloned())
    }

    fn find_assignments_by_incident(
        &self,
        incident_id: IncidentId,
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect())
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    fn all_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().users.values().cloned().collect())
    }

    fn insert_unit(&self, unit: NewUnit) -> Result<Unit, StoreError> {
        let unit = Unit {
            id: UnitId(self.next_unit_id.fetch_add(1, Ordering::SeqCst)),
            service: unit.service,
            position: unit.position,
            capacity: unit.capacity,
            availability: Availability::Available,
        };
        self.tables.write().units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        let incident = Incident {
            id: IncidentId(self.next_incident_id.fetch_add(1, Ordering::SeqCst)),
            service: incident.service,
            position: incident.position,
            severity: incident.severity,
            status: IncidentStatus::Pending,
            reported_at: incident.reported_at,
            needs: incident.needs,
        };
        self.tables
            .write()
            .incidents
            .insert(incident.id, incident.clone());
        Ok(incident)
    }

    fn insert_user(&self, username: &str, role: UserRole) -> Result<User, StoreError> {
        let user = User {
            id: UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst)),
            username: username.to_string(),
            role,
        };
        self.tables.write().users.insert(user.id, user.clone());
        Ok(user)
    }

    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        Ok(Box::new(self.transaction()))
    }
}

fn lock_key(row: &EntityRef) -> (u8, u64) {
    let id = match row {
        EntityRef::Incident(id) => id.0,
        EntityRef::Unit(id) => id.0,
        EntityRef::User(id) => id.0,
        EntityRef::Assignment(id) => id.0,
    };
    (row.lock_rank(), id)
}

/// Transaction over [`InMemoryStore`]. Rows within the same rank must be
/// locked in ascending id order.
struct MemoryTransaction<'a> {
    store: &'a InMemoryStore,
    held: Vec<EntityRef>,
    incidents: HashMap<IncidentId, Incident>,
    units: HashMap<UnitId, Unit>,
    assignments: BTreeMap<AssignmentId, Assignment>,
}

impl MemoryTransaction<'_> {
    fn lock(&mut self, row: EntityRef) -> Result<(), StoreError> {
        if self.held.contains(&row) {
            return Ok(());
        }
        if let Some(highest) = self.held.iter().max_by_key(|held| lock_key(held)) {
            if lock_key(highest) > lock_key(&row) {
                return Err(StoreError::LockOrderViolation {
                    requested: row,
                    held: *highest,
                });
            }
        }
        self.store.locks.acquire(row, self.store.lock_timeout)?;
        trace!(%row, "row locked");
        self.held.push(row);
        Ok(())
    }

    fn require_lock(&self, row: EntityRef) -> Result<(), StoreError> {
        if self.held.contains(&row) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "{row} written without holding its lock"
            )))
        }
    }

    /// Committed assignments overlaid with this transaction's pending writes.
    fn merged_assignments<F>(&self, keep: F) -> Vec<Assignment>
    where
        F: Fn(&Assignment) -> bool,
    {
        let tables = self.store.tables.read();
        let mut merged: BTreeMap<AssignmentId, Assignment> = tables
            .assignments
            .values()
            .filter(|a| keep(a))
            .map(|a| (a.id, a.clone()))
            .collect();
        for (id, assignment) in &self.assignments {
            if keep(assignment) {
                merged.insert(*id, assignment.clone());
            } else {
                merged.remove(id);
            }
        }
        merged.into_values().collect()
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn lock_incident(&mut self, id: IncidentId) -> Result<Incident, StoreError> {
        let row = EntityRef::Incident(id);
        self.lock(row)?;
        if let Some(pending) = self.incidents.get(&id) {
            return Ok(pending.clone());
        }
        self.store
            .tables
            .read()
            .incidents
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(row))
    }

    fn lock_unit(&mut self, id: UnitId) -> Result<Unit, StoreError> {
        let row = EntityRef::Unit(id);
        self.lock(row)?;
        if let Some(pending) = self.units.get(&id) {
            return Ok(pending.clone());
        }
        self.store
            .tables
            .read()
            .units
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(row))
    }

    fn lock_user(&mut self, id: UserId) -> Result<User, StoreError> {
        let row = EntityRef::User(id);
        self.lock(row)?;
        self.store
            .tables
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(row))
    }

    fn active_assignments_for_unit(&self, unit_id: UnitId) -> Result<Vec<Assignment>, StoreError> {
        Ok(self.merged_assignments(|a| a.active && a.unit_id == unit_id))
    }

    fn assignments_for_incident(
        &self,
        incident_id: IncidentId,
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(self.merged_assignments(|a| a.incident_id == incident_id))
    }

    fn put_incident(&mut self, incident: Incident) -> Result<(), StoreError> {
        self.require_lock(EntityRef::Incident(incident.id))?;
        self.incidents.insert(incident.id, incident);
        Ok(())
    }

    fn put_unit(&mut self, unit: Unit) -> Result<(), StoreError> {
        self.require_lock(EntityRef::Unit(unit.id))?;
        self.units.insert(unit.id, unit);
        Ok(())
    }

    fn insert_assignment(&mut self, assignment: NewAssignment) -> Result<Assignment, StoreError> {
        self.require_lock(EntityRef::Unit(assignment.unit_id))?;
        let assignment = Assignment {
            id: AssignmentId(self.store.next_assignment_id.fetch_add(1, Ordering::SeqCst)),
            incident_id: assignment.incident_id,
            unit_id: assignment.unit_id,
            user_id: assignment.user_id,
            assigned_at: assignment.assigned_at,
            resolved_at: None,
            active: true,
        };
        self.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    fn put_assignment(&mut self, assignment: Assignment) -> Result<(), StoreError> {
        let incident_row = EntityRef::Incident(assignment.incident_id);
        let unit_row = EntityRef::Unit(assignment.unit_id);
        if !self.held.contains(&incident_row) {
            self.require_lock(unit_row)?;
        }
        self.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let store = self.store;
        let mut tables = store.tables.write();
        for (id, incident) in self.incidents.drain() {
            tables.incidents.insert(id, incident);
        }
        for (id, unit) in self.units.drain() {
            tables.units.insert(id, unit);
        }
        let assignments = std::mem::take(&mut self.assignments);
        tables.assignments.extend(assignments);
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        self.store.locks.release(&self.held);
    }
}
