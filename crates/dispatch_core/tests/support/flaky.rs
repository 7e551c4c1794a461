use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dispatch_core::model::{
    Assignment, AssignmentId, Incident, IncidentId, IncidentStatus, NewIncident, NewUnit,
    ServiceType, Unit, UnitId, User, UserId, UserRole,
};
use dispatch_core::store::{DispatchStore, InMemoryStore, StoreError, StoreTransaction};

/// Store wrapper whose next `failures` transactions fail to begin with a
/// deadlock signal, the way a database reports a deadlock victim.
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    failures: AtomicU32,
    begins: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
            begins: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Transactions attempted so far, failed ones included.
    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }
}

impl DispatchStore for FlakyStore {
    fn find_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        self.inner.find_unit(id)
    }

    fn all_units(&self) -> Result<Vec<Unit>, StoreError> {
        self.inner.all_units()
    }

    fn find_available_units(&self) -> Result<Vec<Unit>, StoreError> {
        self.inner.find_available_units()
    }

    fn find_available_units_by_type(&self, service: ServiceType) -> Result<Vec<Unit>, StoreError> {
        self.inner.find_available_units_by_type(service)
    }

    fn find_incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        self.inner.find_incident(id)
    }

    fn all_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        self.inner.all_incidents()
    }

    fn find_incidents_by_status(&self, status: IncidentStatus) -> Result<Vec<Incident>, StoreError> {
        self.inner.find_incidents_by_status(status)
    }

    fn find_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        self.inner.find_assignment(id)
    }

    fn all_assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        self.inner.all_assignments()
    }

    fn find_active_assignment_by_unit(&self, unit_id: UnitId) -> Result<Option<Assignment>, StoreError> {
        self.inner.find_active_assignment_by_unit(unit_id)
    }

    fn find_assignments_by_incident(&self, incident_id: IncidentId) -> Result<Vec<Assignment>, StoreError> {
        self.inner.find_assignments_by_incident(incident_id)
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.find_user(id)
    }

    fn all_users(&self) -> Result<Vec<User>, StoreError> {
        self.inner.all_users()
    }

    fn insert_unit(&self, unit: NewUnit) -> Result<Unit, StoreError> {
        self.inner.insert_unit(unit)
    }

    fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        self.inner.insert_incident(incident)
    }

    fn insert_user(&self, username: &str, role: UserRole) -> Result<User, StoreError> {
        self.inner.insert_user(username, role)
    }

    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Deadlock("injected deadlock".into()));
        }
        self.inner.begin()
    }
}
