//! Authoritative store seam.
//!
//! Plain reads (`find_*`) return committed snapshots and take no row locks.
//! Every mutation of a unit, incident or assignment goes through a
//! [`StoreTransaction`], which locks rows as they are loaded and applies its
//! buffered writes atomically on [`StoreTransaction::commit`]. Dropping a
//! transaction without committing discards its writes and releases its locks.
//!
//! Rows must be locked in the global order incident, unit, user
//! (see [`EntityRef::lock_rank`]).

use std::fmt;

use thiserror::Error;

use crate::model::{
    Assignment, AssignmentId, Incident, IncidentId, IncidentStatus, NewAssignment, NewIncident,
    NewUnit, ServiceType, Unit, UnitId, User, UserId, UserRole,
};

pub mod memory;

pub use memory::InMemoryStore;

/// Reference to one row, used for lock bookkeeping and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Incident(IncidentId),
    Unit(UnitId),
    User(UserId),
    Assignment(AssignmentId),
}

impl EntityRef {
    /// Position in the global lock-acquisition order. Rows of a lower rank
    /// must be locked before rows of a higher rank.
    pub fn lock_rank(&self) -> u8 {
        match self {
            EntityRef::Incident(_) => 0,
            EntityRef::Unit(_) => 1,
            EntityRef::User(_) => 2,
            EntityRef::Assignment(_) => 3,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Incident(id) => write!(f, "incident {id}"),
            EntityRef::Unit(id) => write!(f, "unit {id}"),
            EntityRef::User(id) => write!(f, "user {id}"),
            EntityRef::Assignment(id) => write!(f, "assignment {id}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(EntityRef),

    #[error("timed out waiting for lock on {0}")]
    LockTimeout(EntityRef),

    #[error("lock order violation: {requested} requested while holding {held}")]
    LockOrderViolation { requested: EntityRef, held: EntityRef },

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Lock-wait timeouts, lock-order violations and backend deadlock
    /// signals are transient and worth retrying.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_)
                | StoreError::LockOrderViolation { .. }
                | StoreError::Deadlock(_)
        )
    }
}

pub trait DispatchStore: Send + Sync {
    fn find_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError>;
    fn all_units(&self) -> Result<Vec<Unit>, StoreError>;
    fn find_available_units(&self) -> Result<Vec<Unit>, StoreError>;
    fn find_available_units_by_type(&self, service: ServiceType) -> Result<Vec<Unit>, StoreError>;

    fn find_incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError>;
    fn all_incidents(&self) -> Result<Vec<Incident>, StoreError>;
    fn find_incidents_by_status(&self, status: IncidentStatus)
        -> Result<Vec<Incident>, StoreError>;

    fn find_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError>;
    fn all_assignments(&self) -> Result<Vec<Assignment>, StoreError>;
    /// The unit's active assignment, if any. At most one exists.
    fn find_active_assignment_by_unit(&self, unit_id: UnitId)
        -> Result<Option<Assignment>, StoreError>;
    /// Every assignment ever made for the incident, active or closed.
    fn find_assignments_by_incident(&self, incident_id: IncidentId)
        -> Result<Vec<Assignment>, StoreError>;

    fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    fn all_users(&self) -> Result<Vec<User>, StoreError>;

    fn insert_unit(&self, unit: NewUnit) -> Result<Unit, StoreError>;
    fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError>;
    fn insert_user(&self, username: &str, role: UserRole) -> Result<User, StoreError>;

    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}

pub trait StoreTransaction: Send {
    fn lock_incident(&mut self, id: IncidentId) -> Result<Incident, StoreError>;
    fn lock_unit(&mut self, id: UnitId) -> Result<Unit, StoreError>;
    fn lock_user(&mut self, id: UserId) -> Result<User, StoreError>;

    /// Active assignments of a unit this transaction has locked, including
    /// writes buffered in this transaction.
    fn active_assignments_for_unit(&self, unit_id: UnitId) -> Result<Vec<Assignment>, StoreError>;
    /// Assignments of an incident this transaction has locked, including
    /// writes buffered in this transaction.
    fn assignments_for_incident(&self, incident_id: IncidentId)
        -> Result<Vec<Assignment>, StoreError>;

    fn put_incident(&mut self, incident: Incident) -> Result<(), StoreError>;
    fn put_unit(&mut self, unit: Unit) -> Result<(), StoreError>;
    fn insert_assignment(&mut self, assignment: NewAssignment) -> Result<Assignment, StoreError>;
    fn put_assignment(&mut self, assignment: Assignment) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
