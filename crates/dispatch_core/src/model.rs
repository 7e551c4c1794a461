//! Authoritative entities: units, incidents, assignments and users.
//!
//! Timestamps are wall-clock epoch milliseconds (see [`crate::clock`]).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::spatial::GeoPoint;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of an emergency response unit.
    UnitId
);
entity_id!(
    /// Identifier of a reported incident.
    IncidentId
);
entity_id!(AssignmentId);
entity_id!(UserId);

/// Kind of service a unit provides and an incident requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Fire,
    Police,
    Ambulance,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [ServiceType::Fire, ServiceType::Police, ServiceType::Ambulance];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Fire => "FIRE",
            ServiceType::Police => "POLICE",
            ServiceType::Ambulance => "AMBULANCE",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident severity. `Low < Medium < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::Critical];
    pub const MAX: Severity = Severity::Critical;

    /// Matching priority weight for a (possibly unset) severity.
    pub fn weight(severity: Option<Severity>) -> u8 {
        match severity {
            Some(Severity::Critical) => 4,
            Some(Severity::Medium) => 2,
            Some(Severity::Low) => 1,
            None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Pending,
    Dispatched,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub service: ServiceType,
    pub position: GeoPoint,
    pub capacity: u32,
    pub availability: Availability,
}

impl Unit {
    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// Unit fields supplied on creation; the store allocates the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUnit {
    pub service: ServiceType,
    pub position: GeoPoint,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub service: ServiceType,
    pub position: GeoPoint,
    pub severity: Option<Severity>,
    pub status: IncidentStatus,
    /// Epoch ms when the incident was reported.
    pub reported_at: u64,
    /// Number of units requested by the reporter.
    pub needs: u32,
}

impl Incident {
    pub fn severity_weight(&self) -> u8 {
        Severity::weight(self.severity)
    }

    /// Time since the incident was reported, as seen at `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.reported_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIncident {
    pub service: ServiceType,
    pub position: GeoPoint,
    pub severity: Option<Severity>,
    pub reported_at: u64,
    pub needs: u32,
}

/// Binding of one unit to one incident, created by the assignment committer
/// and closed by the completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub incident_id: IncidentId,
    pub unit_id: UnitId,
    pub user_id: UserId,
    /// Epoch ms when the assignment was committed.
    pub assigned_at: u64,
    /// Epoch ms when the assignment was closed; `None` while active.
    pub resolved_at: Option<u64>,
    pub active: bool,
}

impl Assignment {
    /// Time taken to resolve, once the assignment has been closed.
    pub fn resolution_time(&self) -> Option<Duration> {
        self.resolved_at
            .map(|resolved| Duration::from_millis(resolved.saturating_sub(self.assigned_at)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssignment {
    pub incident_id: IncidentId,
    pub unit_id: UnitId,
    pub user_id: UserId,
    pub assigned_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Dispatcher,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: UserRole,
}

/// Alert raised for one user about one incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub incident_id: IncidentId,
    pub message: String,
    pub created_at: u64,
}
