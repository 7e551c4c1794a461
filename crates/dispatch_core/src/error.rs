use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{AssignmentId, UnitId};
use crate::routing::RoutingError;
use crate::store::{EntityRef, StoreError};

/// Coarse classification used by callers to decide between retrying,
/// skipping and surfacing a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Contention,
    DispatchFailed,
    ExternalUnavailable,
    Storage,
    Config,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(EntityRef),

    #[error("unit {unit_id} already has an active assignment (assignment {existing})")]
    Conflict {
        unit_id: UnitId,
        existing: AssignmentId,
    },

    #[error("lock contention: {0}")]
    Contention(StoreError),

    #[error("dispatch failed after {attempts} attempts: {last}")]
    DispatchFailed { attempts: u32, last: StoreError },

    #[error("routing unavailable: {0}")]
    ExternalUnavailable(#[from] RoutingError),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NotFound(_) => ErrorKind::NotFound,
            DispatchError::Conflict { .. } => ErrorKind::Conflict,
            DispatchError::Contention(_) => ErrorKind::Contention,
            DispatchError::DispatchFailed { .. } => ErrorKind::DispatchFailed,
            DispatchError::ExternalUnavailable(_) => ErrorKind::ExternalUnavailable,
            DispatchError::Storage(_) | DispatchError::Task(_) => ErrorKind::Storage,
            DispatchError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => DispatchError::NotFound(entity),
            err if err.is_contention() => DispatchError::Contention(err),
            err => DispatchError::Storage(err),
        }
    }
}

impl From<tokio::task::JoinError> for DispatchError {
    fn from(err: tokio::task::JoinError) -> Self {
        DispatchError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncidentId;

    #[test]
    fn store_errors_map_to_dispatch_kinds() {
        let not_found: DispatchError = StoreError::NotFound(EntityRef::Incident(IncidentId(3))).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let timeout: DispatchError = StoreError::LockTimeout(EntityRef::Unit(UnitId(1))).into();
        assert_eq!(timeout.kind(), ErrorKind::Contention);
        assert!(timeout.is_retryable());

        let deadlock: DispatchError = StoreError::Deadlock("victim".into()).into();
        assert!(deadlock.is_retryable());

        let backend: DispatchError = StoreError::Backend("disk full".into()).into();
        assert_eq!(backend.kind(), ErrorKind::Storage);
        assert!(!backend.is_retryable());
    }

    #[test]
    fn conflict_names_existing_assignment() {
        let err = DispatchError::Conflict {
            unit_id: UnitId(7),
            existing: AssignmentId(42),
        };
        assert!(err.to_string().contains("assignment 42"));
        assert!(!err.is_retryable());
    }
}
