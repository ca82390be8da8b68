use thiserror::Error;

use crate::external::IdentityError;
use crate::geodesy::{AreaLookupError, GeometryError};
use crate::lifecycle::TransitionError;
use crate::store::StoreError;

/// Every failure a workflow operation can surface to its caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflicting concurrent update: {0}")]
    Conflict(String),
    #[error("invalid geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("store failure: {0}")]
    Store(String),
}

impl WorkflowError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        WorkflowError::NotFound(what.to_string())
    }

    /// Only lost optimistic races are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Conflict(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::PermissionDenied(_) => "permission_denied",
            WorkflowError::InvalidState(_) => "invalid_state",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::Geometry(_) => "geometry",
            WorkflowError::Unauthenticated(_) => "unauthenticated",
            WorkflowError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { key } => WorkflowError::Conflict(key),
            StoreError::Backend(message) => WorkflowError::Store(message),
        }
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidState { .. } => WorkflowError::InvalidState(err.to_string()),
            TransitionError::PermissionDenied(message) => WorkflowError::PermissionDenied(message),
        }
    }
}

impl From<AreaLookupError> for WorkflowError {
    fn from(err: AreaLookupError) -> Self {
        match err {
            AreaLookupError::PolygonNotFound(id) => WorkflowError::NotFound(format!("polygon {id}")),
            AreaLookupError::Geometry(geometry) => WorkflowError::Geometry(geometry),
        }
    }
}

impl From<IdentityError> for WorkflowError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unauthenticated(message) => WorkflowError::Unauthenticated(message),
            IdentityError::Unavailable(message) => WorkflowError::Store(format!("identity service: {message}")),
        }
    }
}
