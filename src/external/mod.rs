//! Collaborator abstractions
//!
//! The workflow engine consumes identity, worksheet planning, polygon geometry
//! and notification delivery through these traits, so the coordinator can be
//! driven by in-memory implementations in tests and by real services in a
//! deployment.

pub mod identity;
pub mod notifications;
pub mod worksheets;

pub use identity::{Caller, IdentityError, IdentityProvider, Role, StaticIdentityProvider};
pub use notifications::{
    LogNotificationSink, MemoryNotificationSink, NotificationSink, NotifyError, WorkflowEvent,
};
pub use worksheets::{
    GeometryProvider, InMemoryWorksheets, PlannedOperation, WorksheetCatalog, WorksheetPlan,
};
