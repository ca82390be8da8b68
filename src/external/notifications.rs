//! Post-commit notification delivery
//!
//! Events are announced only after the transaction that produced them has
//! committed. Delivery is best effort: a failing sink is logged and counted by
//! the coordinator but never turns a committed workflow into an error.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::model::{ActivityKey, OperationKey, ParcelKey, SheetKey};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    SheetCreated { sheet: SheetKey },
    ParcelAssigned { parcel: ParcelKey, operator: String },
    ActivityStarted { activity: ActivityKey, operator: String },
    ActivityCompleted { activity: ActivityKey, finished: bool },
    OperationCompleted { operation: OperationKey },
    SheetCompleted { sheet: SheetKey },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::SheetCreated { .. } => "sheet_created",
            WorkflowEvent::ParcelAssigned { .. } => "parcel_assigned",
            WorkflowEvent::ActivityStarted { .. } => "activity_started",
            WorkflowEvent::ActivityCompleted { .. } => "activity_completed",
            WorkflowEvent::OperationCompleted { .. } => "operation_completed",
            WorkflowEvent::SheetCompleted { .. } => "sheet_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError>;
}

/// Writes every event to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(event = event.name(), payload = %payload, "workflow notification");
        Ok(())
    }
}

/// Keeps delivered events in memory, for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotificationSink {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| NotifyError::Delivery("event buffer poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
