// Workflow orchestration: every mutation is one retried store transaction

pub mod coordinator;
pub mod ops;
pub mod retry;
pub mod views;

pub use coordinator::Coordinator;
pub use ops::{ActivityInfo, SheetCreated, StopOutcome, WorkflowOp, WorkflowOutcome};
pub use retry::{RetryConfig, RetryHandler};
pub use views::{
    OperationExport, OperationStatus, ParcelView, PolygonExport, PolygonOperationExport, SheetExport,
    SheetStatus, SheetSummary,
};
