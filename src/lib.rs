// forest-exec library - execution-sheet workflow engine for forestry operations
// Exposes the core components for the CLI, tests and embedding services

pub mod config;
pub mod errors;
pub mod external;
pub mod geodesy;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod scenario;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, init_config, ForestExecConfig};
pub use errors::WorkflowError;
pub use external::{
    Caller, GeometryProvider, IdentityProvider, NotificationSink, Role, WorkflowEvent, WorksheetCatalog,
};
pub use geodesy::{AreaCalculator, GeodesicAreaCalculator, Geometry, GeometryError, ParcelAreaService};
pub use lifecycle::{ParcelEvent, ProgressAggregator};
pub use model::{
    Activity, ActivityKey, Operation, OperationCode, OperationKey, ParcelAssignment, ParcelKey, ParcelStatus,
    Sheet, SheetKey,
};
pub use observability::{create_workflow_span, workflow_metrics, WorkflowMetrics};
pub use scenario::{Scenario, ScenarioReport};
pub use store::{EntityStore, MemoryStore, StoreError};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflows::{ActivityInfo, Coordinator, RetryConfig, WorkflowOp, WorkflowOutcome};
