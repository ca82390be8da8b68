//! Shared harness for workflow integration tests
//!
//! Wires a coordinator over the in-memory store with a fixed user table and a
//! stub area calculator, so each polygon has an exact, known area.
#![allow(dead_code)]

pub mod stores;

use std::sync::Arc;

use forest_exec::external::{
    Caller, InMemoryWorksheets, MemoryNotificationSink, PlannedOperation, Role, StaticIdentityProvider,
    WorksheetPlan,
};
use forest_exec::geodesy::{AreaCalculator, Geometry, GeometryError, ParcelAreaService};
use forest_exec::model::{ActivityKey, OperationCode, OperationKey, ParcelKey, PolygonId, WorksheetId};
use forest_exec::store::{EntityStore, MemoryStore};
use forest_exec::workflows::{Coordinator, RetryConfig, StopOutcome};
use forest_exec::WorkflowMetrics;

pub const REP: &str = "rep";
pub const OP1: &str = "op1";
pub const OP2: &str = "op2";
pub const OUTSIDER: &str = "outsider";
pub const MANAGER: &str = "manager";

pub fn users() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_user(Caller::new(REP, Role::PartnerRepresentative, Some("acme")))
        .with_user(Caller::new(OP1, Role::PartnerOperator, Some("acme")))
        .with_user(Caller::new(OP2, Role::PartnerOperator, Some("acme")))
        .with_user(Caller::new(OUTSIDER, Role::PartnerOperator, Some("globex")))
        .with_user(Caller::new(MANAGER, Role::SheetManager, None))
}

pub fn code(code: &str) -> OperationCode {
    OperationCode::new(code).unwrap()
}

pub fn plan(id: WorksheetId, operations: &[(&str, f64)], polygons: &[PolygonId]) -> WorksheetPlan {
    WorksheetPlan {
        id,
        operations: operations
            .iter()
            .map(|(c, area)| PlannedOperation {
                code: code(c),
                area_ha: Some(*area),
            })
            .collect(),
        polygon_ids: polygons.to_vec(),
    }
}

pub fn parcel(worksheet: WorksheetId, op: &str, polygon: PolygonId) -> ParcelKey {
    OperationKey::new(worksheet, code(op)).parcel(polygon)
}

/// A geometry unique to `polygon`, recognised by [`StubAreas`].
fn marker(polygon: PolygonId) -> Geometry {
    let x = polygon as f64;
    Geometry::polygon(vec![[x, 0.0], [x + 1.0, 0.0], [x, 1.0]])
}

/// Returns the configured hectares for each marker geometry.
pub struct StubAreas {
    areas: Vec<(Geometry, f64)>,
}

impl AreaCalculator for StubAreas {
    fn area_ha(&self, geometry: &Geometry) -> Result<f64, GeometryError> {
        self.areas
            .iter()
            .find(|(known, _)| known == geometry)
            .map(|(_, area)| *area)
            .ok_or(GeometryError::Empty)
    }
}

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<dyn EntityStore>,
    pub events: Arc<MemoryNotificationSink>,
    pub metrics: Arc<WorkflowMetrics>,
}

pub struct HarnessBuilder {
    plans: Vec<WorksheetPlan>,
    areas: Vec<(PolygonId, f64)>,
    store: Arc<dyn EntityStore>,
    retry: RetryConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            plans: Vec::new(),
            areas: Vec::new(),
            store: Arc::new(MemoryStore::new()),
            retry: RetryConfig::immediate(5),
        }
    }

    pub fn worksheet(mut self, plan: WorksheetPlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn area(mut self, polygon: PolygonId, area_ha: f64) -> Self {
        self.areas.push((polygon, area_ha));
        self
    }

    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = store;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Harness {
        let mut catalog = InMemoryWorksheets::new();
        for plan in self.plans {
            catalog = catalog.with_worksheet(plan);
        }
        for (polygon, _) in &self.areas {
            catalog = catalog.with_polygon(*polygon, marker(*polygon));
        }
        let catalog = Arc::new(catalog);
        let calculator = Arc::new(StubAreas {
            areas: self.areas.iter().map(|(p, a)| (marker(*p), *a)).collect(),
        });

        let events = Arc::new(MemoryNotificationSink::new());
        let metrics = Arc::new(WorkflowMetrics::new());
        let coordinator = Coordinator::new(
            self.store.clone(),
            Arc::new(users()),
            catalog.clone(),
            ParcelAreaService::new(catalog, calculator, 0),
        )
        .with_notifications(events.clone())
        .with_retry_config(self.retry)
        .with_metrics(metrics.clone());

        Harness {
            coordinator: Arc::new(coordinator),
            store: self.store,
            events,
            metrics,
        }
    }
}

impl Harness {
    /// Assigns `operator` to the parcel and runs one finished session.
    pub async fn complete_parcel(&self, key: &ParcelKey, operator: &str) -> StopOutcome {
        self.coordinator.assign(REP, key, operator).await.unwrap();
        let activity = self.start(key, operator).await;
        self.coordinator.stop(operator, &activity, true).await.unwrap()
    }

    pub async fn start(&self, key: &ParcelKey, operator: &str) -> ActivityKey {
        self.coordinator.start(operator, key).await.unwrap().key
    }
}
