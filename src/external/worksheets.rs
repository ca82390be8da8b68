//! Worksheet planning data and polygon geometry
//!
//! Worksheets are ingested elsewhere. The engine reads the declared
//! operations when a sheet is opened and the polygon geometry when a parcel is
//! finished.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geodesy::Geometry;
use crate::model::{OperationCode, PolygonId, WorksheetId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub code: OperationCode,
    /// Declared area to cover; a missing value counts as zero.
    #[serde(default)]
    pub area_ha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetPlan {
    pub id: WorksheetId,
    pub operations: Vec<PlannedOperation>,
    pub polygon_ids: Vec<PolygonId>,
}

#[async_trait]
pub trait WorksheetCatalog: Send + Sync {
    async fn worksheet(&self, id: WorksheetId) -> Option<WorksheetPlan>;
}

#[async_trait]
pub trait GeometryProvider: Send + Sync {
    async fn polygon(&self, id: PolygonId) -> Option<Geometry>;
}

/// Worksheets and polygons held in memory, serving both seams.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorksheets {
    worksheets: HashMap<WorksheetId, WorksheetPlan>,
    polygons: HashMap<PolygonId, Geometry>,
}

impl InMemoryWorksheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worksheet(mut self, plan: WorksheetPlan) -> Self {
        self.worksheets.insert(plan.id, plan);
        self
    }

    pub fn with_polygon(mut self, id: PolygonId, geometry: Geometry) -> Self {
        self.polygons.insert(id, geometry);
        self
    }
}

#[async_trait]
impl WorksheetCatalog for InMemoryWorksheets {
    async fn worksheet(&self, id: WorksheetId) -> Option<WorksheetPlan> {
        self.worksheets.get(&id).cloned()
    }
}

#[async_trait]
impl GeometryProvider for InMemoryWorksheets {
    async fn polygon(&self, id: PolygonId) -> Option<Geometry> {
        self.polygons.get(&id).cloned()
    }
}
