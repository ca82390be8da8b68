// Polygon area lookup with memoisation

use moka::future::Cache;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::area::AreaCalculator;
use super::geometry::GeometryError;
use crate::external::GeometryProvider;
use crate::model::PolygonId;
use crate::observability::WorkflowMetrics;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AreaLookupError {
    #[error("polygon {0} not found")]
    PolygonNotFound(PolygonId),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Resolves a polygon id to its geodesic area in hectares.
///
/// Polygons are read-only once ingested, so computed areas are cached per
/// polygon id. A capacity of zero disables the cache.
#[derive(Clone)]
pub struct ParcelAreaService {
    geometry: Arc<dyn GeometryProvider>,
    calculator: Arc<dyn AreaCalculator>,
    cache: Option<Cache<PolygonId, f64>>,
    metrics: Option<Arc<WorkflowMetrics>>,
}

impl ParcelAreaService {
    pub fn new(
        geometry: Arc<dyn GeometryProvider>,
        calculator: Arc<dyn AreaCalculator>,
        cache_capacity: u64,
    ) -> Self {
        let cache = (cache_capacity > 0).then(|| Cache::new(cache_capacity));
        Self {
            geometry,
            calculator,
            cache,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<WorkflowMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn area_ha(&self, polygon: PolygonId) -> Result<f64, AreaLookupError> {
        if let Some(cache) = &self.cache {
            if let Some(area) = cache.get(&polygon).await {
                if let Some(metrics) = &self.metrics {
                    metrics.record_area_cache_hit();
                }
                return Ok(area);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_area_cache_miss();
        }

        let geometry = self
            .geometry
            .polygon(polygon)
            .await
            .ok_or(AreaLookupError::PolygonNotFound(polygon))?;
        let area = self.calculator.area_ha(&geometry)?;
        debug!(polygon, area_ha = area, "computed parcel area");

        if let Some(cache) = &self.cache {
            cache.insert(polygon, area).await;
        }
        Ok(area)
    }
}
