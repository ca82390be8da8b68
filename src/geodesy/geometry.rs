// GeoJSON-shaped polygon geometry in projected metres

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A vertex as it appears in GeoJSON: `[easting, northing]`, extra ordinates ignored.
pub type Position = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("geometry has no coordinate ring")]
    Empty,
    #[error("ring {ring} has {count} distinct vertices, at least {required} required")]
    TooFewVertices {
        ring: usize,
        count: usize,
        required: usize,
    },
    #[error("vertex {vertex} of ring {ring} is not a finite 2D coordinate")]
    InvalidCoordinate { ring: usize, vertex: usize },
    #[error("ring {ring} intersects itself")]
    SelfIntersection { ring: usize },
    #[error("vertex {vertex} of ring {ring} lies outside the projection's valid area")]
    OutsideProjection { ring: usize, vertex: usize },
    #[error("computed area {area_ha} ha is not a finite non-negative value")]
    InvalidArea { area_ha: f64 },
    #[error("malformed geometry: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn from_json(json: &str) -> Result<Self, GeometryError> {
        serde_json::from_str(json).map_err(|e| GeometryError::Malformed(e.to_string()))
    }

    /// A single polygon with only an exterior ring.
    pub fn polygon(exterior: Vec<[f64; 2]>) -> Self {
        Geometry::Polygon(vec![exterior.into_iter().map(|p| p.to_vec()).collect()])
    }

    /// Exterior rings as `(x, y)` pairs with the closing vertex removed.
    ///
    /// Holes are not part of the area accounting and are skipped.
    pub fn exterior_rings(&self) -> Result<Vec<Vec<(f64, f64)>>, GeometryError> {
        let exteriors: Vec<&Vec<Position>> = match self {
            Geometry::Polygon(rings) => rings.first().into_iter().collect(),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().filter_map(|rings| rings.first()).collect()
            }
        };
        if exteriors.is_empty() {
            return Err(GeometryError::Empty);
        }

        exteriors
            .into_iter()
            .enumerate()
            .map(|(ring, positions)| normalize_ring(ring, positions))
            .collect()
    }
}

fn normalize_ring(ring: usize, positions: &[Position]) -> Result<Vec<(f64, f64)>, GeometryError> {
    let mut points = Vec::with_capacity(positions.len());
    for (vertex, position) in positions.iter().enumerate() {
        match position.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => points.push((*x, *y)),
            _ => return Err(GeometryError::InvalidCoordinate { ring, vertex }),
        }
    }
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    Ok(points)
}
