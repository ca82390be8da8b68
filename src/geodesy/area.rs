// Geodesic area of projected parcel polygons

use geographiclib_rs::{Geodesic, PolygonArea, Winding};
use std::fmt;

use super::geometry::{Geometry, GeometryError};
use super::projection::{pt_tm06, TransverseMercator};

const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

/// Converts a parcel geometry into hectares of ground surface.
pub trait AreaCalculator: Send + Sync {
    fn area_ha(&self, geometry: &Geometry) -> Result<f64, GeometryError>;
}

/// Reprojects each vertex from the grid to latitude/longitude and measures
/// the resulting polygon on the ellipsoid.
pub struct GeodesicAreaCalculator {
    projection: TransverseMercator,
    geodesic: Geodesic,
    strict: bool,
}

impl fmt::Debug for GeodesicAreaCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeodesicAreaCalculator")
            .field("projection", &self.projection)
            .field("strict", &self.strict)
            .finish()
    }
}

impl Default for GeodesicAreaCalculator {
    fn default() -> Self {
        Self::new(false)
    }
}

impl GeodesicAreaCalculator {
    /// Calculator on the PT-TM06 grid. `strict` additionally rejects
    /// degenerate and self-intersecting rings.
    pub fn new(strict: bool) -> Self {
        Self::with_projection(pt_tm06().clone(), strict)
    }

    pub fn with_projection(projection: TransverseMercator, strict: bool) -> Self {
        let ellipsoid = projection.ellipsoid();
        Self {
            geodesic: Geodesic::new(ellipsoid.a, ellipsoid.f),
            projection,
            strict,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn ring_area_m2(&self, index: usize, ring: &[(f64, f64)]) -> Result<f64, GeometryError> {
        let mut polygon = PolygonArea::new(&self.geodesic, Winding::CounterClockwise);
        for (vertex, &(x, y)) in ring.iter().enumerate() {
            let (lon, lat) = self.projection.inverse(x, y);
            if !valid_geographic(lon, lat) {
                return Err(GeometryError::OutsideProjection { ring: index, vertex });
            }
            polygon.add_point(lat, lon);
        }
        let (_perimeter, area, _count) = polygon.compute(true);
        Ok(area.abs())
    }

    fn validate(&self, index: usize, ring: &[(f64, f64)]) -> Result<(), GeometryError> {
        match ring.len() {
            0 => return Err(GeometryError::Empty),
            1 => {
                return Err(GeometryError::TooFewVertices {
                    ring: index,
                    count: 1,
                    required: 2,
                })
            }
            _ => {}
        }
        if !self.strict {
            return Ok(());
        }

        let vertices = without_repeats(ring);
        let distinct = distinct_count(&vertices);
        if distinct < 3 {
            return Err(GeometryError::TooFewVertices {
                ring: index,
                count: distinct,
                required: 3,
            });
        }
        if self_intersects(&vertices) {
            return Err(GeometryError::SelfIntersection { ring: index });
        }
        Ok(())
    }
}

impl AreaCalculator for GeodesicAreaCalculator {
    fn area_ha(&self, geometry: &Geometry) -> Result<f64, GeometryError> {
        let rings = geometry.exterior_rings()?;
        let mut total_m2 = 0.0;
        for (index, ring) in rings.iter().enumerate() {
            self.validate(index, ring)?;
            total_m2 += self.ring_area_m2(index, ring)?;
        }
        let area_ha = total_m2 / SQUARE_METRES_PER_HECTARE;
        if !area_ha.is_finite() {
            return Err(GeometryError::InvalidArea { area_ha });
        }
        Ok(area_ha)
    }
}

fn valid_geographic(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0
}

fn without_repeats(ring: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut vertices: Vec<(f64, f64)> = Vec::with_capacity(ring.len());
    for &point in ring {
        if vertices.last() != Some(&point) {
            vertices.push(point);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

fn distinct_count(vertices: &[(f64, f64)]) -> usize {
    let mut seen: Vec<(f64, f64)> = Vec::new();
    for point in vertices {
        if !seen.contains(point) {
            seen.push(*point);
        }
    }
    seen.len()
}

fn orientation(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
    (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
}

fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
    r.0 >= p.0.min(q.0) && r.0 <= p.0.max(q.0) && r.1 >= p.1.min(q.1) && r.1 <= p.1.max(q.1)
}

fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}

/// Any two non-adjacent edges of the closed ring touching or crossing.
fn self_intersects(vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    if n < 4 {
        return false;
    }
    let edge = |i: usize| (vertices[i], vertices[(i + 1) % n]);
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (a, b) = edge(i);
            let (c, d) = edge(j);
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}
