// Parcel geometry, grid projection and geodesic area

pub mod area;
pub mod geometry;
pub mod projection;
pub mod service;

pub use area::{AreaCalculator, GeodesicAreaCalculator};
pub use geometry::{Geometry, GeometryError, Position};
pub use projection::{pt_tm06, Ellipsoid, TransverseMercator};
pub use service::{AreaLookupError, ParcelAreaService};
