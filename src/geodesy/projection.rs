//! Transverse Mercator projection on an ellipsoid
//!
//! Forward and inverse mappings use the Krüger series to sixth order in the
//! third flattening, accurate to well under a millimetre within the few
//! hundred kilometres a national grid spans.
//!
//! Parcel geometry arrives in PT-TM06/ETRS89 (mainland Portugal), whose
//! parameters are fixed: every parcel area must be computed against the same
//! grid and the same GRS80 ellipsoid the geodesic solver uses.

use std::f64::consts::PI;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in metres.
    pub a: f64,
    /// Flattening.
    pub f: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_222_101,
    };

    pub fn eccentricity(&self) -> f64 {
        (self.f * (2.0 - self.f)).sqrt()
    }

    pub fn third_flattening(&self) -> f64 {
        self.f / (2.0 - self.f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    ellipsoid: Ellipsoid,
    lat0: f64,
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
    /// Rectifying radius.
    a_hat: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    delta: [f64; 6],
    /// Meridian arc from the equator to the origin latitude, unscaled.
    m0: f64,
}

/// PT-TM06/ETRS89 grid.
pub static PT_TM06: LazyLock<TransverseMercator> = LazyLock::new(|| {
    TransverseMercator::new(
        Ellipsoid::GRS80,
        39.668_258_333_333_33,
        -8.131_906_111_111_11,
        1.0,
        200_000.0,
        300_000.0,
    )
});

pub fn pt_tm06() -> &'static TransverseMercator {
    &PT_TM06
}

impl TransverseMercator {
    /// Origin latitude and longitude in degrees, false origin in metres.
    pub fn new(
        ellipsoid: Ellipsoid,
        lat0: f64,
        lon0: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let n = ellipsoid.third_flattening();
        let (n2, n3, n4, n5, n6) = (n * n, n.powi(3), n.powi(4), n.powi(5), n.powi(6));
        let a_hat = ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0 - 127.0 * n5 / 288.0
                + 7891.0 * n6 / 37800.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0 + 281.0 * n5 / 630.0
                - 1_983_433.0 * n6 / 1_935_360.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0 + 15061.0 * n5 / 26880.0
                + 167_603.0 * n6 / 181_440.0,
            49561.0 * n4 / 161_280.0 - 179.0 * n5 / 168.0 + 6_601_661.0 * n6 / 7_257_600.0,
            34729.0 * n5 / 80640.0 - 3_418_889.0 * n6 / 1_995_840.0,
            212_378_941.0 * n6 / 319_334_400.0,
        ];
        let beta = [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0 - 81.0 * n5 / 512.0
                + 96199.0 * n6 / 604_800.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0 + 46.0 * n5 / 105.0
                - 1_118_711.0 * n6 / 3_870_720.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0 - 209.0 * n5 / 4480.0 + 5569.0 * n6 / 90720.0,
            4397.0 * n4 / 161_280.0 - 11.0 * n5 / 504.0 - 830_251.0 * n6 / 7_257_600.0,
            4583.0 * n5 / 161_280.0 - 108_847.0 * n6 / 3_991_680.0,
            20_648_693.0 * n6 / 638_668_800.0,
        ];
        let delta = [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0 + 26.0 * n5 / 45.0
                - 2854.0 * n6 / 675.0,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0 + 2704.0 * n5 / 315.0
                + 2323.0 * n6 / 945.0,
            56.0 * n3 / 15.0 - 136.0 * n4 / 35.0 - 1262.0 * n5 / 105.0 + 73814.0 * n6 / 2835.0,
            4279.0 * n4 / 630.0 - 332.0 * n5 / 35.0 - 399_572.0 * n6 / 14175.0,
            4174.0 * n5 / 315.0 - 144_838.0 * n6 / 6237.0,
            601_676.0 * n6 / 22275.0,
        ];

        let e = ellipsoid.eccentricity();
        let chi0 = conformal_latitude(lat0.to_radians(), e);
        let m0 = a_hat * (chi0 + series_sin(&alpha, chi0, 0.0));

        Self {
            ellipsoid,
            lat0,
            lon0,
            k0,
            false_easting,
            false_northing,
            e,
            a_hat,
            alpha,
            beta,
            delta,
            m0,
        }
    }

    pub fn ellipsoid(&self) -> Ellipsoid {
        self.ellipsoid
    }

    /// Origin as `(longitude, latitude)` in degrees.
    pub fn origin(&self) -> (f64, f64) {
        (self.lon0, self.lat0)
    }

    /// Grid coordinates of the origin.
    pub fn false_origin(&self) -> (f64, f64) {
        (self.false_easting, self.false_northing)
    }

    /// Geographic `(longitude, latitude)` in degrees to grid `(easting, northing)`.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let chi = conformal_latitude(lat.to_radians(), self.e);
        let dlon = normalize_angle((lon - self.lon0).to_radians());

        let xi_p = chi.tan().atan2(dlon.cos());
        let eta_p = (chi.cos() * dlon.sin()).atanh();

        let xi = xi_p + series_sin(&self.alpha, xi_p, eta_p);
        let eta = eta_p + series_cos(&self.alpha, xi_p, eta_p);

        let easting = self.false_easting + self.k0 * self.a_hat * eta;
        let northing = self.false_northing + self.k0 * (self.a_hat * xi - self.m0);
        (easting, northing)
    }

    /// Grid `(easting, northing)` to geographic `(longitude, latitude)` in degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let xi = ((northing - self.false_northing) / self.k0 + self.m0) / self.a_hat;
        let eta = (easting - self.false_easting) / (self.k0 * self.a_hat);

        let xi_p = xi - series_sin(&self.beta, xi, eta);
        let eta_p = eta - series_cos(&self.beta, xi, eta);

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let dlon = eta_p.sinh().atan2(xi_p.cos());
        let phi = chi + series_sin(&self.delta, chi, 0.0);

        (self.lon0 + dlon.to_degrees(), phi.to_degrees())
    }
}

fn conformal_latitude(phi: f64, e: f64) -> f64 {
    (phi.tan().asinh() - e * (e * phi.sin()).atanh()).sinh().atan()
}

fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI { PI } else { wrapped }
}

/// `Σ c_j sin(2jξ) cosh(2jη)`
fn series_sin(coeffs: &[f64; 6], xi: f64, eta: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let k = 2.0 * (i + 1) as f64;
            c * (k * xi).sin() * (k * eta).cosh()
        })
        .sum()
}

/// `Σ c_j cos(2jξ) sinh(2jη)`
fn series_cos(coeffs: &[f64; 6], xi: f64, eta: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let k = 2.0 * (i + 1) as f64;
            c * (k * xi).cos() * (k * eta).sinh()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_false_origin_maps_to_projection_origin() {
        let grid = pt_tm06();
        let (x0, y0) = grid.false_origin();
        let (lon, lat) = grid.inverse(x0, y0);
        let (lon0, lat0) = grid.origin();

        assert!((lon - lon0).abs() < 1e-9, "lon {lon} vs {lon0}");
        assert!((lat - lat0).abs() < 1e-9, "lat {lat} vs {lat0}");

        let (x, y) = grid.forward(lon0, lat0);
        assert!((x - x0).abs() < 1e-6);
        assert!((y - y0).abs() < 1e-6);
    }

    #[test]
    fn test_grid_point_round_trips() {
        let grid = pt_tm06();
        for (x, y) in [(-90_000.0, -280_000.0), (150_000.0, 250_000.0), (12_345.6, 98_765.4)] {
            let (lon, lat) = grid.inverse(x, y);
            let (bx, by) = grid.forward(lon, lat);
            assert!((bx - x).abs() < 1e-5, "easting {bx} vs {x}");
            assert!((by - y).abs() < 1e-5, "northing {by} vs {y}");
        }
    }

    #[test]
    fn test_northing_step_matches_meridian_radius() {
        let grid = pt_tm06();
        let (x0, y0) = grid.false_origin();
        let (_, lat_a) = grid.inverse(x0, y0);
        let (_, lat_b) = grid.inverse(x0, y0 + 1000.0);

        // Meridian radius of curvature near 39.67N is about 6 361 400 m.
        let expected = (1000.0 / 6_361_400.0_f64).to_degrees();
        assert!(((lat_b - lat_a) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_easting_increases_eastward() {
        let grid = pt_tm06();
        let (x0, y0) = grid.false_origin();
        let (lon_east, _) = grid.inverse(x0 + 5_000.0, y0);
        let (lon_west, _) = grid.inverse(x0 - 5_000.0, y0);
        assert!(lon_east > grid.origin().0);
        assert!(lon_west < grid.origin().0);
    }
}
