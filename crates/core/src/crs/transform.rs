//! Pure-Rust WGS84 <-> UTM coordinate transforms (Snyder 1987, USGS formulas).
//!
//! Covers EPSG 326xx (UTM North) and 327xx (UTM South) in both directions,
//! plus identity and zone-to-zone chaining. Any other pair is reported as an
//! alignment error by [`transform_between`].

use super::CRS;
use crate::error::{Error, Result};

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0: f64 = 0.9996; // UTM scale factor
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A point transform from one CRS to another
pub trait CoordinateTransform: Send + Sync {
    fn transform(&self, x: f64, y: f64) -> (f64, f64);
}

/// Transform between two systems that are the same
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }
}

/// A UTM zone on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransverseMercator {
    pub zone: u32,
    pub north: bool,
}

/// WGS84 (lon, lat) degrees to UTM (easting, northing) metres
#[derive(Debug, Clone, Copy)]
pub struct Wgs84ToUtm(pub TransverseMercator);

/// UTM (easting, northing) metres to WGS84 (lon, lat) degrees
#[derive(Debug, Clone, Copy)]
pub struct UtmToWgs84(pub TransverseMercator);

struct Chain(Box<dyn CoordinateTransform>, Box<dyn CoordinateTransform>);

impl CoordinateTransform for Wgs84ToUtm {
    fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        self.0.forward(x, y)
    }
}

impl CoordinateTransform for UtmToWgs84 {
    fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        self.0.inverse(x, y)
    }
}

impl CoordinateTransform for Chain {
    fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        let (ix, iy) = self.0.transform(x, y);
        self.1.transform(ix, iy)
    }
}

impl TransverseMercator {
    /// Parse an EPSG code into a UTM zone.
    ///
    /// - EPSG 326xx → zone xx, North hemisphere
    /// - EPSG 327xx → zone xx, South hemisphere
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        if (32601..=32660).contains(&epsg) {
            Some(Self { zone: epsg - 32600, north: true })
        } else if (32701..=32760).contains(&epsg) {
            Some(Self { zone: epsg - 32700, north: false })
        } else {
            None
        }
    }

    fn central_meridian(&self) -> f64 {
        ((self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
    }

    /// Snyder eqs. 8-9 and 8-10
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let lon = lon_deg.to_radians();

        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let tan_lat = lat.tan();

        let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = E_PRIME2 * cos_lat * cos_lat;
        let a_coeff = cos_lat * (lon - self.central_meridian());
        let m = meridional_arc(lat);

        let a2 = a_coeff * a_coeff;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        let easting = K0
            * n
            * (a_coeff
                + (1.0 - t + c) * a2 * a_coeff / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
            + FALSE_EASTING;

        let northing = K0
            * (m + n
                * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

        if self.north {
            (easting, northing)
        } else {
            (easting, northing + FALSE_NORTHING_SOUTH)
        }
    }

    /// Snyder eqs. 8-12 to 8-25
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let x = easting - FALSE_EASTING;
        let y = if self.north {
            northing
        } else {
            northing - FALSE_NORTHING_SOUTH
        };

        let e4 = E2 * E2;
        let e6 = e4 * E2;
        let m = y / K0;
        let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let root = (1.0 - E2).sqrt();
        let e1 = (1.0 - root) / (1.0 + root);
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin1 = phi1.sin();
        let cos1 = phi1.cos();
        let tan1 = phi1.tan();
        let c1 = E_PRIME2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let denom = 1.0 - E2 * sin1 * sin1;
        let n1 = A / denom.sqrt();
        let r1 = A * (1.0 - E2) / denom.powf(1.5);
        let d = x / (n1 * K0);

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);

        let lon = self.central_meridian()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos1;

        (lon.to_degrees(), lat.to_degrees())
    }
}

/// Meridional arc from equator to latitude `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// Build the transform taking coordinates in `src` to coordinates in `dst`.
pub fn transform_between(src: &CRS, dst: &CRS) -> Result<Box<dyn CoordinateTransform>> {
    if src.is_equivalent(dst) {
        return Ok(Box::new(IdentityTransform));
    }
    let unsupported = || Error::Alignment(format!("no coordinate transform from {} to {}", src, dst));
    let (src_code, dst_code) = match (src.epsg(), dst.epsg()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported()),
    };

    match (
        src_code == 4326,
        TransverseMercator::from_epsg(src_code),
        dst_code == 4326,
        TransverseMercator::from_epsg(dst_code),
    ) {
        (true, _, _, Some(zone)) => Ok(Box::new(Wgs84ToUtm(zone))),
        (_, Some(zone), true, _) => Ok(Box::new(UtmToWgs84(zone))),
        (_, Some(from), _, Some(to)) => Ok(Box::new(Chain(
            Box::new(UtmToWgs84(from)),
            Box::new(Wgs84ToUtm(to)),
        ))),
        _ => Err(unsupported()),
    }
}
