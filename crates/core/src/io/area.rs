//! Virtual raster of per-pixel ground area

use crate::error::Result;
use crate::io::RasterSource;
use crate::raster::{GridSpec, RasterInfo};
use crate::window::Window;
use ndarray::Array2;

/// WGS84 ellipsoid parameters
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Area in square metres of each pixel of a grid.
///
/// Geographic grids get the exact ellipsoidal area of each pixel's latitude
/// band, so values vary by row only. Projected grids are assumed equal-area
/// and every pixel is `|pixel_width * pixel_height|`.
#[derive(Debug, Clone)]
pub struct PixelAreaSource {
    info: RasterInfo,
}

impl PixelAreaSource {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            info: RasterInfo::new(grid, None),
        }
    }

    /// Area of every pixel in grid row `row`
    pub fn row_area(&self, row: usize) -> f64 {
        let gt = &self.info.grid.transform;
        let geographic = self.info.grid.crs.as_ref().is_some_and(|c| c.is_geographic());
        if !geographic {
            return gt.pixel_area();
        }
        let (_, top) = gt.fractional_pixel_to_geo(0.0, row as f64);
        let (_, bottom) = gt.fractional_pixel_to_geo(0.0, row as f64 + 1.0);
        ellipsoidal_band_area(top, bottom, gt.pixel_width)
    }
}

impl RasterSource for PixelAreaSource {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        let mut out = Array2::zeros(window.shape());
        for (i, mut row) in out.rows_mut().into_iter().enumerate() {
            row.fill(self.row_area(window.row_offset + i));
        }
        Ok(out)
    }
}

/// Area between two latitudes (degrees) over `d_lon` degrees of longitude,
/// on the WGS84 ellipsoid.
///
/// Integrates the authalic term
/// `q(φ) = sin φ / (1 - e² sin² φ) + ln((1 + e sin φ) / (1 - e sin φ)) / 2e`,
/// giving `Δλ · b²/2 · |q(φ₁) - q(φ₂)|`.
pub fn ellipsoidal_band_area(lat1_deg: f64, lat2_deg: f64, d_lon_deg: f64) -> f64 {
    let e2 = 2.0 * WGS84_F - WGS84_F * WGS84_F;
    let e = e2.sqrt();
    let b2 = WGS84_A * WGS84_A * (1.0 - e2);

    let q = |lat_deg: f64| {
        let s = lat_deg.clamp(-90.0, 90.0).to_radians().sin();
        s / (1.0 - e2 * s * s) + ((1.0 + e * s) / (1.0 - e * s)).ln() / (2.0 * e)
    };

    d_lon_deg.to_radians().abs() * b2 / 2.0 * (q(lat1_deg) - q(lat2_deg)).abs()
}
