//! Raster geometry and grid alignment
//!
//! [`RasterInfo`] is the immutable description of an opened raster. A
//! [`GridSpec`] is the pixel grid a computation streams over; every input
//! taking part in one computation must share its pixel size, projection and
//! pixel registration. These checks run once per computation, never per block.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{BoundingBox, GeoTransform};
use serde::{Deserialize, Serialize};

/// Relative tolerance when comparing pixel sizes
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Allowed misregistration between grids, as a fraction of a pixel
const REGISTRATION_TOLERANCE: f64 = 1e-3;

/// A north-up pixel grid: geotransform, dimensions and projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub crs: Option<CRS>,
}

/// Geometry of an opened raster plus its declared no-data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub grid: GridSpec,
    pub nodata: Option<f64>,
}

impl RasterInfo {
    pub fn new(grid: GridSpec, nodata: Option<f64>) -> Self {
        Self { grid, nodata }
    }

    pub fn width(&self) -> usize {
        self.grid.width
    }

    pub fn height(&self) -> usize {
        self.grid.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.grid.transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.grid.crs.as_ref()
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid.bounds()
    }
}

impl GridSpec {
    pub fn new(transform: GeoTransform, width: usize, height: usize, crs: Option<CRS>) -> Self {
        Self {
            transform,
            width,
            height,
            crs,
        }
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Grid covering `width` x `height` pixels starting at (`col`, `row`) of this one
    pub fn subgrid(&self, col: i64, row: i64, width: usize, height: usize) -> GridSpec {
        GridSpec {
            transform: self.transform.shifted(col, row),
            width,
            height,
            crs: self.crs.clone(),
        }
    }

    /// Fail unless both grids can be streamed pixel-for-pixel together.
    pub fn check_compatible(&self, other: &GridSpec) -> Result<()> {
        self.check_projection(other)?;
        check_pixel_size("pixel width", self.transform.pixel_width, other.transform.pixel_width)?;
        check_pixel_size("pixel height", self.transform.pixel_height, other.transform.pixel_height)?;
        self.pixel_offset(other).map(|_| ())
    }

    /// Compatibility for a one-pixel-wide column raster broadcast across
    /// columns: only the projection and the row registration must agree.
    pub fn check_column_compatible(&self, column: &GridSpec) -> Result<()> {
        self.check_projection(column)?;
        check_pixel_size("pixel height", self.transform.pixel_height, column.transform.pixel_height)?;
        self.row_offset(column).map(|_| ())
    }

    fn check_projection(&self, other: &GridSpec) -> Result<()> {
        if !self.transform.is_north_up() || !other.transform.is_north_up() {
            return Err(Error::Alignment(
                "only north-up grids without rotation can be streamed".into(),
            ));
        }
        match (&self.crs, &other.crs) {
            (Some(a), Some(b)) if !a.is_equivalent(b) => {
                Err(Error::Alignment(format!("projection mismatch: {} vs {}", a, b)))
            }
            (Some(a), None) | (None, Some(a)) => Err(Error::Alignment(format!(
                "projection mismatch: {} vs an untagged grid",
                a
            ))),
            _ => Ok(()),
        }
    }

    /// Position of `other`'s top-left pixel in this grid's pixel coordinates.
    pub fn pixel_offset(&self, other: &GridSpec) -> Result<(i64, i64)> {
        let (col, _) = self
            .transform
            .geo_to_pixel(other.transform.origin_x, other.transform.origin_y);
        Ok((snap("column", col)?, self.row_offset(other)?))
    }

    /// Row of `other`'s top row in this grid's pixel coordinates.
    pub fn row_offset(&self, other: &GridSpec) -> Result<i64> {
        let (_, row) = self
            .transform
            .geo_to_pixel(other.transform.origin_x, other.transform.origin_y);
        snap("row", row)
    }

    /// Pixels shared by both grids, expressed in this grid's registration.
    ///
    /// Returns `Ok(None)` when the grids do not overlap.
    pub fn intersection(&self, other: &GridSpec) -> Result<Option<GridSpec>> {
        self.check_compatible(other)?;
        let (oc, or) = self.pixel_offset(other)?;
        let col0 = oc.max(0);
        let row0 = or.max(0);
        let col1 = (oc + other.width as i64).min(self.width as i64);
        let row1 = (or + other.height as i64).min(self.height as i64);
        if col1 <= col0 || row1 <= row0 {
            return Ok(None);
        }
        Ok(Some(self.subgrid(col0, row0, (col1 - col0) as usize, (row1 - row0) as usize)))
    }

    /// Smallest grid covering both, in this grid's registration.
    pub fn union(&self, other: &GridSpec) -> Result<GridSpec> {
        self.check_compatible(other)?;
        let (oc, or) = self.pixel_offset(other)?;
        let col0 = oc.min(0);
        let row0 = or.min(0);
        let col1 = (oc + other.width as i64).max(self.width as i64);
        let row1 = (or + other.height as i64).max(self.height as i64);
        Ok(self.subgrid(col0, row0, (col1 - col0) as usize, (row1 - row0) as usize))
    }

    /// Pixel range `(col0, row0, col1, row1)` (end-exclusive) of the pixels
    /// touched by `bbox`, snapped outward. May extend beyond the grid.
    pub fn pixel_range_for_bbox(&self, bbox: &BoundingBox) -> (i64, i64, i64, i64) {
        let (c0, r0) = self.transform.geo_to_pixel(bbox.min_x, bbox.max_y);
        let (c1, r1) = self.transform.geo_to_pixel(bbox.max_x, bbox.min_y);
        let col0 = snap_down(c0.min(c1));
        let col1 = snap_up(c0.max(c1));
        let row0 = snap_down(r0.min(r1));
        let row1 = snap_up(r0.max(r1));
        (col0, row0, col1.max(col0), row1.max(row0))
    }
}

fn check_pixel_size(what: &str, a: f64, b: f64) -> Result<()> {
    let scale = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
    if (a - b).abs() / scale > PIXEL_SIZE_TOLERANCE {
        return Err(Error::Alignment(format!("{} mismatch: {} vs {}", what, a, b)));
    }
    Ok(())
}

fn snap(axis: &str, value: f64) -> Result<i64> {
    let rounded = value.round();
    if !value.is_finite() || (value - rounded).abs() > REGISTRATION_TOLERANCE {
        return Err(Error::Alignment(format!(
            "{} offset {} is not a whole number of pixels",
            axis, value
        )));
    }
    Ok(rounded as i64)
}

fn snap_down(value: f64) -> i64 {
    let rounded = value.round();
    if (value - rounded).abs() <= REGISTRATION_TOLERANCE {
        rounded as i64
    } else {
        value.floor() as i64
    }
}

fn snap_up(value: f64) -> i64 {
    let rounded = value.round();
    if (value - rounded).abs() <= REGISTRATION_TOLERANCE {
        rounded as i64
    } else {
        value.ceil() as i64
    }
}
