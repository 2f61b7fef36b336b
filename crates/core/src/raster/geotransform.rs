//! Affine geotransformation for rasters

use crate::raster::BoundingBox;
use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// The AOH pipeline only streams north-up grids, where both rotations are
/// zero and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Geographic coordinates of the centre of pixel (col, row)
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.fractional_pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Geographic coordinates of the top-left corner of pixel (col, row)
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        self.fractional_pixel_to_geo(col as f64, row as f64)
    }

    /// Geographic coordinates of a fractional pixel position
    pub fn fractional_pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Convert geographic coordinates to pixel coordinates
    ///
    /// Returns fractional pixel coordinates; use `.floor()` to get integer indices
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;

        if det.abs() < 1e-15 {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        (col, row)
    }

    /// Check if this is a north-up image (no rotation)
    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
            && self.pixel_width > 0.0
    }

    /// Area of one pixel in squared map units
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation).abs()
    }

    /// Transform for the grid starting `col`, `row` pixels into this one
    pub fn shifted(&self, col: i64, row: i64) -> GeoTransform {
        let (origin_x, origin_y) = self.fractional_pixel_to_geo(col as f64, row as f64);
        GeoTransform {
            origin_x,
            origin_y,
            ..*self
        }
    }

    /// Calculate the bounding box for a raster of given dimensions
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_geo_corner(0, 0),
            self.pixel_to_geo_corner(width, 0),
            self.pixel_to_geo_corner(0, height),
            self.pixel_to_geo_corner(width, height),
        ];
        BoundingBox::from_points(corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
