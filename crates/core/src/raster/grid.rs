//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::{RasterSink, RasterSource};
use crate::raster::{BoundingBox, GeoTransform, GridSpec, RasterElement, RasterInfo};
use crate::window::Window;
use ndarray::{s, Array2, ArrayView2};

/// A georeferenced 2D raster held in memory.
///
/// `Raster<T>` is the in-memory counterpart of a file-backed raster: it
/// answers the same window reads, and accepts window writes, so small inputs
/// and test fixtures can flow through the streaming engine unchanged.
///
/// # Example
///
/// ```ignore
/// use aohcalc_core::Raster;
///
/// let mut raster: Raster<f32> = Raster::new(100, 100);
/// raster.set(10, 20, 42.0)?;
/// let value = raster.get(10, 20)?;
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    /// Grid geometry, with the no-data value widened to f64
    info: RasterInfo,
    /// No-data value
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster covering `grid`, filled with `value`
    pub fn with_grid(grid: GridSpec, value: T) -> Self {
        let data = Array2::from_elem((grid.height, grid.width), value);
        Self {
            data,
            info: RasterInfo::new(grid, None),
            nodata: None,
        }
    }

    /// Create a raster from existing data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        let (rows, cols) = data.dim();
        Self {
            data,
            info: RasterInfo::new(GridSpec::new(GeoTransform::default(), cols, rows, None), None),
            nodata: None,
        }
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.data.nrows(),
                cols: self.data.ncols(),
            }),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    /// Consume the raster and return the underlying array
    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.info.grid.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.info.grid.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.info.grid.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.info.grid.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
        self.info.nodata = nodata.and_then(|v| num_traits::cast(v));
    }

    /// Pixel grid of this raster
    pub fn grid(&self) -> &GridSpec {
        &self.info.grid
    }

    /// Geographic bounds of the raster
    pub fn bounds(&self) -> BoundingBox {
        self.info.bounds()
    }

    // Coordinate conversion

    /// Centre of pixel (col, row) in map coordinates
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform().pixel_to_geo(col, row)
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.transform().geo_to_pixel(x, y)
    }

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    fn check_window(&self, window: &Window) -> Result<()> {
        if window.col_end() > self.cols() || window.row_end() > self.rows() {
            return Err(Error::IndexOutOfBounds {
                row: window.row_end(),
                col: window.col_end(),
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(())
    }
}

impl<T: RasterElement> RasterSource for Raster<T> {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        self.check_window(window)?;
        let nodata = self.nodata;
        Ok(self
            .data
            .slice(s![
                window.row_offset..window.row_end(),
                window.col_offset..window.col_end()
            ])
            .mapv(|v| v.to_window_value(nodata)))
    }
}

impl<T: RasterElement> RasterSink for Raster<T> {
    fn write_window(&mut self, window: &Window, data: ArrayView2<'_, f64>) -> Result<()> {
        self.check_window(window)?;
        if data.dim() != window.shape() {
            let (er, ec) = window.shape();
            let (ar, ac) = data.dim();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        self.data
            .slice_mut(s![
                window.row_offset..window.row_end(),
                window.col_offset..window.col_end()
            ])
            .zip_mut_with(&data, |cell, &v| *cell = T::from_window_value(v));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.grid().width, 200);
        assert_eq!(raster.grid().height, 100);
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.set(10, 0, 1.0).is_err());
    }

    #[test]
    fn test_window_read_maps_nodata_to_nan() {
        let mut raster: Raster<i32> = Raster::from_vec(vec![1, 2, 3, -9, 5, 6], 2, 3).unwrap();
        raster.set_nodata(Some(-9));
        assert_eq!(raster.info().nodata, Some(-9.0));

        let block = raster.read_window(&Window::new(0, 1, 2, 1)).unwrap();
        assert!(block[[0, 0]].is_nan());
        assert_eq!(block[[0, 1]], 5.0);
    }

    #[test]
    fn test_window_write() {
        let mut raster: Raster<f64> = Raster::new(4, 4);
        let block = Array2::from_elem((2, 3), 7.0);
        raster.write_window(&Window::new(1, 2, 3, 2), block.view()).unwrap();
        assert_eq!(raster.get(2, 1).unwrap(), 7.0);
        assert_eq!(raster.get(3, 3).unwrap(), 7.0);
        assert_eq!(raster.get(1, 1).unwrap(), 0.0);

        let too_wide = Array2::from_elem((2, 4), 1.0);
        assert!(raster.write_window(&Window::new(1, 2, 3, 2), too_wide.view()).is_err());
    }
}
