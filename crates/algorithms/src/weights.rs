//! Weight layers
//!
//! Weights multiply the final AOH value of each pixel: typically a pixel
//! area raster to turn coverage into square metres, or a 0/1 mask. A raster
//! that is one pixel wide is a column raster (e.g. area per latitude row) and
//! is repeated across every column of the grid.

use aohcalc_core::io::{GeoTiffReader, RasterSource};
use aohcalc_core::window::{AlignedSource, Window};
use aohcalc_core::{GridSpec, Result};
use ndarray::Array2;
use std::path::PathBuf;

/// Open every weight raster, in order
pub fn open_weight_layers(paths: &[PathBuf]) -> Result<Vec<Box<dyn RasterSource>>> {
    paths
        .iter()
        .map(|p| GeoTiffReader::open(p).map(|r| Box::new(r) as Box<dyn RasterSource>))
        .collect()
}

/// One pixel wide, so broadcast rather than clipped against
pub fn is_column_raster(grid: &GridSpec) -> bool {
    grid.width == 1
}

/// Weight layers read through the computation grid
pub struct WeightStack<'a> {
    layers: Vec<AlignedSource<'a>>,
}

impl<'a> WeightStack<'a> {
    pub fn new(sources: &[&'a dyn RasterSource], grid: &GridSpec) -> Result<Self> {
        let layers = sources
            .iter()
            .map(|s| {
                if is_column_raster(s.grid()) && grid.width > 1 {
                    AlignedSource::column(*s, grid, 0.0)
                } else {
                    AlignedSource::new(*s, grid, 0.0)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Product of all weights over `window`; 1.0 everywhere without layers.
    /// Missing weight data counts as zero.
    pub fn read(&self, window: &Window) -> Result<Array2<f64>> {
        let mut product = Array2::from_elem(window.shape(), 1.0);
        for layer in &self.layers {
            let block = layer.read(window)?;
            product.zip_mut_with(&block, |p, &w| *p *= if w.is_nan() { 0.0 } else { w });
        }
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aohcalc_core::io::PixelAreaSource;
    use aohcalc_core::{GeoTransform, Raster, CRS};
    use ndarray::array;

    fn grid() -> GridSpec {
        GridSpec::new(GeoTransform::new(0.0, 3.0, 1.0, -1.0), 3, 3, Some(CRS::wgs84()))
    }

    #[test]
    fn test_no_weights_is_identity() {
        let stack = WeightStack::new(&[], &grid()).unwrap();
        assert_eq!(stack.read(&Window::full(3, 3)).unwrap().sum(), 9.0);
    }

    #[test]
    fn test_column_raster_broadcasts() {
        let mut column = Raster::from_array(array![[1.0], [2.0], [f64::NAN]]);
        column.set_transform(GeoTransform::new(-50.0, 3.0, 1.0, -1.0));
        column.set_crs(Some(CRS::wgs84()));

        let mut mask = Raster::from_array(array![[1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]);
        mask.set_transform(grid().transform);
        mask.set_crs(Some(CRS::wgs84()));

        let sources: Vec<&dyn RasterSource> = vec![&column, &mask];
        let stack = WeightStack::new(&sources, &grid()).unwrap();
        let product = stack.read(&Window::full(3, 3)).unwrap();
        assert_eq!(product, array![[1.0, 0.0, 1.0], [2.0, 2.0, 2.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_area_weight() {
        let area = PixelAreaSource::new(grid());
        let sources: Vec<&dyn RasterSource> = vec![&area];
        let product = WeightStack::new(&sources, &grid()).unwrap().read(&Window::new(0, 1, 3, 1)).unwrap();
        assert_eq!(product[[0, 0]], area.row_area(1));
    }

    #[test]
    fn test_misaligned_weight_fails() {
        let mut shifted = Raster::filled(3, 3, 1.0);
        shifted.set_transform(GeoTransform::new(0.5, 3.0, 1.0, -1.0));
        shifted.set_crs(Some(CRS::wgs84()));
        let sources: Vec<&dyn RasterSource> = vec![&shifted];
        assert!(WeightStack::new(&sources, &grid()).is_err());
    }
}
