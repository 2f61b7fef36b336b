//! Elevation filter
//!
//! A single DEM includes a pixel when its elevation lies inside the species'
//! bounds. A min/max DEM pair, used when working at coarse resolution,
//! includes a pixel when the species' interval overlaps the pixel's
//! elevation range, which never excludes more than a single DEM would.

use aohcalc_core::io::{GeoTiffReader, RasterSource};
use aohcalc_core::window::{AlignedSource, Window};
use aohcalc_core::{Error, GridSpec, Result};
use ndarray::{Array2, Zip};
use std::path::PathBuf;

/// Where elevation data comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ElevationSource {
    Single(PathBuf),
    MinMax { min: PathBuf, max: PathBuf },
}

impl ElevationSource {
    /// Exactly one of a single DEM or a complete min/max pair must be given.
    pub fn from_options(dem: Option<PathBuf>, min: Option<PathBuf>, max: Option<PathBuf>) -> Result<Self> {
        match (dem, min, max) {
            (Some(dem), None, None) => Ok(ElevationSource::Single(dem)),
            (None, Some(min), Some(max)) => Ok(ElevationSource::MinMax { min, max }),
            (None, None, None) => Err(Error::InputMode(
                "an elevation map or a min/max elevation pair is required".into(),
            )),
            (Some(_), _, _) => Err(Error::InputMode(
                "give either a single elevation map or a min/max pair, not both".into(),
            )),
            _ => Err(Error::InputMode(
                "min/max elevation maps must be given together".into(),
            )),
        }
    }

    pub fn open(&self) -> Result<ElevationLayer> {
        match self {
            ElevationSource::Single(path) => Ok(ElevationLayer::Single(Box::new(GeoTiffReader::open(path)?))),
            ElevationSource::MinMax { min, max } => Ok(ElevationLayer::MinMax {
                min: Box::new(GeoTiffReader::open(min)?),
                max: Box::new(GeoTiffReader::open(max)?),
            }),
        }
    }

    /// Paths for the manifest
    pub fn describe(&self) -> Vec<String> {
        match self {
            ElevationSource::Single(p) => vec![p.display().to_string()],
            ElevationSource::MinMax { min, max } => {
                vec![min.display().to_string(), max.display().to_string()]
            }
        }
    }
}

/// Opened elevation rasters
pub enum ElevationLayer {
    Single(Box<dyn RasterSource>),
    MinMax {
        min: Box<dyn RasterSource>,
        max: Box<dyn RasterSource>,
    },
}

impl ElevationLayer {
    pub fn grids(&self) -> Vec<&GridSpec> {
        match self {
            ElevationLayer::Single(dem) => vec![dem.grid()],
            ElevationLayer::MinMax { min, max } => vec![min.grid(), max.grid()],
        }
    }

    /// Bind to the computation grid with the species' bounds.
    pub fn filter(&self, grid: &GridSpec, lower: f64, upper: f64) -> Result<ElevationFilter<'_>> {
        let (low, high) = match self {
            ElevationLayer::Single(dem) => {
                let dem = AlignedSource::new(dem.as_ref(), grid, f64::NAN)?;
                (dem, None)
            }
            ElevationLayer::MinMax { min, max } => (
                AlignedSource::new(min.as_ref(), grid, f64::NAN)?,
                Some(AlignedSource::new(max.as_ref(), grid, f64::NAN)?),
            ),
        };
        Ok(ElevationFilter {
            low,
            high,
            lower,
            upper,
        })
    }
}

/// Per-pixel inclusion test against a species' elevation bounds
pub struct ElevationFilter<'a> {
    low: AlignedSource<'a>,
    /// Present for a min/max pair
    high: Option<AlignedSource<'a>>,
    lower: f64,
    upper: f64,
}

impl ElevationFilter<'_> {
    /// 1.0 where included, 0.0 elsewhere. Pixels without elevation data are
    /// excluded.
    pub fn read(&self, window: &Window) -> Result<Array2<f64>> {
        let (lower, upper) = (self.lower, self.upper);
        let low = self.low.read(window)?;
        let mask = match &self.high {
            None => low.mapv(|z| inclusion(lower <= z && z <= upper)),
            Some(high) => {
                let high = high.read(window)?;
                Zip::from(&low)
                    .and(&high)
                    .map_collect(|&zmin, &zmax| inclusion(lower <= zmax && upper >= zmin))
            }
        };
        Ok(mask)
    }
}

// NaN comparisons are false, so missing data is never included
fn inclusion(included: bool) -> f64 {
    if included {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aohcalc_core::{GeoTransform, Raster};
    use ndarray::array;

    fn dem(data: Array2<f64>) -> Box<dyn RasterSource> {
        let mut r = Raster::from_array(data);
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        Box::new(r)
    }

    #[test]
    fn test_single_dem_bounds_are_inclusive() {
        let layer = ElevationLayer::Single(dem(array![[100.0, 200.0], [300.0, f64::NAN]]));
        let grid = layer.grids()[0].clone();
        let mask = layer.filter(&grid, 200.0, 300.0).unwrap().read(&Window::full(2, 2)).unwrap();
        assert_eq!(mask, array![[0.0, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_open_bounds() {
        let layer = ElevationLayer::Single(dem(array![[-1e4, 0.0], [1e4, 5.0]]));
        let grid = layer.grids()[0].clone();
        let mask = layer
            .filter(&grid, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap()
            .read(&Window::full(2, 2))
            .unwrap();
        assert_eq!(mask.sum(), 4.0);
    }

    #[test]
    fn test_min_max_pair_is_more_permissive() {
        // pixel ranges: [0,100] [150,400] [500,900] [50,120]
        let min = array![[0.0, 150.0], [500.0, 50.0]];
        let max = array![[100.0, 400.0], [900.0, 120.0]];
        let mean = (&min + &max) / 2.0;

        let pair = ElevationLayer::MinMax {
            min: dem(min),
            max: dem(max),
        };
        let grid = pair.grids()[0].clone();
        let pair_mask = pair.filter(&grid, 90.0, 160.0).unwrap().read(&Window::full(2, 2)).unwrap();
        assert_eq!(pair_mask, array![[1.0, 1.0], [0.0, 1.0]]);

        let single = ElevationLayer::Single(dem(mean));
        let single_mask = single.filter(&grid, 90.0, 160.0).unwrap().read(&Window::full(2, 2)).unwrap();
        assert!(single_mask.iter().zip(pair_mask.iter()).all(|(s, p)| s <= p));
    }

    #[test]
    fn test_source_modes() {
        let p = |s: &str| Some(PathBuf::from(s));
        assert!(matches!(
            ElevationSource::from_options(p("dem.tif"), None, None),
            Ok(ElevationSource::Single(_))
        ));
        assert!(matches!(
            ElevationSource::from_options(None, p("min.tif"), p("max.tif")),
            Ok(ElevationSource::MinMax { .. })
        ));
        assert!(matches!(
            ElevationSource::from_options(p("dem.tif"), p("min.tif"), p("max.tif")),
            Err(Error::InputMode(_))
        ));
        assert!(matches!(
            ElevationSource::from_options(None, p("min.tif"), None),
            Err(Error::InputMode(_))
        ));
        assert!(matches!(ElevationSource::from_options(None, None, None), Err(Error::InputMode(_))));
    }
}
