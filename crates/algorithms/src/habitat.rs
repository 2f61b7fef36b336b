//! Habitat suitability layer
//!
//! Classified habitat maps give 1.0 where the pixel's class is one of the
//! species' resolved values. Fractional maps are a directory holding one
//! `lcc_{value}.tif` raster per class; suitability is the sum of the matching
//! rasters, which is left unclamped so that stacked habitats in one pixel
//! (marine depth bands, mixed land use) keep their full weight.

use aohcalc_core::io::{GeoTiffReader, RasterSource};
use aohcalc_core::window::{AlignedSource, Window};
use aohcalc_core::{Error, GridSpec, Result};
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the fractional raster for one class
pub fn lcc_file_name(value: i64) -> String {
    format!("lcc_{}.tif", value)
}

/// Class value encoded in an `lcc_{value}.tif` file name
pub fn parse_lcc_file_name(name: &str) -> Option<i64> {
    let value = name.strip_prefix("lcc_")?.strip_suffix(".tif")?;
    if let Ok(v) = value.parse::<i64>() {
        return Some(v);
    }
    let v = value.parse::<f64>().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

/// Every `lcc_{value}.tif` in `dir`, keyed by class value
pub fn fractional_layer_paths(dir: impl AsRef<Path>) -> Result<BTreeMap<i64, PathBuf>> {
    let mut layers = BTreeMap::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let value = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_lcc_file_name);
        if let Some(value) = value {
            layers.insert(value, path);
        }
    }
    Ok(layers)
}

/// Where habitat data comes from
#[derive(Debug, Clone, PartialEq)]
pub enum HabitatSource {
    /// One raster of discrete class values
    Classified(PathBuf),
    /// A directory of `lcc_{value}.tif` per-class fraction rasters
    Fractional(PathBuf),
}

impl HabitatSource {
    /// Exactly one of the two inputs must be given.
    pub fn from_options(classified: Option<PathBuf>, fractional_dir: Option<PathBuf>) -> Result<Self> {
        match (classified, fractional_dir) {
            (Some(path), None) => Ok(HabitatSource::Classified(path)),
            (None, Some(dir)) => Ok(HabitatSource::Fractional(dir)),
            (Some(_), Some(_)) => Err(Error::InputMode(
                "give either a classified habitat map or a fractional habitat directory, not both".into(),
            )),
            (None, None) => Err(Error::InputMode(
                "a classified habitat map or a fractional habitat directory is required".into(),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            HabitatSource::Classified(p) | HabitatSource::Fractional(p) => p,
        }
    }

    /// Open the rasters needed for the resolved class `values`.
    ///
    /// Fractional classes with no raster in the directory are skipped: they
    /// contribute zero everywhere.
    pub fn open(&self, values: &BTreeSet<i64>) -> Result<HabitatLayer> {
        match self {
            HabitatSource::Classified(path) => Ok(HabitatLayer::classified(
                Box::new(GeoTiffReader::open(path)?),
                values.clone(),
            )),
            HabitatSource::Fractional(dir) => {
                let available = fractional_layer_paths(dir)?;
                let mut layers: Vec<(i64, Box<dyn RasterSource>)> = Vec::new();
                for value in values {
                    match available.get(value) {
                        Some(path) => {
                            let reader: Box<dyn RasterSource> = Box::new(GeoTiffReader::open(path)?);
                            layers.push((*value, reader));
                        }
                        None => debug!(value, dir = %dir.display(), "no fractional layer for class"),
                    }
                }
                Ok(HabitatLayer::fractional(layers))
            }
        }
    }
}

/// Opened habitat rasters for one species
pub enum HabitatLayer {
    Classified {
        source: Box<dyn RasterSource>,
        values: BTreeSet<i64>,
    },
    Fractional {
        layers: Vec<(i64, Box<dyn RasterSource>)>,
    },
}

impl HabitatLayer {
    pub fn classified(source: Box<dyn RasterSource>, values: BTreeSet<i64>) -> Self {
        HabitatLayer::Classified { source, values }
    }

    pub fn fractional(layers: Vec<(i64, Box<dyn RasterSource>)>) -> Self {
        HabitatLayer::Fractional { layers }
    }

    /// Grids of the opened rasters; the computation is clipped to them
    pub fn grids(&self) -> Vec<&GridSpec> {
        match self {
            HabitatLayer::Classified { source, .. } => vec![source.grid()],
            HabitatLayer::Fractional { layers } => layers.iter().map(|(_, s)| s.grid()).collect(),
        }
    }

    /// Bind to the computation grid. Fails if any raster is misaligned.
    pub fn align(&self, grid: &GridSpec) -> Result<AlignedHabitat<'_>> {
        match self {
            HabitatLayer::Classified { source, values } => Ok(AlignedHabitat::Classified {
                source: AlignedSource::new(source.as_ref(), grid, f64::NAN)?,
                values,
            }),
            HabitatLayer::Fractional { layers } => Ok(AlignedHabitat::Fractional {
                layers: layers
                    .iter()
                    .map(|(_, s)| AlignedSource::new(s.as_ref(), grid, 0.0))
                    .collect::<Result<Vec<_>>>()?,
            }),
        }
    }
}

/// Habitat rasters read through the computation grid
pub enum AlignedHabitat<'a> {
    Classified {
        source: AlignedSource<'a>,
        values: &'a BTreeSet<i64>,
    },
    Fractional {
        layers: Vec<AlignedSource<'a>>,
    },
}

impl AlignedHabitat<'_> {
    /// Suitability of every pixel of `window`. No-data counts as unsuitable.
    pub fn read(&self, window: &Window) -> Result<Array2<f64>> {
        match self {
            AlignedHabitat::Classified { source, values } => {
                let classes = source.read(window)?;
                Ok(classes.mapv(|v| {
                    if v.is_finite() && v.fract() == 0.0 && values.contains(&(v as i64)) {
                        1.0
                    } else {
                        0.0
                    }
                }))
            }
            AlignedHabitat::Fractional { layers } => {
                let mut total = Array2::zeros(window.shape());
                for layer in layers {
                    let block = layer.read(window)?;
                    total.zip_mut_with(&block, |t, &v| {
                        if v.is_finite() {
                            *t += v;
                        }
                    });
                }
                Ok(total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aohcalc_core::{GeoTransform, Raster, CRS};
    use ndarray::array;

    fn raster(data: Array2<f64>) -> Box<dyn RasterSource> {
        let mut r = Raster::from_array(data);
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        r.set_crs(Some(CRS::wgs84()));
        Box::new(r)
    }

    #[test]
    fn test_input_mode_is_exclusive() {
        let a = Some(PathBuf::from("a.tif"));
        let d = Some(PathBuf::from("dir"));
        assert!(matches!(HabitatSource::from_options(a.clone(), d), Err(Error::InputMode(_))));
        assert!(matches!(HabitatSource::from_options(None, None), Err(Error::InputMode(_))));
        assert_eq!(
            HabitatSource::from_options(a, None).unwrap(),
            HabitatSource::Classified(PathBuf::from("a.tif"))
        );
    }

    #[test]
    fn test_lcc_names() {
        assert_eq!(lcc_file_name(14), "lcc_14.tif");
        assert_eq!(parse_lcc_file_name("lcc_14.tif"), Some(14));
        assert_eq!(parse_lcc_file_name("lcc_14.0.tif"), Some(14));
        assert_eq!(parse_lcc_file_name("lcc_x.tif"), None);
        assert_eq!(parse_lcc_file_name("dem.tif"), None);
    }

    #[test]
    fn test_classified_membership() {
        let layer = HabitatLayer::classified(
            raster(array![[1.0, 2.0], [3.0, f64::NAN]]),
            [1, 3].into_iter().collect(),
        );
        let grid = layer.grids()[0].clone();
        let suit = layer.align(&grid).unwrap().read(&Window::full(2, 2)).unwrap();
        assert_eq!(suit, array![[1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_fractional_sum_is_not_clamped() {
        let layer = HabitatLayer::fractional(vec![
            (10, raster(array![[0.5, 0.75], [0.0, f64::NAN]])),
            (11, raster(array![[0.75, 0.0], [0.25, 0.5]])),
        ]);
        let grid = layer.grids()[0].clone();
        let suit = layer.align(&grid).unwrap().read(&Window::full(2, 2)).unwrap();
        assert_eq!(suit, array![[1.25, 0.75], [0.25, 0.5]]);
    }

    #[test]
    fn test_fractional_without_layers_is_zero() {
        let layer = HabitatLayer::fractional(vec![]);
        let grid = GridSpec::new(GeoTransform::new(0.0, 2.0, 1.0, -1.0), 2, 2, None);
        let suit = layer.align(&grid).unwrap().read(&Window::full(2, 2)).unwrap();
        assert_eq!(suit.sum(), 0.0);
    }

    #[test]
    fn test_open_skips_missing_fraction_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = Raster::filled(2, 2, 0.5f32);
        r.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        aohcalc_core::io::write_geotiff(&r, dir.path().join(lcc_file_name(7))).unwrap();

        let source = HabitatSource::Fractional(dir.path().to_path_buf());
        let layer = source.open(&[7, 8].into_iter().collect()).unwrap();
        assert_eq!(layer.grids().len(), 1);
    }
}
