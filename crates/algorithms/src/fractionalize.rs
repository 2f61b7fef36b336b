//! Habitat fractionalizer
//!
//! Splits one classified habitat map into one raster per class, each pixel
//! holding the fraction of its area covered by that class. Classes are found
//! by a discovery pass over the source. Output can stay on the source grid
//! (one-hot), be rescaled to a coarser pixel size (exact area-weighted
//! proportions) or be reprojected (proportions over a lattice of sample
//! points per output pixel).
//!
//! Each class is produced by its own worker and only read access to the
//! source is shared. Every class output is staged first; they are committed
//! together only after the per-pixel fractions have been checked to sum to
//! one.

use crate::habitat::lcc_file_name;
use aohcalc_core::crs::{transform_between, CoordinateTransform};
use aohcalc_core::io::{GeoTiffReader, GeoTiffTarget, OutputTarget, RasterSink, RasterSource};
use aohcalc_core::window::{BlockPlan, Window};
use aohcalc_core::{BoundingBox, Error, GeoTransform, GridSpec, Result, CRS};
use aohcalc_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::{Array2, Zip};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Points per source edge when projecting the source extent
const EDGE_SAMPLES: usize = 32;

/// Parameters for [`fractionalize`]
#[derive(Debug, Clone)]
pub struct FractionalizeParams {
    /// Output pixel size in target units; source pixel size if unset
    pub pixel_scale: Option<f64>,
    /// Output projection; source projection if unset
    pub target_crs: Option<CRS>,
    /// Sample points per output pixel axis when reprojecting
    pub samples_per_axis: usize,
    /// Class values treated as no-data
    pub ignore_classes: Vec<i64>,
    /// Allowed deviation of the per-pixel class sum from 1
    pub tolerance: f64,
    pub block_plan: BlockPlan,
    pub mode: ProcessingMode,
}

impl Default for FractionalizeParams {
    fn default() -> Self {
        Self {
            pixel_scale: None,
            target_crs: None,
            samples_per_axis: 4,
            ignore_classes: vec![0],
            tolerance: 1e-5,
            block_plan: BlockPlan::default(),
            mode: ProcessingMode::default(),
        }
    }
}

/// What a fractionalize run produced
#[derive(Debug, Clone)]
pub struct FractionalizeReport {
    pub classes: Vec<i64>,
    pub grid: GridSpec,
}

fn class_of(value: f64, ignore: &BTreeSet<i64>) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    let class = value as i64;
    (!ignore.contains(&class)).then_some(class)
}

/// Distinct class values of `source`, excluding no-data and `ignore`.
pub fn discover_classes(
    source: &dyn RasterSource,
    ignore: &[i64],
    plan: BlockPlan,
    mode: ProcessingMode,
) -> Result<BTreeSet<i64>> {
    let ignore: BTreeSet<i64> = ignore.iter().copied().collect();
    let grid = source.grid();
    let windows: Vec<Window> = plan.windows(grid.width, grid.height).collect();

    let found = mode.par_map(0..windows.len(), |i| -> Result<BTreeSet<i64>> {
        let block = source.read_window(&windows[i])?;
        Ok(block.iter().filter_map(|&v| class_of(v, &ignore)).collect())
    })?;

    let mut classes = BTreeSet::new();
    for set in found {
        classes.extend(set?);
    }
    Ok(classes)
}

/// How output pixels are derived from source pixels
enum Resampler {
    /// Output grid is the source grid
    Identity,
    /// Same projection, different pixel size
    Rescale,
    /// Different projection
    Reproject {
        to_source: Box<dyn CoordinateTransform>,
        samples: usize,
    },
}

fn cells(extent: f64, resolution: f64) -> usize {
    ((extent / resolution) - 1e-9).ceil().max(1.0) as usize
}

/// Output grid and resampling for `source` under `params`
fn plan_output(source: &GridSpec, params: &FractionalizeParams) -> Result<(GridSpec, Resampler)> {
    if let Some(scale) = params.pixel_scale {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidParameter {
                name: "pixel_scale",
                value: scale.to_string(),
                reason: "must be a positive number".into(),
            });
        }
    }

    let reprojection = match (&params.target_crs, &source.crs) {
        (Some(dst), Some(src)) if !src.is_equivalent(dst) => Some((src.clone(), dst.clone())),
        (Some(dst), None) => {
            return Err(Error::InvalidParameter {
                name: "target_crs",
                value: dst.to_string(),
                reason: "source raster has no projection to reproject from".into(),
            })
        }
        _ => None,
    };

    if let Some((src_crs, dst_crs)) = reprojection {
        let forward = transform_between(&src_crs, &dst_crs)?;
        let to_source = transform_between(&dst_crs, &src_crs)?;
        let bounds = projected_bounds(source, forward.as_ref())?;
        let resolution = params.pixel_scale.unwrap_or_else(|| {
            ((bounds.width() / source.width as f64) * (bounds.height() / source.height as f64)).sqrt()
        });
        let grid = GridSpec::new(
            GeoTransform::new(bounds.min_x, bounds.max_y, resolution, -resolution),
            cells(bounds.width(), resolution),
            cells(bounds.height(), resolution),
            Some(dst_crs),
        );
        return Ok((
            grid,
            Resampler::Reproject {
                to_source,
                samples: params.samples_per_axis.max(1),
            },
        ));
    }

    let gt = &source.transform;
    match params.pixel_scale {
        Some(scale) if (scale - gt.pixel_width).abs() > 1e-9 * scale || (scale + gt.pixel_height).abs() > 1e-9 * scale => {
            let bounds = source.bounds();
            let grid = GridSpec::new(
                GeoTransform::new(gt.origin_x, gt.origin_y, scale, -scale),
                cells(bounds.width(), scale),
                cells(bounds.height(), scale),
                source.crs.clone(),
            );
            Ok((grid, Resampler::Rescale))
        }
        _ => Ok((source.clone(), Resampler::Identity)),
    }
}

/// Envelope of the source extent in the target projection, from points
/// sampled along its edges.
fn projected_bounds(source: &GridSpec, forward: &dyn CoordinateTransform) -> Result<BoundingBox> {
    let b = source.bounds();
    let n = EDGE_SAMPLES as f64;
    let points = (0..=EDGE_SAMPLES).flat_map(|i| {
        let t = i as f64 / n;
        let x = b.min_x + t * b.width();
        let y = b.min_y + t * b.height();
        [(x, b.min_y), (x, b.max_y), (b.min_x, y), (b.max_x, y)]
    });
    let projected: Vec<(f64, f64)> = points.map(|(x, y)| forward.transform(x, y)).collect();
    if projected.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(Error::Alignment("source extent cannot be projected to the target CRS".into()));
    }
    BoundingBox::from_points(projected)
        .ok_or_else(|| Error::Alignment("source raster has an empty extent".into()))
}

/// A block of source pixels
struct Region {
    window: Window,
    data: Array2<f64>,
}

impl Region {
    /// Read source pixels `[col0, col1) x [row0, row1)` clipped to the source
    fn read(source: &dyn RasterSource, col0: i64, row0: i64, col1: i64, row1: i64) -> Result<Option<Region>> {
        let g = source.grid();
        let (c0, r0) = (col0.max(0), row0.max(0));
        let (c1, r1) = (col1.min(g.width as i64), row1.min(g.height as i64));
        if c1 <= c0 || r1 <= r0 {
            return Ok(None);
        }
        let window = Window::new(c0 as usize, r0 as usize, (c1 - c0) as usize, (r1 - r0) as usize);
        let data = source.read_window(&window)?;
        Ok(Some(Region { window, data }))
    }

    fn value(&self, col: i64, row: i64) -> Option<f64> {
        let c = col - self.window.col_offset as i64;
        let r = row - self.window.row_offset as i64;
        if c < 0 || r < 0 || c >= self.window.width as i64 || r >= self.window.height as i64 {
            return None;
        }
        Some(self.data[[r as usize, c as usize]])
    }
}

/// Source pixels overlapped by `[a, b)` with their overlap lengths
fn overlaps(a: f64, b: f64) -> impl Iterator<Item = (i64, f64)> {
    (a.floor() as i64..b.ceil() as i64).filter_map(move |i| {
        let w = b.min(i as f64 + 1.0) - a.max(i as f64);
        (w > 0.0).then_some((i, w))
    })
}

/// Everything a class worker needs, shared read-only
struct ClassSampler<'a> {
    source: &'a dyn RasterSource,
    output: &'a GridSpec,
    ignore: &'a BTreeSet<i64>,
    resampler: &'a Resampler,
}

impl ClassSampler<'_> {
    /// Fraction of each output pixel of `window` covered by `class`, NaN
    /// where the source has no classified pixels.
    fn fractions(&self, window: &Window, class: i64) -> Result<Array2<f64>> {
        match self.resampler {
            Resampler::Identity => {
                let block = self.source.read_window(window)?;
                Ok(block.mapv(|v| match class_of(v, self.ignore) {
                    Some(c) if c == class => 1.0,
                    Some(_) => 0.0,
                    None => f64::NAN,
                }))
            }
            Resampler::Rescale => self.rescaled(window, class),
            Resampler::Reproject { to_source, samples } => {
                self.reprojected(window, class, to_source.as_ref(), *samples)
            }
        }
    }

    fn rescaled(&self, window: &Window, class: i64) -> Result<Array2<f64>> {
        let src = &self.source.grid().transform;
        let dst = &self.output.transform;
        let (ox, oy) = src.geo_to_pixel(dst.origin_x, dst.origin_y);
        let kx = dst.pixel_width / src.pixel_width;
        let ky = dst.pixel_height / src.pixel_height;

        let mut out = Array2::from_elem(window.shape(), f64::NAN);
        let col_span = |c: usize| (ox + c as f64 * kx, ox + (c + 1) as f64 * kx);
        let row_span = |r: usize| (oy + r as f64 * ky, oy + (r + 1) as f64 * ky);

        let (x0, _) = col_span(window.col_offset);
        let (_, x1) = col_span(window.col_end() - 1);
        let (y0, _) = row_span(window.row_offset);
        let (_, y1) = row_span(window.row_end() - 1);
        let Some(region) = Region::read(
            self.source,
            x0.floor() as i64,
            y0.floor() as i64,
            x1.ceil() as i64,
            y1.ceil() as i64,
        )?
        else {
            return Ok(out);
        };

        for (r, mut out_row) in out.rows_mut().into_iter().enumerate() {
            let (ya, yb) = row_span(window.row_offset + r);
            let rows: Vec<(i64, f64)> = overlaps(ya, yb).collect();
            for (c, value) in out_row.iter_mut().enumerate() {
                let (xa, xb) = col_span(window.col_offset + c);
                let (mut valid, mut matched) = (0.0, 0.0);
                for &(sr, wy) in &rows {
                    for (sc, wx) in overlaps(xa, xb) {
                        let Some(k) = region.value(sc, sr).and_then(|v| class_of(v, self.ignore)) else {
                            continue;
                        };
                        valid += wx * wy;
                        if k == class {
                            matched += wx * wy;
                        }
                    }
                }
                if valid > 0.0 {
                    *value = matched / valid;
                }
            }
        }
        Ok(out)
    }

    fn reprojected(
        &self,
        window: &Window,
        class: i64,
        to_source: &dyn CoordinateTransform,
        samples: usize,
    ) -> Result<Array2<f64>> {
        let src = &self.source.grid().transform;
        let dst = &self.output.transform;
        let source_pixel = |col: f64, row: f64| {
            let (x, y) = dst.fractional_pixel_to_geo(col, row);
            let (sx, sy) = to_source.transform(x, y);
            src.geo_to_pixel(sx, sy)
        };

        let mut out = Array2::from_elem(window.shape(), f64::NAN);

        // source footprint of the window, from its outline, plus a pixel
        let (c0, c1) = (window.col_offset as f64, window.col_end() as f64);
        let (r0, r1) = (window.row_offset as f64, window.row_end() as f64);
        let outline = (0..=window.width)
            .flat_map(|i| [(c0 + i as f64, r0), (c0 + i as f64, r1)])
            .chain((0..=window.height).flat_map(|j| [(c0, r0 + j as f64), (c1, r0 + j as f64)]))
            .map(|(c, r)| source_pixel(c, r))
            .filter(|(c, r)| c.is_finite() && r.is_finite());
        let Some(footprint) = BoundingBox::from_points(outline) else {
            return Ok(out);
        };
        let Some(region) = Region::read(
            self.source,
            footprint.min_x.floor() as i64 - 1,
            footprint.min_y.floor() as i64 - 1,
            footprint.max_x.ceil() as i64 + 1,
            footprint.max_y.ceil() as i64 + 1,
        )?
        else {
            return Ok(out);
        };

        let step = 1.0 / samples as f64;
        for ((r, c), value) in out.indexed_iter_mut() {
            let (row, col) = ((window.row_offset + r) as f64, (window.col_offset + c) as f64);
            let (mut valid, mut matched) = (0u32, 0u32);
            for i in 0..samples {
                for j in 0..samples {
                    let (sc, sr) = source_pixel(col + (j as f64 + 0.5) * step, row + (i as f64 + 0.5) * step);
                    if !sc.is_finite() || !sr.is_finite() {
                        continue;
                    }
                    let Some(k) = region
                        .value(sc.floor() as i64, sr.floor() as i64)
                        .and_then(|v| class_of(v, self.ignore))
                    else {
                        continue;
                    };
                    valid += 1;
                    if k == class {
                        matched += 1;
                    }
                }
            }
            if valid > 0 {
                *value = matched as f64 / valid as f64;
            }
        }
        Ok(out)
    }
}

/// Check that at every pixel the staged class fractions are all no-data or
/// sum to one within `tolerance`.
fn verify_partition<T: OutputTarget>(
    staged: &[(T, T::Staged)],
    grid: &GridSpec,
    plan: BlockPlan,
    tolerance: f64,
) -> Result<()> {
    if staged.is_empty() {
        return Ok(());
    }
    let readers = staged
        .iter()
        .map(|(target, s)| target.open_staged(s))
        .collect::<Result<Vec<_>>>()?;

    for window in plan.windows(grid.width, grid.height) {
        let mut sum = Array2::<f64>::zeros(window.shape());
        let mut missing = Array2::<usize>::zeros(window.shape());
        // one class block in memory at a time
        for reader in &readers {
            let block = reader.read_window(&window)?;
            Zip::from(&mut sum)
                .and(&mut missing)
                .and(&block)
                .for_each(|s, m, &v| {
                    if v.is_nan() {
                        *m += 1;
                    } else {
                        *s += v;
                    }
                });
        }
        for ((r, c), &s) in sum.indexed_iter() {
            let m = missing[[r, c]];
            if m == readers.len() {
                continue;
            }
            if m > 0 || (s - 1.0).abs() > tolerance {
                return Err(Error::PartitionInvariant {
                    row: window.row_offset + r,
                    col: window.col_offset + c,
                    sum: if m > 0 { f64::NAN } else { s },
                });
            }
        }
    }
    debug!(classes = readers.len(), "class fractions partition every pixel");
    Ok(())
}

/// Split `source` into per-class fraction rasters, one output target per
/// class from `target_for`.
///
/// Nothing is committed unless every class was produced and the fractions
/// pass the partition check.
pub fn fractionalize<T, F>(
    source: &dyn RasterSource,
    params: &FractionalizeParams,
    target_for: F,
) -> Result<FractionalizeReport>
where
    T: OutputTarget,
    F: Fn(i64) -> T + Sync,
{
    let ignore: BTreeSet<i64> = params.ignore_classes.iter().copied().collect();
    let classes: Vec<i64> = discover_classes(source, &params.ignore_classes, params.block_plan, params.mode)?
        .into_iter()
        .collect();
    info!(classes = classes.len(), "discovered habitat classes");

    let (grid, resampler) = plan_output(source.grid(), params)?;
    let sampler = ClassSampler {
        source,
        output: &grid,
        ignore: &ignore,
        resampler: &resampler,
    };
    let plan = params.block_plan;

    let staged = params
        .mode
        .par_map(0..classes.len(), |i| -> Result<(T, T::Staged)> {
            let class = classes[i];
            info!(class, "building class layer");
            let target = target_for(class);
            let staged = target.stage(&grid, Some(f64::NAN), &mut |sink: &mut dyn RasterSink| {
                for window in plan.windows(grid.width, grid.height) {
                    let fractions = sampler.fractions(&window, class)?;
                    sink.write_window(&window, fractions.view())?;
                }
                Ok(())
            })?;
            Ok((target, staged))
        })?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    verify_partition(&staged, &grid, plan, params.tolerance)?;

    for (target, staged) in staged {
        target.commit(staged)?;
    }
    info!(classes = classes.len(), width = grid.width, height = grid.height, "class layers written");
    Ok(FractionalizeReport { classes, grid })
}

/// Fractionalize a GeoTIFF habitat map into `output_dir/lcc_{class}.tif`.
pub fn habitat_process(
    habitat_path: &Path,
    output_dir: &Path,
    params: &FractionalizeParams,
) -> Result<FractionalizeReport> {
    fs::create_dir_all(output_dir)?;
    let source = GeoTiffReader::open(habitat_path)?;
    fractionalize(&source, params, |class| {
        GeoTiffTarget::new(output_dir.join(lcc_file_name(class)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aohcalc_core::io::MemoryTarget;
    use aohcalc_core::Raster;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeMap;

    const NAN: f64 = f64::NAN;

    fn classified(data: Array2<f64>, transform: GeoTransform, crs: CRS) -> Raster<f64> {
        let mut r = Raster::from_array(data);
        r.set_transform(transform);
        r.set_crs(Some(crs));
        r
    }

    fn targets(classes: &[i64]) -> BTreeMap<i64, MemoryTarget> {
        classes.iter().map(|&c| (c, MemoryTarget::new())).collect()
    }

    fn assert_partition(outputs: &[Raster<f64>]) {
        let (rows, cols) = outputs[0].shape();
        for r in 0..rows {
            for c in 0..cols {
                let values: Vec<f64> = outputs.iter().map(|o| o.get(r, c).unwrap()).collect();
                if values.iter().all(|v| v.is_nan()) {
                    continue;
                }
                assert_abs_diff_eq!(values.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_discovery_skips_nodata_and_ignored() {
        let src = classified(
            array![[0.0, 1.0, 2.0], [NAN, 2.5, 7.0]],
            GeoTransform::new(0.0, 2.0, 1.0, -1.0),
            CRS::from_epsg(3857),
        );
        let classes = discover_classes(&src, &[0], BlockPlan::rows(1), ProcessingMode::Sequential).unwrap();
        assert_eq!(classes.into_iter().collect::<Vec<_>>(), vec![1, 2, 7]);
    }

    #[test]
    fn test_one_hot_on_source_grid() {
        let src = classified(
            array![[1.0, 2.0], [0.0, 1.0]],
            GeoTransform::new(0.0, 2.0, 1.0, -1.0),
            CRS::from_epsg(3857),
        );
        let t = targets(&[1, 2]);
        let report = fractionalize(&src, &FractionalizeParams::default(), |c| &t[&c]).unwrap();
        assert_eq!(report.classes, vec![1, 2]);

        let one = t[&1].take().unwrap();
        let two = t[&2].take().unwrap();
        assert_eq!(one.get(0, 0).unwrap(), 1.0);
        assert_eq!(two.get(0, 1).unwrap(), 1.0);
        assert_eq!(one.get(0, 1).unwrap(), 0.0);
        // class 0 is ignored, so that pixel is no-data in every output
        assert!(one.get(1, 0).unwrap().is_nan());
        assert!(two.get(1, 0).unwrap().is_nan());
        assert_partition(&[one, two]);
    }

    #[test]
    fn test_rescale_is_area_weighted() {
        let src = classified(
            array![
                [1.0, 1.0, 2.0, 2.0],
                [2.0, NAN, 2.0, 2.0],
                [3.0, 3.0, 3.0, 1.0],
                [3.0, 3.0, 1.0, 1.0],
            ],
            GeoTransform::new(0.0, 4.0, 1.0, -1.0),
            CRS::from_epsg(3857),
        );
        let params = FractionalizeParams {
            pixel_scale: Some(2.0),
            block_plan: BlockPlan::rows(1),
            ..Default::default()
        };
        let t = targets(&[1, 2, 3]);
        let report = fractionalize(&src, &params, |c| &t[&c]).unwrap();
        assert_eq!((report.grid.width, report.grid.height), (2, 2));

        let one = t[&1].take().unwrap();
        let two = t[&2].take().unwrap();
        let three = t[&3].take().unwrap();
        assert_abs_diff_eq!(one.get(0, 0).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(two.get(0, 0).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(two.get(0, 1).unwrap(), 1.0);
        assert_eq!(three.get(1, 0).unwrap(), 1.0);
        assert_abs_diff_eq!(one.get(1, 1).unwrap(), 0.75, epsilon = 1e-12);
        assert_partition(&[one, two, three]);
    }

    #[test]
    fn test_rescale_non_integer_ratio_keeps_partition() {
        let data = Array2::from_shape_fn((9, 9), |(r, c)| ((r * 3 + c * 7) % 4 + 1) as f64);
        let src = classified(data, GeoTransform::new(0.0, 9.0, 1.0, -1.0), CRS::from_epsg(3857));
        let params = FractionalizeParams {
            pixel_scale: Some(2.5),
            ..Default::default()
        };
        let t = targets(&[1, 2, 3, 4]);
        let report = fractionalize(&src, &params, |c| &t[&c]).unwrap();
        assert_eq!((report.grid.width, report.grid.height), (4, 4));
        let outputs: Vec<Raster<f64>> = t.values().map(|m| m.take().unwrap()).collect();
        assert_partition(&outputs);
    }

    #[test]
    fn test_reprojection_keeps_partition() {
        // 0.01 degree pixels near Madrid into UTM 30N at 2 km
        let data = Array2::from_shape_fn((20, 20), |(r, c)| if (r / 5 + c / 5) % 2 == 0 { 10.0 } else { 20.0 });
        let src = classified(data, GeoTransform::new(-3.8, 40.5, 0.01, -0.01), CRS::wgs84());
        let params = FractionalizeParams {
            pixel_scale: Some(2000.0),
            target_crs: Some(CRS::from_epsg(32630)),
            ..Default::default()
        };
        let t = targets(&[10, 20]);
        let report = fractionalize(&src, &params, |c| &t[&c]).unwrap();
        assert_eq!(report.grid.crs, Some(CRS::from_epsg(32630)));

        let ten = t[&10].take().unwrap();
        let twenty = t[&20].take().unwrap();
        assert!(ten.data().iter().any(|v| v.is_finite() && *v > 0.0 && *v < 1.0));
        assert_partition(&[ten, twenty]);
    }

    #[test]
    fn test_broken_partition_is_rejected_before_commit() {
        let grid = GridSpec::new(GeoTransform::new(0.0, 2.0, 1.0, -1.0), 2, 2, None);
        let a = MemoryTarget::new();
        let b = MemoryTarget::new();
        let stage = |target: &MemoryTarget, value: f64| {
            target
                .stage(&grid, None, &mut |sink: &mut dyn RasterSink| {
                    sink.write_window(&Window::full(2, 2), Array2::from_elem((2, 2), value).view())
                })
                .unwrap()
        };
        let staged = vec![(&a, stage(&a, 0.5)), (&b, stage(&b, 0.25))];
        let err = verify_partition(&staged, &grid, BlockPlan::default(), 1e-5).unwrap_err();
        assert!(matches!(err, Error::PartitionInvariant { row: 0, col: 0, .. }));
        assert!(a.take().is_none());
    }

    #[test]
    fn test_class_layers_declare_nan_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let habitat = dir.path().join("habitat.tif");
        let src = classified(
            array![[1.0, 2.0], [0.0, 1.0]],
            GeoTransform::new(0.0, 2.0, 1.0, -1.0),
            CRS::from_epsg(3857),
        );
        aohcalc_core::io::write_geotiff(&src, &habitat).unwrap();
        let layers = dir.path().join("layers");
        habitat_process(&habitat, &layers, &FractionalizeParams::default()).unwrap();

        let reader = GeoTiffReader::open(layers.join(lcc_file_name(1))).unwrap();
        assert!(reader.info().nodata.is_some_and(f64::is_nan));
        let values = reader.read_window(&Window::full(2, 2)).unwrap();
        assert_eq!(values[[0, 0]], 1.0);
        assert!(values[[1, 0]].is_nan());
    }

    #[test]
    fn test_reprojection_requires_source_crs() {
        let grid = GridSpec::new(GeoTransform::new(0.0, 2.0, 1.0, -1.0), 2, 2, None);
        let params = FractionalizeParams {
            target_crs: Some(CRS::from_epsg(32630)),
            ..Default::default()
        };
        assert!(matches!(
            plan_output(&grid, &params),
            Err(Error::InvalidParameter { name: "target_crs", .. })
        ));
    }
}
