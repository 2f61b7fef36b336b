//! Endemism: per-pixel geometric mean of each present species' share of its
//! own AOH.
//!
//! A seasonal raster contributes `ln(value / total)` at each pixel where it is
//! positive; a species takes the largest of its seasonal terms. The pixel
//! value is `exp(mean of species terms)` wherever richness is positive.
//! Seasons whose total is zero have no share anywhere and are left out
//! entirely, not counted as zero.

use super::{accumulate_band, aoh_rasters, group_by_species, BandSweep, SpeciesGroup, SummaryParams};
use aohcalc_core::io::{GeoTiffReader, GeoTiffTarget, OutputTarget, RasterSink, RasterSource};
use aohcalc_core::window::summarize;
use aohcalc_core::{GridSpec, Result};
use aohcalc_parallel::ParallelStrategy;
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Streamed total of every seasonal raster, keyed by path.
pub fn species_totals(groups: &[SpeciesGroup], params: &SummaryParams) -> Result<BTreeMap<PathBuf, f64>> {
    let paths: Vec<&PathBuf> = groups.iter().flat_map(|g| g.seasons.iter().map(|s| &s.path)).collect();
    params
        .mode
        .par_map(0..paths.len(), |i| -> Result<(PathBuf, f64)> {
            let reader = GeoTiffReader::open(paths[i])?;
            let stats = summarize(&reader, params.block_plan)?;
            Ok((paths[i].clone(), stats.sum))
        })?
        .into_iter()
        .collect()
}

/// Per-worker accumulator for one band
struct TermSum {
    sum: Array2<f64>,
    count: Array2<f64>,
}

impl TermSum {
    fn zeros(shape: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(shape),
            count: Array2::zeros(shape),
        }
    }

    fn merge(mut self, other: TermSum) -> Self {
        self.sum += &other.sum;
        self.count += &other.count;
        self
    }
}

/// Endemism over the grid of `richness`, written to `target`.
pub fn endemism<T: OutputTarget>(
    richness: &dyn RasterSource,
    groups: &[SpeciesGroup],
    params: &SummaryParams,
    target: &T,
) -> Result<GridSpec> {
    let grid = richness.grid().clone();
    let totals = species_totals(groups, params)?;

    // seasons with no area have no share to take a log of
    let groups: Vec<SpeciesGroup> = groups
        .iter()
        .filter_map(|g| {
            let seasons: Vec<_> = g
                .seasons
                .iter()
                .filter(|s| totals.get(&s.path).is_some_and(|&t| t > 0.0))
                .cloned()
                .collect();
            if seasons.len() < g.seasons.len() {
                debug!(id_no = g.id_no, excluded = g.seasons.len() - seasons.len(), "zero-total seasons excluded");
            }
            (!seasons.is_empty()).then(|| SpeciesGroup { id_no: g.id_no, seasons })
        })
        .collect();
    info!(species = groups.len(), width = grid.width, height = grid.height, "computing endemism");

    let mut sweep = BandSweep::new(&grid, &groups)?;
    let staged = target.stage(&grid, Some(f64::NAN), &mut |sink: &mut dyn RasterSink| {
        for band in params.bands(&grid) {
            let present = sweep.enter(&band, &groups, params.mode)?;
            let sweep = &sweep;
            let partials = accumulate_band(
                params,
                &present,
                || TermSum::zeros(band.shape()),
                |acc, group| {
                    let mut term = Array2::from_elem(band.shape(), f64::NEG_INFINITY);
                    for season in &group.seasons {
                        let total = totals.get(&season.path).copied().unwrap_or(0.0);
                        let block = sweep.read(season, &band)?;
                        Zip::from(&mut term).and(&block).for_each(|t, &v| {
                            if v > 0.0 {
                                *t = t.max((v / total).ln());
                            }
                        });
                    }
                    Zip::from(&mut acc.sum)
                        .and(&mut acc.count)
                        .and(&term)
                        .for_each(|s, c, &t| {
                            if t.is_finite() {
                                *s += t;
                                *c += 1.0;
                            }
                        });
                    Ok(())
                },
            )?;
            let merged = partials
                .into_iter()
                .reduce(TermSum::merge)
                .unwrap_or_else(|| TermSum::zeros(band.shape()));

            let richness_band = richness.read_window(&band)?;
            let mut out = Array2::from_elem(band.shape(), f64::NAN);
            Zip::from(&mut out)
                .and(&merged.sum)
                .and(&merged.count)
                .and(&richness_band)
                .for_each(|o, &s, &c, &r| {
                    if r > 0.0 && c > 0.0 {
                        *o = (s / c).exp();
                    }
                });
            sink.write_window(&band, out.view())?;
        }
        Ok(())
    })?;
    target.commit(staged)?;
    Ok(grid)
}

/// Endemism of every AOH raster under `aoh_dir` given a richness GeoTIFF.
pub fn endemism_from_dir(aoh_dir: &Path, richness_path: &Path, output: &Path, params: &SummaryParams) -> Result<GridSpec> {
    let richness = GeoTiffReader::open(richness_path)?;
    let paths = aoh_rasters(aoh_dir)?;
    let groups = group_by_species(&paths, params.mode)?;
    endemism(&richness, &groups, params, &GeoTiffTarget::new(output))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::write_aoh;
    use super::super::{richness, union_grid};
    use super::*;
    use aohcalc_core::io::MemoryTarget;
    use aohcalc_core::window::BlockPlan;
    use aohcalc_core::Raster;
    use aohcalc_parallel::ProcessingMode;
    use approx::assert_relative_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn groups_in(dir: &Path) -> Vec<SpeciesGroup> {
        group_by_species(&aoh_rasters(dir).unwrap(), ProcessingMode::Sequential).unwrap()
    }

    fn richness_of(groups: &[SpeciesGroup]) -> Raster<f64> {
        let target = MemoryTarget::new();
        richness(groups, &SummaryParams::default(), &target).unwrap();
        target.take().unwrap()
    }

    fn endemism_of(richness: &Raster<f64>, groups: &[SpeciesGroup], params: SummaryParams) -> Raster<f64> {
        let target = MemoryTarget::new();
        endemism(richness, groups, &params, &target).unwrap();
        target.take().unwrap()
    }

    #[test]
    fn test_geometric_mean_of_shares() {
        let dir = tempdir().unwrap();
        // species 1: total 4, species 2: total 2
        write_aoh(dir.path(), "1_resident.tif", 0, 0, array![[1.0, 3.0]]);
        write_aoh(dir.path(), "2_resident.tif", 1, 0, array![[2.0, 0.0]]);
        let groups = groups_in(dir.path());
        let rich = richness_of(&groups);
        let out = endemism_of(&rich, &groups, SummaryParams::default());

        assert_relative_eq!(out.get(0, 0).unwrap(), 0.25, epsilon = 1e-12);
        // sqrt(3/4 * 2/2)
        assert_relative_eq!(out.get(0, 1).unwrap(), (0.75f64).sqrt(), epsilon = 1e-12);
        assert!(out.get(0, 2).unwrap().is_nan());
    }

    #[test]
    fn test_species_takes_its_largest_seasonal_share() {
        let dir = tempdir().unwrap();
        write_aoh(dir.path(), "5_breeding.tif", 0, 0, array![[1.0, 1.0]]);
        write_aoh(dir.path(), "5_nonbreeding.tif", 0, 0, array![[1.0, 0.0]]);
        let groups = groups_in(dir.path());
        let rich = richness_of(&groups);
        let out = endemism_of(&rich, &groups, SummaryParams::default());

        assert_relative_eq!(out.get(0, 0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.get(0, 1).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_total_species_is_excluded() {
        let with_zero = tempdir().unwrap();
        let without = tempdir().unwrap();
        for dir in [with_zero.path(), without.path()] {
            write_aoh(dir, "1_resident.tif", 0, 0, array![[1.0, 3.0], [0.0, 2.0]]);
            write_aoh(dir, "2_breeding.tif", 1, 0, array![[2.0], [5.0]]);
        }
        write_aoh(with_zero.path(), "3_resident.tif", 0, 0, Array2::zeros((2, 2)));

        let groups_a = groups_in(with_zero.path());
        let groups_b = groups_in(without.path());
        assert_eq!(union_grid(&groups_a).unwrap(), union_grid(&groups_b).unwrap());
        let rich = richness_of(&groups_b);

        let a = endemism_of(&rich, &groups_a, SummaryParams::default());
        let b = endemism_of(&rich, &groups_b, SummaryParams::default());
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert!(x == y || (x.is_nan() && y.is_nan()));
        }
        assert!(a.data().iter().any(|v| v.is_finite()));
    }

    #[test]
    fn test_written_raster_declares_nan_nodata() {
        let dir = tempdir().unwrap();
        let aohs = dir.path().join("aohs");
        std::fs::create_dir_all(&aohs).unwrap();
        write_aoh(&aohs, "1_resident.tif", 0, 0, array![[1.0, 0.0]]);
        let richness_path = dir.path().join("richness.tif");
        let output = dir.path().join("endemism.tif");
        super::super::richness_from_dir(&aohs, &richness_path, &SummaryParams::default()).unwrap();
        endemism_from_dir(&aohs, &richness_path, &output, &SummaryParams::default()).unwrap();

        let reader = GeoTiffReader::open(&output).unwrap();
        assert!(reader.info().nodata.is_some_and(f64::is_nan));
        let values = reader.read_window(&aohcalc_core::window::Window::full(2, 1)).unwrap();
        assert_relative_eq!(values[[0, 0]], 1.0, epsilon = 1e-12);
        assert!(values[[0, 1]].is_nan());
    }

    #[test]
    fn test_banded_parallel_matches_sequential() {
        let dir = tempdir().unwrap();
        for id in 0..5 {
            let data = Array2::from_shape_fn((6, 3), |(r, c)| ((r * 2 + c + id) % 4) as f64);
            write_aoh(dir.path(), &format!("{}_resident.tif", id + 1), id % 2, id % 3, data);
        }
        let groups = groups_in(dir.path());
        let rich = richness_of(&groups);
        let whole = endemism_of(&rich, &groups, SummaryParams::default());
        let banded = endemism_of(
            &rich,
            &groups,
            SummaryParams {
                block_plan: BlockPlan::rows(2),
                mode: ProcessingMode::ParallelWith(2),
            },
        );
        for (x, y) in whole.data().iter().zip(banded.data().iter()) {
            if x.is_nan() {
                assert!(y.is_nan());
            } else {
                assert_relative_eq!(*x, *y, max_relative = 1e-12);
            }
        }
    }
}
