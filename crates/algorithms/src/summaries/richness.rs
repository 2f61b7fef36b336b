//! Species richness: number of species present per pixel

use super::{accumulate_band, aoh_rasters, group_by_species, union_grid, BandSweep, SpeciesGroup, SummaryParams};
use aohcalc_core::io::{GeoTiffTarget, OutputTarget, RasterSink};
use aohcalc_core::{GridSpec, Result};
use ndarray::{Array2, Zip};
use std::path::Path;
use tracing::{debug, info};

/// Count, per pixel of the union grid, the species with a nonzero value in
/// any of their seasons. Pixels no raster covers count as absent, so the
/// output has no no-data.
pub fn richness<T: OutputTarget>(groups: &[SpeciesGroup], params: &SummaryParams, target: &T) -> Result<GridSpec> {
    let grid = union_grid(groups)?;
    info!(species = groups.len(), width = grid.width, height = grid.height, "computing richness");

    let mut sweep = BandSweep::new(&grid, groups)?;
    let staged = target.stage(&grid, None, &mut |sink: &mut dyn RasterSink| {
        for band in params.bands(&grid) {
            let present = sweep.enter(&band, groups, params.mode)?;
            let sweep = &sweep;
            let partials = accumulate_band(
                params,
                &present,
                || Array2::<f64>::zeros(band.shape()),
                |count, group| {
                    let mut seen = Array2::from_elem(band.shape(), false);
                    for season in &group.seasons {
                        let block = sweep.read(season, &band)?;
                        Zip::from(&mut seen).and(&block).for_each(|s, &v| *s |= v != 0.0 && !v.is_nan());
                    }
                    Zip::from(count).and(&seen).for_each(|c, &s| {
                        if s {
                            *c += 1.0;
                        }
                    });
                    Ok(())
                },
            )?;
            let total = partials
                .into_iter()
                .reduce(|a, b| a + b)
                .unwrap_or_else(|| Array2::zeros(band.shape()));
            debug!(row = band.row_offset, species = present.len(), "richness band");
            sink.write_window(&band, total.view())?;
        }
        Ok(())
    })?;
    target.commit(staged)?;
    Ok(grid)
}

/// Richness of every AOH raster under `aoh_dir`, written as a GeoTIFF.
pub fn richness_from_dir(aoh_dir: &Path, output: &Path, params: &SummaryParams) -> Result<GridSpec> {
    let paths = aoh_rasters(aoh_dir)?;
    let groups = group_by_species(&paths, params.mode)?;
    richness(&groups, params, &GeoTiffTarget::new(output))
}
