//! Area of Habitat compositor
//!
//! Per pixel:
//!
//! ```text
//! aoh = range × habitat × elevation × Π weights
//! ```
//!
//! streamed window by window over the range footprint clipped to the
//! basemaps. Totals are accumulated in the same pass. If the habitat filter
//! removes everything while the range is non-empty, the habitat term is
//! dropped and a second pass is run as IUCN RLTWG guidance requires, unless
//! `force_habitat` asks for the zero result to stand.

use crate::elevation::{ElevationFilter, ElevationLayer};
use crate::habitat::{AlignedHabitat, HabitatLayer};
use crate::range::{RangeRaster, Warning};
use crate::species::{SpeciesRecord, TidyParams};
use crate::weights::{is_column_raster, WeightStack};
use aohcalc_core::io::{OutputTarget, PixelAreaSource, RasterSink, RasterSource};
use aohcalc_core::window::{AlignedSource, BlockPlan, Window};
use aohcalc_core::{Error, GridSpec, Result};
use ndarray::{Array2, Zip};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Parameters for [`compute_aoh`]
#[derive(Debug, Clone)]
pub struct AohParams {
    /// Keep a zero habitat result instead of falling back to the range
    pub force_habitat: bool,
    /// Weight every pixel by its area in square metres
    pub multiply_by_area_per_pixel: bool,
    /// Range coverage samples per pixel axis; 1 burns pixel centres only
    pub range_samples: usize,
    /// Clean up elevation bounds before filtering
    pub tidy: Option<TidyParams>,
    pub block_plan: BlockPlan,
}

impl Default for AohParams {
    fn default() -> Self {
        Self {
            force_habitat: false,
            multiply_by_area_per_pixel: false,
            range_samples: 1,
            tidy: None,
            block_plan: BlockPlan::default(),
        }
    }
}

/// Area sums of one computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AohTotals {
    /// Range alone
    pub range_total: f64,
    /// Range filtered by habitat only
    pub hab_total: f64,
    /// Range filtered by elevation only
    pub dem_total: f64,
    /// The written result
    pub aoh_total: f64,
}

impl AohTotals {
    /// `aoh_total / range_total`, zero for an empty range
    pub fn prevalence(&self) -> f64 {
        if self.range_total > 0.0 {
            self.aoh_total / self.range_total
        } else {
            0.0
        }
    }
}

/// Which product a pass writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    /// range × habitat × elevation × weights
    Normal,
    /// range × elevation × weights
    Fallback,
}

/// The opened inputs of one computation
pub struct AohLayers<'a> {
    pub habitat: &'a HabitatLayer,
    pub elevation: &'a ElevationLayer,
    pub weights: &'a [&'a dyn RasterSource],
}

/// What a computation produced
#[derive(Debug, Clone)]
pub struct AohOutcome {
    pub totals: AohTotals,
    pub state: PassState,
    /// Grid of the written raster
    pub grid: GridSpec,
    pub warnings: Vec<Warning>,
}

/// All inputs bound to the computation grid
struct BoundLayers<'a> {
    range: AlignedSource<'a>,
    habitat: AlignedHabitat<'a>,
    elevation: ElevationFilter<'a>,
    weights: WeightStack<'a>,
}

/// Pixel values of one window
struct Block {
    range: Array2<f64>,
    habitat: Array2<f64>,
    elevation: Array2<f64>,
    weight: Array2<f64>,
}

impl BoundLayers<'_> {
    fn read(&self, window: &Window, state: PassState) -> Result<Block> {
        let range = self.range.read(window)?;
        let habitat = match state {
            PassState::Normal => self.habitat.read(window)?,
            PassState::Fallback => Array2::ones(window.shape()),
        };
        Ok(Block {
            range,
            habitat,
            elevation: self.elevation.read(window)?,
            weight: self.weights.read(window)?,
        })
    }
}

impl Block {
    /// Output values of the window, adding to `totals`.
    ///
    /// The elevation-only product is evaluated identically in both states,
    /// so a fallback pass reproduces `dem_total` exactly.
    fn composite(&self, state: PassState, totals: &mut AohTotals) -> Array2<f64> {
        let mut out = Array2::zeros(self.range.raw_dim());
        Zip::from(&mut out)
            .and(&self.range)
            .and(&self.habitat)
            .and(&self.elevation)
            .and(&self.weight)
            .for_each(|o, &r, &h, &e, &w| {
                let dem = r * e * w;
                match state {
                    PassState::Normal => {
                        let aoh = r * h * e * w;
                        totals.range_total += r * w;
                        totals.hab_total += r * h * w;
                        totals.dem_total += dem;
                        totals.aoh_total += aoh;
                        *o = aoh;
                    }
                    PassState::Fallback => {
                        totals.aoh_total += dem;
                        *o = dem;
                    }
                }
            });
        out
    }
}

/// One full streaming pass, staged but not committed
fn run_pass<T: OutputTarget>(
    layers: &BoundLayers<'_>,
    grid: &GridSpec,
    plan: BlockPlan,
    state: PassState,
    target: &T,
) -> Result<(T::Staged, AohTotals)> {
    let mut totals = AohTotals::default();
    let staged = target.stage(grid, None, &mut |sink: &mut dyn RasterSink| {
        for window in plan.windows(grid.width, grid.height) {
            let block = layers.read(&window, state)?;
            let out = block.composite(state, &mut totals);
            sink.write_window(&window, out.view())?;
        }
        Ok(())
    })?;
    debug!(?state, ?totals, "pass finished");
    Ok((staged, totals))
}

/// Zero raster over `grid`
fn stage_zeros<T: OutputTarget>(grid: &GridSpec, plan: BlockPlan, target: &T) -> Result<T::Staged> {
    target.stage(grid, None, &mut |sink: &mut dyn RasterSink| {
        for window in plan.windows(grid.width, grid.height) {
            sink.write_window(&window, Array2::<f64>::zeros(window.shape()).view())?;
        }
        Ok(())
    })
}

/// Check every input against the first elevation raster and return the
/// region all of them cover, `None` if they share no pixel.
fn common_extent(layers: &AohLayers<'_>) -> Result<(GridSpec, Option<GridSpec>)> {
    let elevation = layers.elevation.grids();
    let base = elevation
        .first()
        .map(|g| (*g).clone())
        .ok_or_else(|| Error::InputMode("no elevation raster".into()))?;

    let mut clipping: Vec<&GridSpec> = elevation[1..].to_vec();
    clipping.extend(layers.habitat.grids());
    for weight in layers.weights {
        if is_column_raster(weight.grid()) {
            base.check_column_compatible(weight.grid())?;
        } else {
            clipping.push(weight.grid());
        }
    }

    let mut extent = Some(base.clone());
    for grid in clipping {
        base.check_compatible(grid)?;
        extent = match extent {
            Some(e) => e.intersection(grid)?,
            None => None,
        };
    }
    Ok((base, extent))
}

/// Compute one species' AOH into `target`.
///
/// Input grids are checked before any pixel is read; a misaligned input is
/// an [`Error::Alignment`]. A range that misses the basemaps is not an
/// error: a zero raster over the range footprint is written and the outcome
/// carries [`Warning::GeometryEmpty`].
pub fn compute_aoh<T: OutputTarget>(
    record: &SpeciesRecord,
    layers: &AohLayers<'_>,
    params: &AohParams,
    target: &T,
) -> Result<AohOutcome> {
    let (base, extent) = common_extent(layers)?;
    let range = RangeRaster::new(&record.geometry, &base, params.range_samples);
    let footprint = range.grid().clone();

    let grid = match (&extent, footprint.is_empty()) {
        (Some(extent), false) => footprint.intersection(extent)?,
        _ => None,
    };

    let Some(grid) = grid else {
        warn!(species = %record.stem(), "range does not overlap the basemaps");
        let grid = if footprint.is_empty() {
            base.subgrid(0, 0, 1, 1)
        } else {
            footprint
        };
        let staged = stage_zeros(&grid, params.block_plan, target)?;
        target.commit(staged)?;
        return Ok(AohOutcome {
            totals: AohTotals::default(),
            state: PassState::Normal,
            grid,
            warnings: vec![Warning::GeometryEmpty],
        });
    };

    let area = params
        .multiply_by_area_per_pixel
        .then(|| PixelAreaSource::new(grid.clone()));
    let mut weight_sources: Vec<&dyn RasterSource> = layers.weights.to_vec();
    if let Some(area) = &area {
        weight_sources.push(area);
    }

    let (lower, upper) = record.elevation_interval();
    let bound = BoundLayers {
        range: AlignedSource::new(&range, &grid, 0.0)?,
        habitat: layers.habitat.align(&grid)?,
        elevation: layers.elevation.filter(&grid, lower, upper)?,
        weights: WeightStack::new(&weight_sources, &grid)?,
    };

    info!(
        species = %record.stem(),
        width = grid.width,
        height = grid.height,
        "computing AOH"
    );

    let (staged, mut totals) = run_pass(&bound, &grid, params.block_plan, PassState::Normal, target)?;

    let state = if totals.aoh_total == 0.0 && totals.range_total > 0.0 && !params.force_habitat {
        PassState::Fallback
    } else {
        PassState::Normal
    };

    match state {
        PassState::Normal => target.commit(staged)?,
        // the habitat-free product is range x elevation x weights, which
        // dem_total already sums: zero there means the staged zeros stand
        PassState::Fallback if totals.dem_total == 0.0 => {
            info!(species = %record.stem(), "no habitat matched, elevation excludes the whole range");
            target.commit(staged)?;
        }
        PassState::Fallback => {
            info!(species = %record.stem(), "no habitat matched, falling back to range");
            drop(staged);
            let (staged, fallback) = run_pass(&bound, &grid, params.block_plan, PassState::Fallback, target)?;
            totals.aoh_total = fallback.aoh_total;
            target.commit(staged)?;
        }
    }

    let mut warnings = Vec::new();
    if totals.range_total == 0.0 {
        warn!(species = %record.stem(), "rasterized range is empty over the basemaps");
        warnings.push(Warning::GeometryEmpty);
    }

    info!(
        species = %record.stem(),
        aoh_total = totals.aoh_total,
        prevalence = totals.prevalence(),
        "AOH finished"
    );

    Ok(AohOutcome {
        totals,
        state,
        grid,
        warnings,
    })
}
