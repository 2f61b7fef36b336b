//! Summaries over a corpus of AOH rasters
//!
//! Both summaries stream the union grid band by band. Inside a band the
//! species are split across workers; each worker owns its accumulator for the
//! band and the accumulators are merged by summation once every worker is
//! done. Memory is bounded by one band per worker, independent of the number
//! of species.

mod endemism;
mod richness;

pub use endemism::{endemism, endemism_from_dir, species_totals};
pub use richness::{richness, richness_from_dir};

use aohcalc_core::io::{GeoTiffReader, RasterSource};
use aohcalc_core::window::{AlignedSource, BlockPlan, Window};
use aohcalc_core::{Error, GridSpec, Result};
use aohcalc_parallel::{num_cpus, ParallelStrategy, ProcessingMode};
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parameters shared by [`richness`] and [`endemism`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryParams {
    /// Band height; column tiling is ignored, bands always span the grid
    pub block_plan: BlockPlan,
    pub mode: ProcessingMode,
}

impl SummaryParams {
    fn bands(&self, grid: &GridSpec) -> impl Iterator<Item = Window> {
        BlockPlan::rows(self.block_plan.block_rows).windows(grid.width, grid.height)
    }

    fn workers(&self) -> usize {
        match self.mode {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => num_cpus(),
            ProcessingMode::ParallelWith(n) => n,
        }
        .max(1)
    }
}

/// One AOH raster of the corpus
#[derive(Debug, Clone)]
pub struct SeasonLayer {
    pub path: PathBuf,
    pub grid: GridSpec,
}

/// The seasonal AOH rasters of one species
#[derive(Debug, Clone)]
pub struct SpeciesGroup {
    pub id_no: i64,
    pub seasons: Vec<SeasonLayer>,
}

/// Every `.tif` under `dir`, recursively, sorted by path.
pub fn aoh_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for entry in fs::read_dir(&next)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == "tif" || e == "tiff") {
                found.push(path);
            }
        }
    }
    if found.is_empty() {
        return Err(Error::Species(format!("no AOH rasters under {}", dir.display())));
    }
    found.sort();
    Ok(found)
}

/// Species id of an AOH raster named `{id_no}_{season}.tif`
pub fn species_id(path: &Path) -> Result<i64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('_').next())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::Species(format!("{} is not named {{id_no}}_{{season}}", path.display())))
}

/// Read the grid of every raster and group them by species id.
pub fn group_by_species(paths: &[PathBuf], mode: ProcessingMode) -> Result<Vec<SpeciesGroup>> {
    let layers = mode
        .par_map(0..paths.len(), |i| -> Result<(i64, SeasonLayer)> {
            let path = &paths[i];
            let grid = GeoTiffReader::open(path)?.grid().clone();
            Ok((species_id(path)?, SeasonLayer { path: path.clone(), grid }))
        })?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let mut groups: BTreeMap<i64, Vec<SeasonLayer>> = BTreeMap::new();
    for (id_no, layer) in layers {
        groups.entry(id_no).or_default().push(layer);
    }
    debug!(rasters = paths.len(), species = groups.len(), "grouped AOH rasters");
    Ok(groups
        .into_iter()
        .map(|(id_no, seasons)| SpeciesGroup { id_no, seasons })
        .collect())
}

/// Smallest grid covering every layer. All layers must share one pixel grid.
pub fn union_grid(groups: &[SpeciesGroup]) -> Result<GridSpec> {
    let mut grids = groups.iter().flat_map(|g| g.seasons.iter().map(|s| &s.grid));
    let first = grids
        .next()
        .ok_or_else(|| Error::Species("no AOH rasters to summarise".into()))?;
    grids.try_fold(first.clone(), |acc, grid| acc.union(grid))
}

/// Season rasters read band by band down a summary grid.
///
/// A raster is opened when the first band it reaches comes up and closed once
/// the sweep has moved below it, so each header is parsed once per run and
/// only the rasters crossing the current band hold a file handle.
struct BandSweep<'g> {
    grid: &'g GridSpec,
    /// Rows of `grid` covered by each season
    spans: HashMap<&'g Path, Range<usize>>,
    open: HashMap<&'g Path, GeoTiffReader>,
}

impl<'g> BandSweep<'g> {
    fn new(grid: &'g GridSpec, groups: &'g [SpeciesGroup]) -> Result<Self> {
        let mut spans = HashMap::new();
        for season in groups.iter().flat_map(|g| &g.seasons) {
            let top = grid.row_offset(&season.grid)?;
            let bottom = top + season.grid.height as i64;
            let rows = top.clamp(0, grid.height as i64) as usize..bottom.clamp(0, grid.height as i64) as usize;
            spans.insert(season.path.as_path(), rows);
        }
        Ok(Self {
            grid,
            spans,
            open: HashMap::new(),
        })
    }

    fn crosses(&self, season: &SeasonLayer, band: &Window) -> bool {
        self.spans
            .get(season.path.as_path())
            .is_some_and(|rows| rows.start < band.row_end() && band.row_offset < rows.end)
    }

    /// Move to `band`: close rasters above it, open the ones it reaches, and
    /// return the species with at least one season crossing it.
    fn enter(
        &mut self,
        band: &Window,
        groups: &'g [SpeciesGroup],
        mode: ProcessingMode,
    ) -> Result<Vec<&'g SpeciesGroup>> {
        let spans = &self.spans;
        self.open.retain(|path, _| {
            spans
                .get(path)
                .is_some_and(|rows| band.row_offset < rows.end)
        });

        let present: Vec<&'g SpeciesGroup> = groups
            .iter()
            .filter(|g| g.seasons.iter().any(|s| self.crosses(s, band)))
            .collect();
        let pending: Vec<&'g Path> = present
            .iter()
            .copied()
            .flat_map(|g| g.seasons.iter())
            .filter(|s| self.crosses(s, band) && !self.open.contains_key(s.path.as_path()))
            .map(|s| s.path.as_path())
            .collect();
        let readers = mode
            .par_map(0..pending.len(), |i| GeoTiffReader::open(pending[i]))?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        if !readers.is_empty() {
            debug!(row = band.row_offset, opened = readers.len(), open = self.open.len() + readers.len(), "band sweep");
        }
        self.open.extend(pending.into_iter().zip(readers));
        Ok(present)
    }

    /// `season` over `band`, zero where it has no pixels.
    fn read(&self, season: &SeasonLayer, band: &Window) -> Result<Array2<f64>> {
        match self.open.get(season.path.as_path()) {
            Some(reader) => AlignedSource::new(reader, self.grid, 0.0)?.read(band),
            None => Ok(Array2::zeros(band.shape())),
        }
    }
}

/// Accumulate one band: `species` split over workers, each folding its share
/// into a fresh accumulator with `fold`, merged by summation.
fn accumulate_band<A, F>(
    params: &SummaryParams,
    species: &[&SpeciesGroup],
    init: impl Fn() -> A + Sync + Send,
    fold: F,
) -> Result<Vec<A>>
where
    A: Send,
    F: Fn(&mut A, &SpeciesGroup) -> Result<()> + Sync + Send,
{
    if species.is_empty() {
        return Ok(vec![init()]);
    }
    let chunk = species.len().div_ceil(params.workers());
    let chunks: Vec<&[&SpeciesGroup]> = species.chunks(chunk).collect();
    params
        .mode
        .par_map(0..chunks.len(), |i| -> Result<A> {
            let mut acc = init();
            for group in chunks[i] {
                fold(&mut acc, group)?;
            }
            Ok(acc)
        })?
        .into_iter()
        .collect()
}
