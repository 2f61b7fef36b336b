//! Per-species JSON manifests
//!
//! Field order is declaration order, so manifests of different runs diff
//! cleanly and collate into one table.

use super::compositor::{AohOutcome, AohParams, PassState};
use crate::elevation::ElevationSource;
use crate::habitat::HabitatSource;
use crate::range::Warning;
use crate::species::{Season, SpeciesRecord};
use serde::Serialize;
use std::path::PathBuf;

/// Input files of a computation
#[derive(Debug, Clone, PartialEq)]
pub struct AohSources {
    pub habitat: HabitatSource,
    pub elevation: ElevationSource,
    pub crosswalk: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestInputs {
    /// `classified` or `fractional`
    pub habitat_mode: &'static str,
    pub habitat: String,
    pub elevation: Vec<String>,
    pub crosswalk: String,
    pub weights: Vec<String>,
    pub multiply_by_area_per_pixel: bool,
    pub force_habitat: bool,
    pub range_samples: usize,
}

impl ManifestInputs {
    pub fn new(sources: &AohSources, params: &AohParams) -> Self {
        let habitat_mode = match sources.habitat {
            HabitatSource::Classified(_) => "classified",
            HabitatSource::Fractional(_) => "fractional",
        };
        Self {
            habitat_mode,
            habitat: sources.habitat.path().display().to_string(),
            elevation: sources.elevation.describe(),
            crosswalk: sources.crosswalk.display().to_string(),
            weights: sources.weights.iter().map(|p| p.display().to_string()).collect(),
            multiply_by_area_per_pixel: params.multiply_by_area_per_pixel,
            force_habitat: params.force_habitat,
            range_samples: params.range_samples,
        }
    }
}

/// Result record of one species-season
#[derive(Debug, Clone, Serialize)]
pub struct AohManifest {
    pub id_no: i64,
    pub season: Season,
    pub elevation_lower: Option<f64>,
    pub elevation_upper: Option<f64>,
    pub full_habitat_code: String,
    pub range_total: f64,
    pub hab_total: f64,
    pub dem_total: f64,
    pub aoh_total: f64,
    pub prevalence: f64,
    /// Habitat term dropped because it matched nothing
    pub fallback: bool,
    pub warnings: Vec<Warning>,
    pub inputs: ManifestInputs,
}

impl AohManifest {
    /// `record` is the record as filtered, i.e. after any tidying.
    pub fn new(record: &SpeciesRecord, outcome: &AohOutcome, inputs: ManifestInputs) -> Self {
        let t = &outcome.totals;
        Self {
            id_no: record.id_no,
            season: record.season,
            elevation_lower: record.elevation_lower,
            elevation_upper: record.elevation_upper,
            full_habitat_code: record.full_habitat_code.join("|"),
            range_total: t.range_total,
            hab_total: t.hab_total,
            dem_total: t.dem_total,
            aoh_total: t.aoh_total,
            prevalence: t.prevalence(),
            fallback: outcome.state == PassState::Fallback,
            warnings: outcome.warnings.clone(),
            inputs,
        }
    }
}

/// Written in place of a result when a species-season fails
#[derive(Debug, Clone, Serialize)]
pub struct FailureManifest {
    pub id_no: i64,
    pub season: Season,
    pub error: String,
}
