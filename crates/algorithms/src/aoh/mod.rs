//! Area of Habitat
//!
//! [`compute_aoh`] is the streamed compositor over already opened layers.
//! [`aoh_for_species`] and [`aoh_for_species_file`] wire it to files: they
//! resolve the crosswalk, open the rasters, write
//! `{output_dir}/{id_no}_{season}.tif` and the matching `.json` manifest.
//! [`aoh_batch`] runs a directory of species files in parallel.

mod compositor;
mod manifest;

pub use compositor::{compute_aoh, AohLayers, AohOutcome, AohParams, AohTotals, PassState};
pub use manifest::{AohManifest, AohSources, FailureManifest, ManifestInputs};

use crate::crosswalk::CrosswalkTable;
use crate::species::SpeciesRecord;
use crate::weights::open_weight_layers;
use aohcalc_core::io::{write_json_atomic, GeoTiffTarget, RasterSource};
use aohcalc_core::{Error, Result};
use aohcalc_parallel::{run_batch, BatchReport, ProcessingMode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Output raster path of a species-season
pub fn raster_path(output_dir: &Path, record: &SpeciesRecord) -> PathBuf {
    output_dir.join(format!("{}.tif", record.stem()))
}

/// Output manifest path of a species-season
pub fn manifest_path(output_dir: &Path, record: &SpeciesRecord) -> PathBuf {
    output_dir.join(format!("{}.json", record.stem()))
}

/// Compute one species-season from files and write raster and manifest.
pub fn aoh_for_species(
    record: &SpeciesRecord,
    crosswalk: &CrosswalkTable,
    sources: &AohSources,
    params: &AohParams,
    output_dir: &Path,
) -> Result<AohManifest> {
    let record = match &params.tidy {
        Some(tidy) => record.tidied(tidy),
        None => record.clone(),
    };

    let values = crosswalk.values_for(&record.full_habitat_code)?;
    info!(
        species = %record.stem(),
        codes = record.full_habitat_code.len(),
        classes = values.len(),
        "resolved habitat classes"
    );

    let habitat = sources.habitat.open(&values)?;
    let elevation = sources.elevation.open()?;
    let weight_layers = open_weight_layers(&sources.weights)?;
    let weights: Vec<&dyn RasterSource> = weight_layers.iter().map(|w| w.as_ref()).collect();

    fs::create_dir_all(output_dir)?;
    let raster = raster_path(output_dir, &record);
    let target = GeoTiffTarget::new(&raster);
    let outcome = compute_aoh(
        &record,
        &AohLayers {
            habitat: &habitat,
            elevation: &elevation,
            weights: &weights,
        },
        params,
        &target,
    )?;

    // a raster without its manifest is not a result
    let manifest = AohManifest::new(&record, &outcome, ManifestInputs::new(sources, params));
    if let Err(e) = write_json_atomic(&manifest, manifest_path(output_dir, &record)) {
        if let Err(remove_err) = fs::remove_file(&raster) {
            warn!(species = %record.stem(), error = %remove_err, "could not remove raster without manifest");
        }
        return Err(e);
    }
    Ok(manifest)
}

/// [`aoh_for_species`] for a species GeoJSON file.
///
/// Once the record has been read, a failure leaves a [`FailureManifest`]
/// naming the error in place of the result manifest.
pub fn aoh_for_species_file(
    species_path: &Path,
    crosswalk: &CrosswalkTable,
    sources: &AohSources,
    params: &AohParams,
    output_dir: &Path,
) -> Result<AohManifest> {
    let record = SpeciesRecord::from_geojson(species_path)?;
    aoh_for_species(&record, crosswalk, sources, params, output_dir).map_err(|e| {
        warn!(species = %record.stem(), error = %e, "AOH failed");
        let failure = FailureManifest {
            id_no: record.id_no,
            season: record.season,
            error: e.to_string(),
        };
        if let Err(write_err) = write_json_atomic(&failure, manifest_path(output_dir, &record)) {
            warn!(species = %record.stem(), error = %write_err, "could not write failure manifest");
        }
        e
    })
}

/// Species GeoJSON files in `dir`, sorted by name
pub fn species_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "geojson") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(Error::Species(format!("no .geojson files in {}", dir.display())));
    }
    files.sort();
    Ok(files)
}

/// Run every species file independently. A failed species is reported and
/// does not stop the others.
pub fn aoh_batch(
    species_paths: &[PathBuf],
    crosswalk: &CrosswalkTable,
    sources: &AohSources,
    params: &AohParams,
    output_dir: &Path,
    mode: ProcessingMode,
) -> Result<BatchReport<AohManifest>> {
    fs::create_dir_all(output_dir)?;
    run_batch(
        mode,
        species_paths,
        |path| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        },
        |path| aoh_for_species_file(path, crosswalk, sources, params, output_dir),
    )
}
