//! End-to-end runs over GeoTIFF basemaps, GeoJSON species files and a CSV
//! crosswalk, all written to temporary directories.
//!
//! The basemaps share an 8×8 grid of 100 m pixels in EPSG:3857:
//!
//! - habitat: class 100 in columns 0-3, class 200 in columns 4-7
//! - elevation: 500 m in rows 0-3, 1500 m in rows 4-7
//!
//! Every species range is the square covering rows 2-5 and columns 2-5.

use aohcalc_algorithms::aoh::{aoh_batch, aoh_for_species_file, species_files, AohParams, AohSources};
use aohcalc_algorithms::crosswalk::CrosswalkTable;
use aohcalc_algorithms::elevation::ElevationSource;
use aohcalc_algorithms::fractionalize::{habitat_process, FractionalizeParams};
use aohcalc_algorithms::habitat::HabitatSource;
use aohcalc_algorithms::summaries::{endemism_from_dir, richness_from_dir, SummaryParams};
use aohcalc_core::io::{read_geotiff, write_geotiff};
use aohcalc_core::{GeoTransform, Raster, CRS};
use aohcalc_parallel::ProcessingMode;
use approx::assert_abs_diff_eq;
use ndarray::Array2;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const CROSSWALK: &str = "code,value\n1.5,100\n1.6.0,200\n4,300\n";

struct Fixture {
    dir: TempDir,
    habitat: PathBuf,
    dem: PathBuf,
    crosswalk: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let habitat = dir.path().join("habitat.tif");
        let dem = dir.path().join("dem.tif");
        let crosswalk = dir.path().join("crosswalk.csv");

        write_basemap(&habitat, |_, c| if c < 4 { 100.0 } else { 200.0 });
        write_basemap(&dem, |r, _| if r < 4 { 500.0 } else { 1500.0 });
        fs::write(&crosswalk, CROSSWALK).unwrap();
        fs::create_dir_all(dir.path().join("species")).unwrap();

        Self {
            dir,
            habitat,
            dem,
            crosswalk,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn sources(&self, habitat: HabitatSource) -> AohSources {
        AohSources {
            habitat,
            elevation: ElevationSource::Single(self.dem.clone()),
            crosswalk: self.crosswalk.clone(),
            weights: vec![],
        }
    }

    fn classified(&self) -> AohSources {
        self.sources(HabitatSource::Classified(self.habitat.clone()))
    }

    fn add_species(&self, id_no: i64, season: &str, codes: &str) -> PathBuf {
        let path = self.path("species").join(format!("{}_{}.geojson", id_no, season));
        let json = format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature",
            "properties":{{"id_no":{},"season":"{}","elevation_lower":0,"elevation_upper":1000,"full_habitat_code":"{}"}},
            "geometry":{{"type":"Polygon","coordinates":[[[200,200],[600,200],[600,600],[200,600],[200,200]]]}}}}]}}"#,
            id_no, season, codes
        );
        fs::write(&path, json).unwrap();
        path
    }
}

fn write_basemap(path: &Path, value: impl Fn(usize, usize) -> f64) {
    let mut raster = Raster::from_array(Array2::from_shape_fn((8, 8), |(r, c)| value(r, c)));
    raster.set_transform(GeoTransform::new(0.0, 800.0, 100.0, -100.0));
    raster.set_crs(Some(CRS::from_epsg(3857)));
    write_geotiff(&raster, path).unwrap();
}

fn manifest(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn classified_habitat_with_elevation_filter() {
    let fx = Fixture::new();
    let species = fx.add_species(1, "resident", "1.5");
    let out = fx.path("out");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();

    let result = aoh_for_species_file(&species, &crosswalk, &fx.classified(), &AohParams::default(), &out).unwrap();
    assert_abs_diff_eq!(result.range_total, 16.0);
    assert_abs_diff_eq!(result.hab_total, 8.0);
    assert_abs_diff_eq!(result.dem_total, 8.0);
    assert_abs_diff_eq!(result.aoh_total, 4.0);
    assert!(!result.fallback);

    let raster = read_geotiff(out.join("1_resident.tif")).unwrap();
    assert_eq!(raster.shape(), (4, 4));
    assert_abs_diff_eq!(raster.data().sum(), 4.0);
    assert_eq!(raster.get(0, 0).unwrap(), 1.0);
    assert_eq!(raster.get(0, 2).unwrap(), 0.0);

    let json = manifest(&out.join("1_resident.json"));
    assert_eq!(json["id_no"], 1);
    assert_eq!(json["season"], "resident");
    assert_eq!(json["aoh_total"], 4.0);
    assert_eq!(json["inputs"]["habitat_mode"], "classified");
}

#[test]
fn parent_code_takes_every_child_class() {
    let fx = Fixture::new();
    let species = fx.add_species(2, "breeding", "1");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();

    let result = aoh_for_species_file(
        &species,
        &crosswalk,
        &fx.classified(),
        &AohParams::default(),
        &fx.path("out"),
    )
    .unwrap();
    assert_abs_diff_eq!(result.hab_total, 16.0);
    assert_abs_diff_eq!(result.aoh_total, 8.0);
}

#[test]
fn empty_habitat_match_falls_back_to_range() {
    let fx = Fixture::new();
    let species = fx.add_species(3, "nonbreeding", "4");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();
    let out = fx.path("out");

    let result = aoh_for_species_file(&species, &crosswalk, &fx.classified(), &AohParams::default(), &out).unwrap();
    assert!(result.fallback);
    assert_abs_diff_eq!(result.hab_total, 0.0);
    assert_abs_diff_eq!(result.aoh_total, 8.0);
    assert_abs_diff_eq!(read_geotiff(out.join("3_nonbreeding.tif")).unwrap().data().sum(), 8.0);

    let forced = AohParams {
        force_habitat: true,
        ..Default::default()
    };
    let result = aoh_for_species_file(&species, &crosswalk, &fx.classified(), &forced, &out).unwrap();
    assert!(!result.fallback);
    assert_abs_diff_eq!(result.aoh_total, 0.0);
    assert_abs_diff_eq!(read_geotiff(out.join("3_nonbreeding.tif")).unwrap().data().sum(), 0.0);
}

#[test]
fn unwritable_manifest_leaves_no_raster() {
    let fx = Fixture::new();
    let species = fx.add_species(1, "resident", "1.5");
    let out = fx.path("out");
    fs::create_dir_all(out.join("1_resident.json")).unwrap();
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();

    let result = aoh_for_species_file(&species, &crosswalk, &fx.classified(), &AohParams::default(), &out);
    assert!(result.is_err());
    assert!(!out.join("1_resident.tif").exists());
}

#[test]
fn batch_isolates_failing_species() {
    let fx = Fixture::new();
    fx.add_species(1, "resident", "1.5");
    fx.add_species(2, "resident", "9.9");
    fx.add_species(3, "resident", "1.6");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();
    let out = fx.path("out");

    let files = species_files(&fx.path("species")).unwrap();
    assert_eq!(files.len(), 3);
    let report = aoh_batch(
        &files,
        &crosswalk,
        &fx.classified(),
        &AohParams::default(),
        &out,
        ProcessingMode::Parallel,
    )
    .unwrap();
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures().next().map(|(label, _)| label), Some("2_resident"));

    assert!(out.join("1_resident.tif").exists());
    assert!(out.join("3_resident.tif").exists());
    assert!(!out.join("2_resident.tif").exists());
    let failure = manifest(&out.join("2_resident.json"));
    assert_eq!(failure["id_no"], 2);
    assert!(failure["error"].as_str().unwrap().contains("9.9"));
}

#[test]
fn fractionalized_habitat_matches_classified() {
    let fx = Fixture::new();
    let layers = fx.path("layers");
    let report = habitat_process(&fx.habitat, &layers, &FractionalizeParams::default()).unwrap();
    assert_eq!(report.classes, vec![100, 200]);

    let a = read_geotiff(layers.join("lcc_100.tif")).unwrap();
    let b = read_geotiff(layers.join("lcc_200.tif")).unwrap();
    for (x, y) in a.data().iter().zip(b.data().iter()) {
        assert_abs_diff_eq!(x + y, 1.0, epsilon = 1e-6);
    }

    let species = fx.add_species(1, "resident", "1.5");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();
    let result = aoh_for_species_file(
        &species,
        &crosswalk,
        &fx.sources(HabitatSource::Fractional(layers)),
        &AohParams::default(),
        &fx.path("out"),
    )
    .unwrap();
    assert_abs_diff_eq!(result.hab_total, 8.0, epsilon = 1e-6);
    assert_abs_diff_eq!(result.aoh_total, 4.0, epsilon = 1e-6);
}

#[test]
fn coarser_fractions_keep_partition_of_unity() {
    let fx = Fixture::new();
    let mixed = fx.path("mixed.tif");
    write_basemap(&mixed, |r, c| [0.0, 11.0, 12.0, 13.0][(r * 5 + c * 3) % 4]);
    let layers = fx.path("layers");
    let params = FractionalizeParams {
        pixel_scale: Some(300.0),
        ..Default::default()
    };
    let report = habitat_process(&mixed, &layers, &params).unwrap();
    assert_eq!(report.classes, vec![11, 12, 13]);
    assert_eq!((report.grid.width, report.grid.height), (3, 3));

    let rasters: Vec<Raster<f64>> = report
        .classes
        .iter()
        .map(|c| read_geotiff(layers.join(format!("lcc_{}.tif", c))).unwrap())
        .collect();
    for r in 0..3 {
        for c in 0..3 {
            let sum: f64 = rasters.iter().map(|x| x.get(r, c).unwrap()).sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
        }
    }
}

#[test]
fn richness_and_endemism_from_aoh_outputs() {
    let fx = Fixture::new();
    fx.add_species(1, "resident", "1.5");
    fx.add_species(2, "resident", "1.6");
    let crosswalk = CrosswalkTable::from_path(&fx.crosswalk).unwrap();
    let aohs = fx.path("aohs");
    let files = species_files(&fx.path("species")).unwrap();
    aoh_batch(
        &files,
        &crosswalk,
        &fx.classified(),
        &AohParams::default(),
        &aohs,
        ProcessingMode::Sequential,
    )
    .unwrap();

    let summaries = fx.path("summaries");
    fs::create_dir_all(&summaries).unwrap();
    let richness_path = summaries.join("richness.tif");
    let endemism_path = summaries.join("endemism.tif");
    let params = SummaryParams::default();
    richness_from_dir(&aohs, &richness_path, &params).unwrap();
    endemism_from_dir(&aohs, &richness_path, &endemism_path, &params).unwrap();

    let richness = read_geotiff(&richness_path).unwrap();
    let endemism = read_geotiff(&endemism_path).unwrap();
    assert_eq!(richness.shape(), (4, 4));
    for r in 0..4 {
        for c in 0..4 {
            let present = r < 2;
            assert_eq!(richness.get(r, c).unwrap(), if present { 1.0 } else { 0.0 });
            let e = endemism.get(r, c).unwrap();
            if present {
                assert_abs_diff_eq!(e, 0.25, epsilon = 1e-6);
            } else {
                assert!(e.is_nan());
            }
        }
    }
}
