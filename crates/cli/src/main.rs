//! aohcalc CLI - Area of Habitat rasters, habitat fractions and summaries

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use aohcalc_algorithms::aoh::{aoh_batch, aoh_for_species_file, species_files, AohParams, AohSources};
use aohcalc_algorithms::crosswalk::CrosswalkTable;
use aohcalc_algorithms::elevation::ElevationSource;
use aohcalc_algorithms::fractionalize::{habitat_process, FractionalizeParams};
use aohcalc_algorithms::habitat::HabitatSource;
use aohcalc_algorithms::species::TidyParams;
use aohcalc_algorithms::summaries::{endemism_from_dir, richness_from_dir, SummaryParams};
use aohcalc_core::io::{GeoTiffReader, RasterSource};
use aohcalc_core::window::{summarize, BlockPlan};
use aohcalc_core::CRS;
use aohcalc_parallel::ProcessingMode;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "aohcalc")]
#[command(author, version, about = "Area of Habitat calculator", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads (default: all cores, 1 runs sequentially)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Compute the AOH of one species-season
    Calc {
        /// Species range GeoJSON with a single feature
        #[arg(long)]
        species: PathBuf,
        #[command(flatten)]
        inputs: AohArgs,
    },
    /// Compute the AOH of every species GeoJSON in a directory
    Batch {
        /// Directory of species range GeoJSON files
        #[arg(long)]
        species_dir: PathBuf,
        #[command(flatten)]
        inputs: AohArgs,
    },
    /// Split a classified habitat map into per-class fraction rasters
    HabitatProcess {
        /// Classified habitat map
        input: PathBuf,
        /// Directory for the lcc_{class}.tif outputs
        output_dir: PathBuf,
        /// Output pixel size in target CRS units
        #[arg(long)]
        pixel_scale: Option<f64>,
        /// Output projection as an EPSG code
        #[arg(long)]
        target_epsg: Option<u32>,
        /// Sample points per pixel axis when reprojecting
        #[arg(long, default_value = "4")]
        samples: usize,
        /// Class values treated as no-data
        #[arg(long = "ignore", default_values_t = [0i64])]
        ignore_classes: Vec<i64>,
        /// Allowed deviation of per-pixel class sums from 1
        #[arg(long, default_value = "1e-5")]
        tolerance: f64,
        /// Rows per streamed block
        #[arg(long, default_value = "512")]
        block_rows: usize,
    },
    /// Count species present per pixel over a directory of AOH rasters
    Richness {
        /// Directory of {id_no}_{season}.tif AOH rasters
        aoh_dir: PathBuf,
        /// Output file
        output: PathBuf,
        /// Rows per streamed band
        #[arg(long, default_value = "512")]
        block_rows: usize,
    },
    /// Per-pixel geometric mean of species range proportions
    Endemism {
        /// Directory of {id_no}_{season}.tif AOH rasters
        aoh_dir: PathBuf,
        /// Richness raster of the same AOH rasters
        richness: PathBuf,
        /// Output file
        output: PathBuf,
        /// Rows per streamed band
        #[arg(long, default_value = "512")]
        block_rows: usize,
    },
}

/// Basemaps and options shared by `calc` and `batch`
#[derive(Args)]
struct AohArgs {
    /// Classified habitat map
    #[arg(long, conflicts_with = "fractional_habitat")]
    habitat: Option<PathBuf>,
    /// Directory of lcc_{class}.tif fractional habitat rasters
    #[arg(long)]
    fractional_habitat: Option<PathBuf>,
    /// Elevation map
    #[arg(long)]
    elevation: Option<PathBuf>,
    /// Minimum elevation map (with --elevation-max)
    #[arg(long)]
    elevation_min: Option<PathBuf>,
    /// Maximum elevation map (with --elevation-min)
    #[arg(long)]
    elevation_max: Option<PathBuf>,
    /// Crosswalk CSV with code,value columns
    #[arg(long)]
    crosswalk: PathBuf,
    /// Extra weight raster, repeatable
    #[arg(long = "weight")]
    weights: Vec<PathBuf>,
    /// Weight each pixel by its area in square metres
    #[arg(long)]
    area_per_pixel: bool,
    /// Keep a zero habitat result instead of falling back to the range
    #[arg(long)]
    force_habitat: bool,
    /// Clean up species elevation bounds before filtering
    #[arg(long)]
    tidy_elevation: bool,
    /// Range coverage samples per pixel axis
    #[arg(long, default_value = "1")]
    range_samples: usize,
    /// Rows per streamed block
    #[arg(long, default_value = "512")]
    block_rows: usize,
    /// Output directory
    #[arg(short, long)]
    output_dir: PathBuf,
}

impl AohArgs {
    fn sources(&self) -> Result<AohSources> {
        let habitat = HabitatSource::from_options(self.habitat.clone(), self.fractional_habitat.clone())?;
        let elevation = ElevationSource::from_options(
            self.elevation.clone(),
            self.elevation_min.clone(),
            self.elevation_max.clone(),
        )?;
        Ok(AohSources {
            habitat,
            elevation,
            crosswalk: self.crosswalk.clone(),
            weights: self.weights.clone(),
        })
    }

    fn params(&self) -> Result<AohParams> {
        if self.range_samples == 0 {
            anyhow::bail!("--range-samples must be at least 1");
        }
        Ok(AohParams {
            force_habitat: self.force_habitat,
            multiply_by_area_per_pixel: self.area_per_pixel,
            range_samples: self.range_samples,
            tidy: self.tidy_elevation.then(TidyParams::default),
            block_plan: block_plan(self.block_rows)?,
        })
    }

    fn crosswalk(&self) -> Result<CrosswalkTable> {
        let pb = spinner("Reading crosswalk...");
        let table = CrosswalkTable::from_path(&self.crosswalk)
            .with_context(|| format!("Failed to read crosswalk {}", self.crosswalk.display()))?;
        pb.finish_and_clear();
        info!(entries = table.len(), "loaded crosswalk");
        Ok(table)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn block_plan(rows: usize) -> Result<BlockPlan> {
    if rows == 0 {
        anyhow::bail!("--block-rows must be at least 1");
    }
    Ok(BlockPlan::rows(rows))
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let mode = ProcessingMode::from_threads(cli.threads);
    debug!(?mode, "processing mode");

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let reader = GeoTiffReader::open(&input)
                .with_context(|| format!("Failed to open raster {}", input.display()))?;
            let grid = reader.grid();
            let bounds = grid.bounds();
            let pb = spinner("Computing statistics...");
            let stats = summarize(&reader, BlockPlan::default()).context("Failed to read raster")?;
            pb.finish_and_clear();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", grid.width, grid.height, grid.len());
            println!(
                "Pixel size: {} x {}",
                grid.transform.pixel_width,
                grid.transform.pixel_height.abs()
            );
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
            );
            if let Some(crs) = &grid.crs {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = reader.info().nodata {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!("  Sum: {:.4}", stats.sum);
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / grid.len().max(1) as f64
            );
        }

        // ── AOH ──────────────────────────────────────────────────────
        Commands::Calc { species, inputs } => {
            let sources = inputs.sources()?;
            let params = inputs.params()?;
            let crosswalk = inputs.crosswalk()?;

            let start = Instant::now();
            let pb = spinner("Computing AOH...");
            let manifest = aoh_for_species_file(&species, &crosswalk, &sources, &params, &inputs.output_dir)
                .with_context(|| format!("AOH failed for {}", species.display()))?;
            pb.finish_and_clear();

            let stem = format!("{}_{}", manifest.id_no, manifest.season);
            println!("AOH {}: {:.4} (range {:.4})", stem, manifest.aoh_total, manifest.range_total);
            if manifest.fallback {
                println!("  Habitat matched nothing; range used without the habitat filter");
            }
            done("AOH", &inputs.output_dir.join(format!("{}.tif", stem)), start.elapsed());
        }

        Commands::Batch { species_dir, inputs } => {
            let sources = inputs.sources()?;
            let params = inputs.params()?;
            let crosswalk = inputs.crosswalk()?;
            let files = species_files(&species_dir)
                .with_context(|| format!("Failed to list species in {}", species_dir.display()))?;

            let start = Instant::now();
            let pb = spinner(&format!("Computing AOH for {} species...", files.len()));
            let report = aoh_batch(&files, &crosswalk, &sources, &params, &inputs.output_dir, mode)?;
            pb.finish_and_clear();

            for (label, error) in report.failures() {
                warn!(species = label, %error, "failed");
            }
            println!("Succeeded: {}", report.succeeded());
            println!("Failed: {}", report.failed());
            done("AOH rasters", &inputs.output_dir, start.elapsed());
            if report.failed() > 0 {
                anyhow::bail!("{} of {} species failed", report.failed(), files.len());
            }
        }

        // ── Habitat fractions ────────────────────────────────────────
        Commands::HabitatProcess {
            input,
            output_dir,
            pixel_scale,
            target_epsg,
            samples,
            ignore_classes,
            tolerance,
            block_rows,
        } => {
            if samples == 0 {
                anyhow::bail!("--samples must be at least 1");
            }
            let params = FractionalizeParams {
                pixel_scale,
                target_crs: target_epsg.map(CRS::from_epsg),
                samples_per_axis: samples,
                ignore_classes,
                tolerance,
                block_plan: block_plan(block_rows)?,
                mode,
            };

            let start = Instant::now();
            let pb = spinner("Fractionalizing habitat...");
            let report = habitat_process(&input, &output_dir, &params)
                .with_context(|| format!("Failed to process habitat map {}", input.display()))?;
            pb.finish_and_clear();

            println!(
                "Classes: {} ({} x {} pixels)",
                report
                    .classes
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                report.grid.width,
                report.grid.height
            );
            done("Habitat layers", &output_dir, start.elapsed());
        }

        // ── Summaries ────────────────────────────────────────────────
        Commands::Richness {
            aoh_dir,
            output,
            block_rows,
        } => {
            let params = SummaryParams {
                block_plan: block_plan(block_rows)?,
                mode,
            };
            let start = Instant::now();
            let pb = spinner("Computing richness...");
            richness_from_dir(&aoh_dir, &output, &params).context("Richness failed")?;
            pb.finish_and_clear();
            done("Richness", &output, start.elapsed());
        }

        Commands::Endemism {
            aoh_dir,
            richness,
            output,
            block_rows,
        } => {
            let params = SummaryParams {
                block_plan: block_plan(block_rows)?,
                mode,
            };
            let start = Instant::now();
            let pb = spinner("Computing endemism...");
            endemism_from_dir(&aoh_dir, &richness, &output, &params).context("Endemism failed")?;
            pb.finish_and_clear();
            done("Endemism", &output, start.elapsed());
        }
    }

    Ok(())
}
