//! # aohcalc algorithms
//!
//! Area of Habitat computations over windowed rasters.
//!
//! ## Modules
//!
//! - **species**: species-season records read from GeoJSON, elevation tidying
//! - **crosswalk**: IUCN habitat code to land-cover class resolution
//! - **habitat**: classified or fractional habitat suitability
//! - **elevation**: single DEM or min/max elevation filtering
//! - **range**: polygon range rasterization with partial coverage
//! - **weights**: multiplicative weight layers
//! - **aoh**: the AOH compositor, its fallback policy and manifests
//! - **fractionalize**: split a classified habitat map into per-class fractions
//! - **summaries**: richness and endemism over many AOH rasters

pub mod aoh;
pub mod crosswalk;
pub mod elevation;
pub mod fractionalize;
pub mod habitat;
pub mod range;
pub mod species;
pub mod summaries;
pub mod weights;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::aoh::{
        aoh_batch, aoh_for_species, aoh_for_species_file, compute_aoh, species_files, AohLayers,
        AohManifest, AohOutcome, AohParams, AohSources, AohTotals, PassState,
    };
    pub use crate::crosswalk::{CrosswalkTable, HabitatCode};
    pub use crate::elevation::{ElevationLayer, ElevationSource};
    pub use crate::fractionalize::{fractionalize, habitat_process, FractionalizeParams, FractionalizeReport};
    pub use crate::habitat::{HabitatLayer, HabitatSource};
    pub use crate::range::{RangeRaster, Warning};
    pub use crate::species::{Season, SpeciesRecord, TidyParams};
    pub use crate::summaries::{endemism, endemism_from_dir, richness, richness_from_dir, SummaryParams};
    pub use aohcalc_core::prelude::*;
}
