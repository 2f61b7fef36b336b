//! # aohcalc core
//!
//! Core types, traits and I/O for the Area of Habitat calculator.
//!
//! This crate provides:
//! - `Raster<T>`: in-memory georeferenced grid
//! - `GeoTransform`, `GridSpec`, `RasterInfo`: grid geometry and alignment
//! - `CRS` and WGS84/UTM coordinate transforms
//! - The window engine used by every streamed computation
//! - `RasterSource` / `RasterSink` / `OutputTarget` and their GeoTIFF and
//!   in-memory implementations
//! - GeoJSON feature reading

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;
pub mod window;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{BoundingBox, GeoTransform, GridSpec, Raster, RasterElement, RasterInfo};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{OutputTarget, RasterSink, RasterSource};
    pub use crate::raster::{BoundingBox, GeoTransform, GridSpec, Raster, RasterElement, RasterInfo};
    pub use crate::window::{AlignedSource, BlockPlan, Window};
}
