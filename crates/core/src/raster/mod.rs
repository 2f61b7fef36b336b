//! Raster data structures and grid geometry

mod bbox;
mod element;
mod geotransform;
mod grid;
mod info;

pub use bbox::BoundingBox;
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
pub use info::{GridSpec, RasterInfo};
