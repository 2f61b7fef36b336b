//! Windowed raster I/O
//!
//! The computation engine only ever talks to rasters through three seams:
//! [`RasterSource`] (report geometry, read a window), [`RasterSink`] (write a
//! window) and [`OutputTarget`] (stage a complete output, then promote it).

mod area;
mod geotiff;
mod target;

pub use area::PixelAreaSource;
pub use geotiff::{read_geotiff, write_geotiff, GeoTiffReader};
pub use target::{write_json_atomic, GeoTiffTarget, MemoryTarget};

use crate::error::Result;
use crate::raster::{GridSpec, RasterInfo};
use crate::window::Window;
use ndarray::{Array2, ArrayView2};

/// A raster that can be read one window at a time.
///
/// Windows are in the source's own pixel coordinates and must lie inside it.
/// No-data pixels come back as NaN.
pub trait RasterSource: Send + Sync {
    fn info(&self) -> &RasterInfo;

    fn read_window(&self, window: &Window) -> Result<Array2<f64>>;

    fn grid(&self) -> &GridSpec {
        &self.info().grid
    }
}

impl<S: RasterSource + ?Sized> RasterSource for &S {
    fn info(&self) -> &RasterInfo {
        (**self).info()
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        (**self).read_window(window)
    }
}

impl<S: RasterSource + ?Sized> RasterSource for Box<S> {
    fn info(&self) -> &RasterInfo {
        (**self).info()
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        (**self).read_window(window)
    }
}

/// A raster that accepts window writes.
pub trait RasterSink {
    fn write_window(&mut self, window: &Window, data: ArrayView2<'_, f64>) -> Result<()>;
}

/// Where a computed raster ends up.
///
/// Output is produced in two steps so that a failed or abandoned computation
/// never leaves a file that looks complete: [`stage`](OutputTarget::stage)
/// writes the whole raster somewhere private, and
/// [`commit`](OutputTarget::commit) promotes it in one atomic step. Dropping
/// a staged output discards it.
pub trait OutputTarget: Send + Sync {
    type Staged: Send + Sync;

    /// Create a raster over `grid` and hand its sink to `fill`.
    fn stage(
        &self,
        grid: &GridSpec,
        nodata: Option<f64>,
        fill: &mut dyn FnMut(&mut dyn RasterSink) -> Result<()>,
    ) -> Result<Self::Staged>;

    /// Read back a staged output before it is committed.
    fn open_staged<'s>(&self, staged: &'s Self::Staged) -> Result<Box<dyn RasterSource + 's>>;

    fn commit(&self, staged: Self::Staged) -> Result<()>;
}

impl<T: OutputTarget + ?Sized> OutputTarget for &T {
    type Staged = T::Staged;

    fn stage(
        &self,
        grid: &GridSpec,
        nodata: Option<f64>,
        fill: &mut dyn FnMut(&mut dyn RasterSink) -> Result<()>,
    ) -> Result<Self::Staged> {
        (**self).stage(grid, nodata, fill)
    }

    fn open_staged<'s>(&self, staged: &'s Self::Staged) -> Result<Box<dyn RasterSource + 's>> {
        (**self).open_staged(staged)
    }

    fn commit(&self, staged: Self::Staged) -> Result<()> {
        (**self).commit(staged)
    }
}
