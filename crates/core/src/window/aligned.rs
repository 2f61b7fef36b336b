//! Reading sources through the windows of a shared computation grid

use crate::error::{Error, Result};
use crate::io::RasterSource;
use crate::raster::GridSpec;
use crate::window::Window;
use ndarray::{s, Array2};

/// A source viewed through the pixel grid of a computation.
///
/// Grid alignment is checked once, on construction. Reads of windows that
/// fall partly or wholly outside the source extent are padded with `fill`
/// instead of failing.
pub struct AlignedSource<'a> {
    source: &'a dyn RasterSource,
    /// Source top-left pixel, in grid pixel coordinates
    col_shift: i64,
    row_shift: i64,
    fill: f64,
    /// Source is one pixel wide and repeated across every grid column
    broadcast_columns: bool,
}

impl<'a> AlignedSource<'a> {
    /// Align a source that shares the grid's pixel size and registration.
    pub fn new(source: &'a dyn RasterSource, grid: &GridSpec, fill: f64) -> Result<Self> {
        grid.check_compatible(source.grid())?;
        let (col_shift, row_shift) = grid.pixel_offset(source.grid())?;
        Ok(Self {
            source,
            col_shift,
            row_shift,
            fill,
            broadcast_columns: false,
        })
    }

    /// Align a one-pixel-wide source whose single column is broadcast across
    /// the grid.
    pub fn column(source: &'a dyn RasterSource, grid: &GridSpec, fill: f64) -> Result<Self> {
        if source.grid().width != 1 {
            return Err(Error::Alignment(format!(
                "column raster must be one pixel wide, found {}",
                source.grid().width
            )));
        }
        grid.check_column_compatible(source.grid())?;
        let row_shift = grid.row_offset(source.grid())?;
        Ok(Self {
            source,
            col_shift: 0,
            row_shift,
            fill,
            broadcast_columns: true,
        })
    }

    /// [`AlignedSource::column`] for one-pixel-wide sources laid over a wider
    /// grid, [`AlignedSource::new`] otherwise.
    pub fn auto(source: &'a dyn RasterSource, grid: &GridSpec, fill: f64) -> Result<Self> {
        if source.grid().width == 1 && grid.width > 1 {
            Self::column(source, grid, fill)
        } else {
            Self::new(source, grid, fill)
        }
    }

    /// Read the grid window, padding uncovered pixels with the fill value.
    pub fn read(&self, window: &Window) -> Result<Array2<f64>> {
        let src = self.source.grid();
        let mut out = Array2::from_elem(window.shape(), self.fill);

        let Some((r0, r1)) = overlap(window.row_offset, window.height, self.row_shift, src.height) else {
            return Ok(out);
        };

        if self.broadcast_columns {
            let column = self
                .source
                .read_window(&Window::new(0, (r0 - self.row_shift) as usize, 1, (r1 - r0) as usize))?;
            let dst_r0 = (r0 - window.row_offset as i64) as usize;
            for (i, value) in column.column(0).iter().enumerate() {
                out.row_mut(dst_r0 + i).fill(*value);
            }
            return Ok(out);
        }

        let Some((c0, c1)) = overlap(window.col_offset, window.width, self.col_shift, src.width) else {
            return Ok(out);
        };

        let src_window = Window::new(
            (c0 - self.col_shift) as usize,
            (r0 - self.row_shift) as usize,
            (c1 - c0) as usize,
            (r1 - r0) as usize,
        );
        let block = self.source.read_window(&src_window)?;

        let dst_r0 = (r0 - window.row_offset as i64) as usize;
        let dst_c0 = (c0 - window.col_offset as i64) as usize;
        out.slice_mut(s![
            dst_r0..dst_r0 + src_window.height,
            dst_c0..dst_c0 + src_window.width
        ])
        .assign(&block);
        Ok(out)
    }
}

/// Grid range `[start, end)` where the window span and the shifted source
/// span overlap.
fn overlap(offset: usize, len: usize, shift: i64, src_len: usize) -> Option<(i64, i64)> {
    let start = (offset as i64).max(shift);
    let end = (offset as i64 + len as i64).min(shift + src_len as i64);
    (end > start).then_some((start, end))
}
