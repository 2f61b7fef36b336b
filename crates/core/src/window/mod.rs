//! Chunked iteration over raster grids
//!
//! Every pass over a computation grid walks the same row-major sequence of
//! [`Window`]s produced by a [`BlockPlan`]. Windows never overlap and their
//! union is exactly the grid, so per-window accumulation gives exact totals
//! while peak memory stays bounded by the block size, not the raster size.

mod aligned;
mod stats;

pub use aligned::AlignedSource;
pub use stats::{summarize, RasterStatistics};

use crate::raster::{BoundingBox, GeoTransform};
use serde::{Deserialize, Serialize};

/// Default number of rows per block
pub const DEFAULT_BLOCK_ROWS: usize = 512;

/// A rectangular pixel region of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Column offset in the grid
    pub col_offset: usize,
    /// Row offset in the grid
    pub row_offset: usize,
    /// Number of columns
    pub width: usize,
    /// Number of rows
    pub height: usize,
}

impl Window {
    pub fn new(col_offset: usize, row_offset: usize, width: usize, height: usize) -> Self {
        Self {
            col_offset,
            row_offset,
            width,
            height,
        }
    }

    /// Window covering a whole `width` x `height` grid
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// One past the last column
    pub fn col_end(&self) -> usize {
        self.col_offset + self.width
    }

    /// One past the last row
    pub fn row_end(&self) -> usize {
        self.row_offset + self.height
    }

    /// Array shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Geographic extent of the window under `transform`
    pub fn bounds(&self, transform: &GeoTransform) -> BoundingBox {
        transform
            .shifted(self.col_offset as i64, self.row_offset as i64)
            .bounds(self.width, self.height)
    }
}

/// How a grid is cut into blocks.
///
/// Full-width row bands are the default because GeoTIFF strips are written
/// top to bottom; `block_cols` additionally splits each band into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlan {
    pub block_rows: usize,
    pub block_cols: Option<usize>,
}

impl Default for BlockPlan {
    fn default() -> Self {
        Self {
            block_rows: DEFAULT_BLOCK_ROWS,
            block_cols: None,
        }
    }
}

impl BlockPlan {
    /// Full-width bands of `rows` rows
    pub fn rows(rows: usize) -> Self {
        Self {
            block_rows: rows.max(1),
            block_cols: None,
        }
    }

    /// Tiles of `rows` x `cols` pixels
    pub fn tiles(rows: usize, cols: usize) -> Self {
        Self {
            block_rows: rows.max(1),
            block_cols: Some(cols.max(1)),
        }
    }

    /// Full-width bands sized so that `layers` f64 arrays of one band fit
    /// in `budget_bytes`. Always at least one row.
    pub fn from_byte_budget(budget_bytes: usize, width: usize, layers: usize) -> Self {
        let row_bytes = width.max(1) * layers.max(1) * std::mem::size_of::<f64>();
        Self::rows(budget_bytes / row_bytes)
    }

    /// Row-major windows covering a `width` x `height` grid
    pub fn windows(&self, width: usize, height: usize) -> WindowIterator {
        WindowIterator::new(width, height, self.block_rows, self.block_cols.unwrap_or(width))
    }
}

/// Row-major iterator over the windows of a grid
#[derive(Debug, Clone)]
pub struct WindowIterator {
    total_cols: usize,
    total_rows: usize,
    block_cols: usize,
    block_rows: usize,
    current_row: usize,
    current_col: usize,
}

impl WindowIterator {
    pub fn new(total_cols: usize, total_rows: usize, block_rows: usize, block_cols: usize) -> Self {
        Self {
            total_cols,
            total_rows,
            block_cols: block_cols.max(1),
            block_rows: block_rows.max(1),
            current_row: 0,
            current_col: 0,
        }
    }
}

impl Iterator for WindowIterator {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let rows = self.block_rows.min(self.total_rows - self.current_row);
        let cols = self.block_cols.min(self.total_cols - self.current_col);
        let window = Window::new(self.current_col, self.current_row, cols, rows);

        self.current_col += cols;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += rows;
        }

        Some(window)
    }
}
