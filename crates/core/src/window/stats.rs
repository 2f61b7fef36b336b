//! Streamed summary statistics

use crate::error::Result;
use crate::io::RasterSource;
use crate::window::BlockPlan;
use serde::Serialize;

/// Basic statistics over the valid (non-NaN) pixels of a raster
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RasterStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub sum: f64,
    pub valid_count: usize,
    pub nodata_count: usize,
}

/// Stream a source block by block and accumulate its statistics.
pub fn summarize(source: &dyn RasterSource, plan: BlockPlan) -> Result<RasterStatistics> {
    let grid = source.grid();
    let mut stats = RasterStatistics::default();

    for window in plan.windows(grid.width, grid.height) {
        let block = source.read_window(&window)?;
        for &value in block.iter() {
            if value.is_nan() {
                stats.nodata_count += 1;
                continue;
            }
            stats.min = Some(stats.min.map_or(value, |m| m.min(value)));
            stats.max = Some(stats.max.map_or(value, |m| m.max(value)));
            stats.sum += value;
            stats.valid_count += 1;
        }
    }

    if stats.valid_count > 0 {
        stats.mean = Some(stats.sum / stats.valid_count as f64);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    #[test]
    fn test_statistics_skip_nodata() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        for i in 0..10 {
            for j in 0..10 {
                raster.set(i, j, (i * 10 + j) as f32).unwrap();
            }
        }
        raster.set(0, 0, f32::NAN).unwrap();

        let stats = summarize(&raster, BlockPlan::rows(3)).unwrap();
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(99.0));
        assert_eq!(stats.valid_count, 99);
        assert_eq!(stats.nodata_count, 1);
        assert_eq!(stats.mean, Some(4950.0 / 99.0));
    }
}
