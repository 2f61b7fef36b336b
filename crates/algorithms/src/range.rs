//! Range rasterizer
//!
//! Burns a species range polygon into the pixel grid of the basemaps. The
//! burn is lazy: [`RangeRaster`] is a virtual [`RasterSource`] covering the
//! polygon's pixel footprint and rasterizes each window on demand, so a
//! continental range never has to exist in memory as a whole.
//!
//! Coverage is sampled on a regular `samples x samples` lattice inside each
//! pixel. With one sample per axis this is the usual pixel-centre rule and
//! the mask is 0/1; more samples give fractional partial-pixel coverage.

use aohcalc_core::io::RasterSource;
use aohcalc_core::window::Window;
use aohcalc_core::{BoundingBox, GeoTransform, GridSpec, RasterInfo, Result};
use geo::BoundingRect;
use geo_types::{LineString, MultiPolygon};
use ndarray::Array2;
use serde::Serialize;

/// Non-fatal conditions recorded alongside a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    /// The rasterized range does not overlap the basemaps
    GeometryEmpty,
}

/// Edge of a polygon ring in pixel coordinates of the owning grid
#[derive(Debug, Clone, Copy)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Edge {
    fn y_span(&self) -> (f64, f64) {
        (self.y0.min(self.y1), self.y0.max(self.y1))
    }

    /// X where the edge crosses the horizontal line at `y`, half-open in y
    /// so shared vertices are counted once.
    fn crossing(&self, y: f64) -> Option<f64> {
        if (self.y0 <= y) == (self.y1 <= y) {
            return None;
        }
        Some(self.x0 + (y - self.y0) * (self.x1 - self.x0) / (self.y1 - self.y0))
    }
}

fn ring_edges<'a>(ring: &'a LineString<f64>, transform: &'a GeoTransform) -> impl Iterator<Item = Edge> + 'a {
    ring.lines().map(move |line| {
        let (x0, y0) = transform.geo_to_pixel(line.start.x, line.start.y);
        let (x1, y1) = transform.geo_to_pixel(line.end.x, line.end.y);
        Edge { x0, y0, x1, y1 }
    })
}

/// A polygon range burnt into a grid
#[derive(Debug, Clone)]
pub struct RangeRaster {
    info: RasterInfo,
    /// Rings of each polygon, even-odd within a polygon, unioned across them
    polygons: Vec<Vec<Edge>>,
    samples: usize,
}

impl RangeRaster {
    /// Rasterize `geometry` in the registration of `grid`.
    ///
    /// The raster covers the pixels touched by the geometry's bounding box,
    /// which may reach outside `grid`. An empty geometry gives an empty raster.
    pub fn new(geometry: &MultiPolygon<f64>, grid: &GridSpec, samples: usize) -> Self {
        let footprint = match geometry.bounding_rect() {
            Some(rect) => {
                let bbox = BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
                let (col0, row0, col1, row1) = grid.pixel_range_for_bbox(&bbox);
                grid.subgrid(col0, row0, (col1 - col0) as usize, (row1 - row0) as usize)
            }
            None => grid.subgrid(0, 0, 0, 0),
        };

        let transform = footprint.transform;
        let polygons = geometry
            .iter()
            .map(|polygon| {
                std::iter::once(polygon.exterior())
                    .chain(polygon.interiors())
                    .flat_map(|ring| ring_edges(ring, &transform))
                    .filter(|e| e.y0 != e.y1)
                    .collect::<Vec<_>>()
            })
            .filter(|edges| !edges.is_empty())
            .collect();

        Self {
            info: RasterInfo::new(footprint, None),
            polygons,
            samples: samples.max(1),
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Covered sample intervals `[start, end)` on the scanline at `y`,
    /// merged across polygons, in pixel x units.
    fn spans(&self, y: f64, polygons: &[Vec<Edge>]) -> Vec<(f64, f64)> {
        let mut spans = Vec::new();
        let mut crossings = Vec::new();
        for edges in polygons {
            crossings.clear();
            crossings.extend(edges.iter().filter_map(|e| e.crossing(y)));
            crossings.sort_by(f64::total_cmp);
            spans.extend(crossings.chunks_exact(2).map(|pair| (pair[0], pair[1])));
        }
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
    }
}

impl RasterSource for RangeRaster {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        let s = self.samples;
        let sf = s as f64;
        let mut counts: Array2<u32> = Array2::zeros(window.shape());

        // only edges reaching into this band of rows
        let (top, bottom) = (window.row_offset as f64, window.row_end() as f64);
        let polygons: Vec<Vec<Edge>> = self
            .polygons
            .iter()
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| {
                        let (lo, hi) = e.y_span();
                        hi >= top && lo <= bottom
                    })
                    .copied()
                    .collect()
            })
            .collect();

        // sample lattice indices, in units of 1/s pixel
        let first_sample = (window.col_offset * s) as i64;
        let end_sample = (window.col_end() * s) as i64;

        for (r, mut row) in counts.rows_mut().into_iter().enumerate() {
            let pixel_row = window.row_offset + r;
            for k in 0..s {
                let y = pixel_row as f64 + (k as f64 + 0.5) / sf;
                for (x0, x1) in self.spans(y, &polygons) {
                    // sample g sits at (g + 0.5) / s
                    let g0 = ((x0 * sf - 0.5).ceil() as i64).max(first_sample);
                    let g1 = ((x1 * sf - 0.5).ceil() as i64).min(end_sample);
                    for g in g0..g1 {
                        let col = (g / s as i64) as usize - window.col_offset;
                        row[col] += 1;
                    }
                }
            }
        }

        let per_pixel = (s * s) as f64;
        Ok(counts.mapv(|c| c as f64 / per_pixel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo_types::{polygon, Polygon};

    fn grid() -> GridSpec {
        GridSpec::new(GeoTransform::new(0.0, 10.0, 1.0, -1.0), 10, 10, None)
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]
    }

    fn burn(range: &RangeRaster) -> Array2<f64> {
        let g = range.grid();
        range.read_window(&Window::full(g.width, g.height)).unwrap()
    }

    #[test]
    fn test_pixel_aligned_square() {
        let range = RangeRaster::new(&MultiPolygon::new(vec![square(2.0, 3.0, 5.0, 7.0)]), &grid(), 1);
        let g = range.grid();
        assert_eq!((g.width, g.height), (3, 4));
        assert_eq!(g.transform.origin_x, 2.0);
        assert_eq!(g.transform.origin_y, 7.0);
        assert_eq!(burn(&range).sum(), 12.0);
    }

    #[test]
    fn test_hole_is_excluded() {
        let outer = square(0.0, 0.0, 6.0, 6.0);
        let hole = square(2.0, 2.0, 4.0, 4.0);
        let donut = Polygon::new(outer.exterior().clone(), vec![hole.exterior().clone()]);
        let range = RangeRaster::new(&MultiPolygon::new(vec![donut]), &grid(), 1);
        let mask = burn(&range);
        assert_eq!(mask.sum(), 32.0);
        // pixel (row 2, col 2) lies inside the hole
        assert_eq!(mask[[2, 2]], 0.0);
    }

    #[test]
    fn test_overlapping_polygons_do_not_cancel() {
        let mp = MultiPolygon::new(vec![square(0.0, 0.0, 4.0, 4.0), square(2.0, 0.0, 6.0, 4.0)]);
        let mask = burn(&RangeRaster::new(&mp, &grid(), 1));
        assert_eq!(mask.sum(), 24.0);
        assert!(mask.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_fractional_coverage() {
        // triangle covering half of a 2x2 pixel square
        let tri = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let range = RangeRaster::new(&MultiPolygon::new(vec![tri]), &grid(), 16);
        let mask = burn(&range);
        assert_relative_eq!(mask.sum(), 2.0, epsilon = 0.1);
        assert!(mask.iter().any(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_windows_match_full_read() {
        let tri = polygon![(x: 0.5, y: 0.5), (x: 9.5, y: 1.0), (x: 4.0, y: 9.5), (x: 0.5, y: 0.5)];
        let range = RangeRaster::new(&MultiPolygon::new(vec![tri]), &grid(), 2);
        let full = burn(&range);
        let g = range.grid().clone();
        for w in aohcalc_core::window::BlockPlan::tiles(3, 4).windows(g.width, g.height) {
            let block = range.read_window(&w).unwrap();
            let expected = full.slice(ndarray::s![w.row_offset..w.row_end(), w.col_offset..w.col_end()]);
            assert_eq!(block, expected);
        }
    }

    #[test]
    fn test_empty_geometry() {
        let range = RangeRaster::new(&MultiPolygon::new(vec![]), &grid(), 1);
        assert!(range.grid().is_empty());
    }
}
