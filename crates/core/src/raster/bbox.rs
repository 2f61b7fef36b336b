//! Axis-aligned geographic extents

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has no positive area
    pub fn is_empty(&self) -> bool {
        !(self.max_x > self.min_x && self.max_y > self.min_y)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Overlapping region, or `None` when the boxes share no area
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let result = BoundingBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Envelope of a set of points, `None` if the iterator is empty
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<BoundingBox> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = BoundingBox::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }
}
