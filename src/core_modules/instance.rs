// THEORY:
// An `Instance` is one counted pill: a connected set of grown-region pixels that
// survived the area filter. Like every other result type it is a "dumb" data
// container recomputed per call; nothing about it persists between images.

use serde::Serialize;

/// A pixel coordinate in the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Axis-aligned box given by its top-left corner and size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing both corners (inclusive).
    pub fn from_corners(top_left: Point, bottom_right: Point) -> Self {
        BoundingBox {
            left: top_left.x,
            top: top_left.y,
            width: bottom_right.x - top_left.x + 1,
            height: bottom_right.y - top_left.y + 1,
        }
    }

    pub fn right(&self) -> u32 {
        self.left + self.width - 1
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height - 1
    }
}

/// A single counted object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    /// Position in the retained list, starting at 1.
    pub id: u32,
    /// The grown marker region this instance came from.
    pub region_id: i32,
    /// Number of member pixels.
    pub area: usize,
    pub bounding_box: BoundingBox,
    /// Mean position of the member pixels.
    pub centroid: (f64, f64),
}
