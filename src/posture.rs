//! Posture classification from a single bounding box.
//!
//! A wide, short box is the geometric signature of a body lying on the floor;
//! a narrow, tall box is a standing body. No keypoints are involved.

use serde::{Deserialize, Serialize};

/// Width/height ratio above which a box is classified as lying.
pub const DEFAULT_RATIO_THRESHOLD: f64 = 1.3;

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    /// Signed area. Extents span up to 2^32, so the product needs 128 bits.
    pub fn area(&self) -> i128 {
        i128::from(self.width()) * i128::from(self.height())
    }

    /// Width over height, or `None` for a zero-height box.
    pub fn aspect_ratio(&self) -> Option<f64> {
        let h = self.height();
        if h == 0 {
            return None;
        }
        Some(self.width() as f64 / h as f64)
    }
}

/// Returns true when the box reads as a lying body.
///
/// Zero-height boxes are never lying. Boxes with negative extents are taken
/// as given; the ratio is strictly compared, so a ratio equal to the
/// threshold is standing.
pub fn is_lying_down(bbox: &BoundingBox, ratio_threshold: f64) -> bool {
    match bbox.aspect_ratio() {
        Some(ratio) => ratio > ratio_threshold,
        None => false,
    }
}

/// Classified posture of the tracked person for one processed frame.
///
/// Fields are private so `is_lying` can only ever be derived from `bbox`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PersonState {
    is_lying: bool,
    bbox: BoundingBox,
}

impl PersonState {
    pub fn classify(bbox: BoundingBox, ratio_threshold: f64) -> Self {
        Self {
            is_lying: is_lying_down(&bbox, ratio_threshold),
            bbox,
        }
    }

    pub fn is_lying(&self) -> bool {
        self.is_lying
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn label(&self) -> &'static str {
        if self.is_lying {
            "LYING"
        } else {
            "STANDING"
        }
    }
}
