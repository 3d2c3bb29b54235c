//! Choosing which detected person the fall logic follows.
//!
//! There is no identity tracking: each frame picks *a* person, independently.

use crate::detect::result::{Detection, ObjectClass};
use crate::posture::BoundingBox;

/// Picks at most one person box out of a frame's detections.
pub trait PersonSelector: Send {
    fn select(&self, detections: &[Detection]) -> Option<BoundingBox>;
}

/// Default policy: the person box with the largest area.
///
/// Boxes with non-positive area never win. Ties keep the earlier box.
#[derive(Clone, Debug, Default)]
pub struct LargestPersonSelector {
    min_confidence: f32,
}

impl LargestPersonSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

impl PersonSelector for LargestPersonSelector {
    fn select(&self, detections: &[Detection]) -> Option<BoundingBox> {
        let mut best: Option<BoundingBox> = None;
        let mut max_area = 0i128;
        for det in detections {
            if det.class != ObjectClass::Person || det.confidence < self.min_confidence {
                continue;
            }
            let area = det.bbox.area();
            if area > max_area {
                max_area = area;
                best = Some(det.bbox);
            }
        }
        best
    }
}

/// Number of person boxes in a detection list.
pub fn person_count(detections: &[Detection]) -> usize {
    detections
        .iter()
        .filter(|d| d.class == ObjectClass::Person)
        .count()
}
