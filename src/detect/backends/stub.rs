use anyhow::Result;
use image::RgbImage;
use std::collections::VecDeque;

use crate::detect::backend::PersonDetector;
use crate::detect::result::Detection;
use crate::posture::BoundingBox;

/// Stub backend for testing. Replays a fixed list of per-frame detections.
///
/// Once the script is exhausted every further frame yields no detections.
pub struct ScriptedBackend {
    script: VecDeque<Vec<Detection>>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }

    /// One person box per frame; `None` entries are frames with no person.
    pub fn from_boxes(boxes: Vec<Option<BoundingBox>>) -> Self {
        Self::new(
            boxes
                .into_iter()
                .map(|b| b.map(|b| vec![Detection::person(b, 0.9)]).unwrap_or_default())
                .collect(),
        )
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl PersonDetector for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

/// Stub backend that reports the bounding box of bright pixels as a person.
///
/// Pairs with the synthetic frame source, which paints its "person" as a
/// white rectangle on a dark background.
pub struct BlobBackend {
    luma_threshold: u8,
}

impl BlobBackend {
    pub fn new() -> Self {
        Self {
            luma_threshold: 200,
        }
    }
}

impl Default for BlobBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonDetector for BlobBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in frame.enumerate_pixels() {
            let [r, g, b] = px.0;
            let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            if luma < self.luma_threshold as u32 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }

        Ok(bounds
            .map(|(x1, y1, x2, y2)| {
                vec![Detection::person(
                    BoundingBox::new(x1 as i32, y1 as i32, x2 as i32 + 1, y2 as i32 + 1),
                    0.85,
                )]
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn scripted_backend_replays_then_goes_quiet() {
        let mut backend = ScriptedBackend::from_boxes(vec![
            Some(BoundingBox::new(0, 0, 10, 20)),
            None,
        ]);
        let frame = RgbImage::new(1, 1);
        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn blob_backend_finds_bright_rectangle() {
        let mut frame = RgbImage::new(64, 48);
        for y in 10..30 {
            for x in 20..25 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let dets = BlobBackend::new().detect(&frame).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(20, 10, 25, 30));
    }

    #[test]
    fn blob_backend_dark_frame_has_no_person() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([30, 30, 30]));
        assert!(BlobBackend::new().detect(&frame).unwrap().is_empty());
    }
}
