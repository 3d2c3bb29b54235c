use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Person/object detector backend.
///
/// Backends receive a decoded RGB frame and return boxes in that frame's
/// pixel coordinates. They are treated as a black box by the fall logic:
/// only the class, confidence and rectangle of each detection are used.
pub trait PersonDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
