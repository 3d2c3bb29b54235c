mod backend;
pub mod backends;
mod result;
mod select;

use anyhow::Result;

use crate::config::{DetectorKind, DetectorSettings};

pub use backend::PersonDetector;
pub use backends::{BlobBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, YoloParams};
pub use result::{Detection, ObjectClass};
pub use select::{person_count, LargestPersonSelector, PersonSelector};

/// Build the configured detector backend.
pub fn open_detector(settings: &DetectorSettings) -> Result<Box<dyn PersonDetector>> {
    match settings.kind {
        DetectorKind::Stub => Ok(Box::new(BlobBackend::new())),
        DetectorKind::Tract => open_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn PersonDetector>> {
    let params = YoloParams {
        input_size: settings.input_size,
        conf_threshold: settings.confidence,
        iou_threshold: settings.iou,
        ..YoloParams::default()
    };
    Ok(Box::new(TractBackend::new(&settings.model_path, params)?))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn PersonDetector>> {
    anyhow::bail!(
        "detector tract ({}) requires the backend-tract feature",
        settings.model_path.display()
    )
}
