pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{BlobBackend, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, YoloParams};
