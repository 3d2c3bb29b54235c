//! fallwatch
//!
//! Edge fall detection for a single camera. Each frame goes through person
//! detection, a bounding-box posture classifier and an edge-triggered
//! standing-to-lying check; accepted falls are rate limited, saved locally with
//! their lead-up frames, and uploaded once to the fall-event backend.
//!
//! # Module Structure
//!
//! - `posture`: bounding boxes and the aspect-ratio posture classifier
//! - `fall`: edge-triggered fall detection and the previous-posture slot
//! - `cooldown`: alert rate limiting
//! - `frame`: frames and the pre-event ring buffer
//! - `composite`: labelled lead-up grid image
//! - `detect`: person detector backends and person selection
//! - `ingest`: frame sources (webcam, RTSP, files, HTTP MJPEG, synthetic)
//! - `storage`: local alert artifacts and their sidecars
//! - `transport`: upload and query clients for the backend
//! - `dispatch`: save-then-upload alert handling, inline or on a worker
//! - `pipeline`: the processing loop
//! - `config`: file + environment configuration

pub mod composite;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod dispatch;
pub mod fall;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod posture;
pub mod storage;
pub mod transport;

pub use composite::build_composite;
pub use config::{DetectorKind, DispatchMode, FallwatchConfig};
pub use cooldown::{should_alert, CooldownGate, GateDecision};
pub use detect::{
    open_detector, Detection, LargestPersonSelector, ObjectClass, PersonDetector, PersonSelector,
};
pub use dispatch::{
    AlertSink, BackgroundDispatcher, EventDispatcher, FallAlert, ReconcileDefaults, UploadResult,
};
pub use fall::{detect_fall, FallStateMachine, MissPolicy, Transition};
pub use frame::{buffer_capacity, Frame, FrameBuffer};
pub use ingest::{open_source, FrameSource, SourceKind, SourceSpec};
pub use pipeline::{FallPipeline, FrameOutcome, LoopCounters, PipelineSettings, RunSummary, StopReason};
pub use posture::{is_lying_down, BoundingBox, PersonState};
pub use storage::{AlertRecord, CaptureStore, StoredAlert};
pub use transport::{BackendClient, FallEventRecord, HttpUploader, UploadError, Uploader};
