use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use fallwatch::detect::BlobBackend;
use fallwatch::ingest::{SyntheticConfig, SyntheticSource};
use fallwatch::transport::{UploadReceipt, UploadRequest};
use fallwatch::{
    BackgroundDispatcher, CaptureStore, EventDispatcher, FallPipeline, FrameSource,
    PipelineSettings, StopReason, UploadError, Uploader,
};

/// Accepts every upload and remembers what it was sent.
#[derive(Default)]
struct RecordingUploader {
    requests: Mutex<Vec<(String, String, usize)>>,
}

impl RecordingUploader {
    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Uploader for RecordingUploader {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push((
            request.location.clone(),
            request.filename.clone(),
            request.image_jpeg.len(),
        ));
        Ok(UploadReceipt {
            id: Some(requests.len() as i64),
            image_url: None,
        })
    }

    fn endpoint(&self) -> &str {
        "memory://"
    }
}

/// 4 standing frames, 4 lying, 4 standing, 4 lying; paced quickly as a file.
fn two_falls() -> SyntheticSource {
    let config = SyntheticConfig::from_url("stub://fall?kind=file&fps=200&frames=16&period=4")
        .expect("synthetic config");
    let mut source = SyntheticSource::new(config);
    source.connect().expect("connect");
    source
}

#[test]
fn recording_with_two_falls_alerts_once_within_cooldown() {
    let dir = TempDir::new().expect("tempdir");
    let uploader = Arc::new(RecordingUploader::default());
    let mut sink = EventDispatcher::new(
        CaptureStore::open(dir.path()).expect("store"),
        uploader.clone(),
    );
    let mut source = two_falls();
    let mut detector = BlobBackend::new();
    let settings = PipelineSettings {
        location: "bedroom".to_string(),
        ..PipelineSettings::default()
    };
    let mut pipeline = FallPipeline::for_source(settings, &source);
    let stop = AtomicBool::new(false);

    let summary = pipeline
        .run(&mut source, &mut detector, &mut sink, &stop)
        .expect("run");

    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.counters.frames, 16);
    assert_eq!(summary.counters.person_frames, 16);
    assert_eq!(summary.counters.alerts, 1);
    assert_eq!(summary.counters.suppressed, 1);
    assert!(!source.is_healthy(), "source released at end of stream");

    assert_eq!(uploader.count(), 1);
    let (location, filename, bytes) = uploader.requests.lock().unwrap()[0].clone();
    assert_eq!(location, "bedroom");
    assert!(filename.ends_with("_fall.jpg"));
    assert!(bytes > 0);

    let store = sink.store();
    let alerts = store.list_alerts().expect("list");
    assert_eq!(alerts.len(), 1);
    let record = alerts[0].record.clone().expect("sidecar");
    assert_eq!(record.lead_up_frames, 4);
    assert!(record.upload.uploaded);
    assert!(store.sequence_path(&alerts[0].stem).is_file());
}

#[test]
fn zero_cooldown_alerts_on_every_fall() {
    let dir = TempDir::new().expect("tempdir");
    let uploader = Arc::new(RecordingUploader::default());
    let mut sink = EventDispatcher::new(
        CaptureStore::open(dir.path()).expect("store"),
        uploader.clone(),
    );
    let mut source = two_falls();
    let mut detector = BlobBackend::new();
    let settings = PipelineSettings {
        cooldown: Duration::ZERO,
        ..PipelineSettings::default()
    };
    let mut pipeline = FallPipeline::for_source(settings, &source);

    let summary = pipeline
        .run(&mut source, &mut detector, &mut sink, &AtomicBool::new(false))
        .expect("run");

    assert_eq!(summary.counters.alerts, 2);
    assert_eq!(summary.counters.suppressed, 0);
    assert_eq!(uploader.count(), 2);
    assert_eq!(sink.store().list_alerts().expect("list").len(), 2);
}

#[test]
fn background_dispatch_uploads_after_shutdown() {
    let dir = TempDir::new().expect("tempdir");
    let uploader = Arc::new(RecordingUploader::default());
    let dispatcher = EventDispatcher::new(
        CaptureStore::open(dir.path()).expect("store"),
        uploader.clone(),
    );
    let mut sink = BackgroundDispatcher::spawn(dispatcher, 4).expect("spawn");
    let mut source = two_falls();
    let mut detector = BlobBackend::new();
    let mut pipeline = FallPipeline::for_source(PipelineSettings::default(), &source);

    let summary = pipeline
        .run(&mut source, &mut detector, &mut sink, &AtomicBool::new(false))
        .expect("run");
    fallwatch::AlertSink::shutdown(&mut sink);

    assert_eq!(summary.counters.alerts, 1);
    assert_eq!(uploader.count(), 1);
    let store = CaptureStore::open(dir.path()).expect("store");
    assert!(store.pending().expect("pending").is_empty());
}

#[test]
fn stop_flag_ends_the_loop_before_any_frame() {
    let dir = TempDir::new().expect("tempdir");
    let uploader = Arc::new(RecordingUploader::default());
    let mut sink = EventDispatcher::new(CaptureStore::open(dir.path()).expect("store"), uploader);
    let mut source = two_falls();
    let mut detector = BlobBackend::new();
    let mut pipeline = FallPipeline::for_source(PipelineSettings::default(), &source);

    let summary = pipeline
        .run(&mut source, &mut detector, &mut sink, &AtomicBool::new(true))
        .expect("run");

    assert_eq!(summary.reason, StopReason::Signal);
    assert_eq!(summary.counters.frames, 0);
}
