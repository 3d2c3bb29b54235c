//! fallwatchd - edge fall detection daemon
//!
//! This daemon:
//! 1. Opens the configured video source (webcam index, RTSP, HTTP MJPEG, file)
//! 2. Runs person detection and posture classification on every frame
//! 3. Raises an alert on a standing -> lying transition, rate limited by a cooldown
//! 4. Saves the alert frame, lead-up frames and a composite locally
//! 5. Uploads the alert once to the fall-event backend
//!
//! Ctrl-C stops the loop; the capture device is released on every exit path.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fallwatch::config::{DetectorKind, DispatchMode, FallwatchConfig};
use fallwatch::{
    open_detector, open_source, AlertSink, BackgroundDispatcher, CaptureStore, EventDispatcher,
    FallPipeline, HttpUploader, SourceSpec,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Edge fall detection daemon")]
struct Args {
    /// Video source: webcam index (0), rtsp:// or http:// URL, stub:// URL, or a video file.
    /// Overrides the configured source.
    source: Option<String>,

    /// Detector backend (stub|tract).
    #[arg(long)]
    detector: Option<DetectorKind>,

    /// ONNX model for the tract detector.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Upload mode (inline|background).
    #[arg(long)]
    dispatch_mode: Option<DispatchMode>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Args::parse()) {
        log::error!("fallwatchd stopped: {:#}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut cfg = FallwatchConfig::load()?;
    if let Some(source) = args.source {
        cfg.source = source;
    }
    if let Some(kind) = args.detector {
        cfg.detector.kind = kind;
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = model;
    }
    if let Some(mode) = args.dispatch_mode {
        cfg.upload.mode = mode;
    }
    cfg.validate()?;

    log::info!("fallwatchd {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "source={} detector={:?} threshold={} cooldown={:.1}s location={}",
        cfg.source,
        cfg.detector.kind,
        cfg.ratio_threshold,
        cfg.cooldown.as_secs_f64(),
        cfg.location
    );

    let store = CaptureStore::open(&cfg.capture_dir)?;
    let uploader = Arc::new(HttpUploader::new(cfg.upload.url.clone(), cfg.upload.timeout)?);
    let dispatcher = EventDispatcher::new(store, uploader);
    let mut sink: Box<dyn AlertSink> = match cfg.upload.mode {
        DispatchMode::Inline => Box::new(dispatcher),
        DispatchMode::Background => {
            Box::new(BackgroundDispatcher::spawn(dispatcher, cfg.upload.queue_depth)?)
        }
    };
    log::info!(
        "alerts saved to {} and uploaded to {} ({:?})",
        cfg.capture_dir.display(),
        cfg.upload.url,
        cfg.upload.mode
    );

    let spec = SourceSpec::parse(&cfg.source)?;
    let mut source = open_source(&spec)?;
    source
        .connect()
        .with_context(|| format!("failed to open video source: {}", cfg.source))?;

    let mut detector = match open_detector(&cfg.detector) {
        Ok(detector) => detector,
        Err(err) => {
            source.release();
            return Err(err);
        }
    };
    if let Err(err) = detector.warm_up() {
        log::warn!("detector {} warm-up failed: {:#}", detector.name(), err);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut pipeline = FallPipeline::for_source(cfg.pipeline_settings(), source.as_ref());
    let result = pipeline.run(source.as_mut(), detector.as_mut(), sink.as_mut(), &stop);
    sink.shutdown();

    let summary = result?;
    log::info!(
        "fallwatchd exiting: {:?}, {} alerts, {} suppressed",
        summary.reason,
        summary.counters.alerts,
        summary.counters.suppressed
    );
    Ok(())
}
