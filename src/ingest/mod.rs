//! Frame ingestion sources.
//!
//! This module provides the sources the edge loop reads frames from:
//! - USB webcams by index (feature: ingest-v4l2)
//! - RTSP streams and local video files (feature: ingest-ffmpeg)
//! - HTTP MJPEG/JPEG streams, e.g. phone "IP webcam" apps
//! - Synthetic `stub://` source (testing and demos)
//!
//! Every source yields `Frame`s in packed RGB8. A source that cannot be opened
//! fails in `open_source`/`connect`, before the loop starts; end of stream is
//! `Ok(None)` from `next_frame`.

pub mod http;
#[cfg(feature = "ingest-ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

pub use http::{HttpConfig, HttpSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Whether frames come from a recording (paced at native rate) or a live feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Live,
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A frame source. Owned exclusively by the processing loop.
pub trait FrameSource {
    /// Open the underlying device, stream or file.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn kind(&self) -> SourceKind;

    /// Native frame rate when the source reports one.
    fn nominal_fps(&self) -> Option<f64> {
        None
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the capture resource. Called once when the loop exits.
    fn release(&mut self) {}
}

/// Parsed form of a source argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Webcam by index (`0` -> `/dev/video0`).
    Webcam(u32),
    /// `rtsp://` or `rtsps://` network stream.
    Rtsp(String),
    /// `http://` or `https://` MJPEG/JPEG stream.
    Http(String),
    /// `stub://` synthetic source.
    Synthetic(String),
    /// Anything else is a local video file path.
    File(String),
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            anyhow::bail!("video source must not be empty");
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("webcam index out of range: {}", raw))?;
            return Ok(SourceSpec::Webcam(index));
        }
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("stub://") {
            Ok(SourceSpec::Synthetic(raw.to_string()))
        } else if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            Ok(SourceSpec::Rtsp(raw.to_string()))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(SourceSpec::Http(raw.to_string()))
        } else if raw.contains("://") {
            anyhow::bail!("unsupported video source scheme: {}", raw)
        } else {
            Ok(SourceSpec::File(raw.to_string()))
        }
    }

    /// True for local recordings, which are paced at their native frame rate.
    pub fn is_file(&self) -> bool {
        matches!(self, SourceSpec::File(_))
    }
}

/// Build (but do not connect) a frame source for `spec`.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Synthetic(url) => Ok(Box::new(SyntheticSource::new(
            SyntheticConfig::from_url(url)?,
        ))),
        SourceSpec::Http(url) => Ok(Box::new(HttpSource::new(HttpConfig {
            url: url.clone(),
            ..HttpConfig::default()
        })?)),
        SourceSpec::File(path) => {
            if !Path::new(path).is_file() {
                anyhow::bail!("failed to open video source: {} is not a file", path);
            }
            open_ffmpeg(path, SourceKind::File)
        }
        SourceSpec::Rtsp(url) => open_ffmpeg(url, SourceKind::Live),
        SourceSpec::Webcam(index) => open_webcam(*index),
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_ffmpeg(input: &str, kind: SourceKind) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(ffmpeg::FfmpegSource::new(input, kind)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_ffmpeg(input: &str, _kind: SourceKind) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("source {} requires the ingest-ffmpeg feature", input)
}

#[cfg(feature = "ingest-v4l2")]
fn open_webcam(index: u32) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(v4l2::WebcamSource::new(v4l2::WebcamConfig::new(index))))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_webcam(index: u32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("webcam {} requires the ingest-v4l2 feature", index)
}
