//! USB webcam source over V4L2.
//!
//! Webcam `N` is `/dev/videoN`. Packed RGB (`RGB3`) is requested first; cameras
//! that only stream compressed output are read as MJPEG and decoded per frame.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::FourCC;

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

const CAPTURE_BUFFERS: u32 = 4;
/// A webcam that has not produced a frame for this long reports unhealthy.
const STALL_AFTER: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct WebcamConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// Requested rate; 0 keeps the driver's choice.
    pub fps: u32,
}

impl WebcamConfig {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            width: 640,
            height: 480,
            fps: 30,
        }
    }

    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    PackedRgb,
    Mjpeg,
}

/// Negotiated capture geometry.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    encoding: Encoding,
    width: u32,
    height: u32,
}

#[self_referencing]
struct OpenCamera {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: MmapStream<'this, v4l::Device>,
}

pub struct WebcamSource {
    config: WebcamConfig,
    camera: Option<OpenCamera>,
    negotiated: Option<Negotiated>,
    captured: u64,
    last_capture: Option<Instant>,
    failed: bool,
}

impl WebcamSource {
    pub fn new(config: WebcamConfig) -> Self {
        Self {
            config,
            camera: None,
            negotiated: None,
            captured: 0,
            last_capture: None,
            failed: false,
        }
    }

    fn negotiate(&self, device: &v4l::Device) -> Result<Negotiated> {
        let mut wanted = device.format().context("query webcam format")?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;

        for fourcc in [FourCC::new(b"RGB3"), FourCC::new(b"MJPG")] {
            wanted.fourcc = fourcc;
            let Ok(actual) = device.set_format(&wanted) else {
                continue;
            };
            let encoding = if actual.fourcc == FourCC::new(b"RGB3") {
                Encoding::PackedRgb
            } else if actual.fourcc == FourCC::new(b"MJPG") {
                Encoding::Mjpeg
            } else {
                continue;
            };
            return Ok(Negotiated {
                encoding,
                width: actual.width,
                height: actual.height,
            });
        }
        bail!("{} offers neither RGB3 nor MJPG output", self.config.device_path())
    }

    fn decode(&self, raw: Vec<u8>, index: u64) -> Result<Frame> {
        let negotiated = self.negotiated.context("webcam not connected")?;
        match negotiated.encoding {
            Encoding::PackedRgb => {
                let mut pixels = raw;
                pixels.truncate(negotiated.width as usize * negotiated.height as usize * 3);
                Frame::from_rgb(pixels, negotiated.width, negotiated.height, index)
            }
            Encoding::Mjpeg => {
                let image = image::load_from_memory_with_format(&raw, image::ImageFormat::Jpeg)
                    .context("decode webcam mjpeg frame")?;
                Ok(Frame::new(image.to_rgb8(), index))
            }
        }
    }
}

impl FrameSource for WebcamSource {
    fn connect(&mut self) -> Result<()> {
        let path = self.config.device_path();
        let device = v4l::Device::with_path(&path)
            .with_context(|| format!("failed to open video source: {}", path))?;
        let negotiated = self.negotiate(&device)?;

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("webcam {}: could not request {} fps: {}", path, self.config.fps, err);
            }
        }

        let camera = OpenCameraTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .context("map webcam capture buffers")
            },
        }
        .try_build()?;

        log::info!(
            "webcam {} opened: {}x{} {:?}",
            path,
            negotiated.width,
            negotiated.height,
            negotiated.encoding
        );
        self.camera = Some(camera);
        self.negotiated = Some(negotiated);
        self.failed = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let camera = self.camera.as_mut().context("webcam not connected")?;
        let raw = camera.with_stream_mut(|stream| {
            stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                self.failed = true;
                return Err(anyhow::Error::new(err).context("capture webcam frame"));
            }
        };

        self.captured += 1;
        self.last_capture = Some(Instant::now());
        self.decode(raw, self.captured).map(Some)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn is_healthy(&self) -> bool {
        if self.failed || self.camera.is_none() {
            return false;
        }
        self.last_capture
            .map_or(true, |at| at.elapsed() <= STALL_AFTER)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            source: self.config.device_path(),
        }
    }

    fn release(&mut self) {
        if self.camera.take().is_some() {
            log::info!("webcam {} released", self.config.device_path());
        }
        self.negotiated = None;
    }
}
