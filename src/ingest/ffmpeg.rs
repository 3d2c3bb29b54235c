//! Local video files and RTSP streams decoded through FFmpeg.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::software::scaling;
use ffmpeg::util::format::pixel::Pixel;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

/// Live streams that stop producing frames for this long report unhealthy.
const STALL_AFTER: Duration = Duration::from_secs(5);

/// Demuxer, decoder and RGB converter for one opened input.
struct Decoding {
    input: Input,
    video_stream: usize,
    decoder: ffmpeg::codec::decoder::Video,
    to_rgb: scaling::Context,
    flushed: bool,
}

impl Decoding {
    fn open(location: &str) -> Result<(Self, Option<f64>)> {
        let input = ffmpeg::format::input(location)
            .with_context(|| format!("failed to open video source: {}", location))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", location))?;
        let video_stream = stream.index();
        let rate = stream.avg_frame_rate();
        let fps = (rate.numerator() > 0 && rate.denominator() > 0)
            .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("read video codec parameters")?
            .decoder()
            .video()
            .context("open video decoder")?;
        let to_rgb = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .context("create RGB converter")?;

        Ok((
            Self {
                input,
                video_stream,
                decoder,
                to_rgb,
                flushed: false,
            },
            fps,
        ))
    }

    /// Next decoded picture in RGB24, or `None` once the input is drained.
    fn next_rgb(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.to_rgb
                    .run(&decoded, &mut rgb)
                    .context("convert frame to RGB")?;
                return Ok(Some(rgb));
            }
            if self.flushed {
                return Ok(None);
            }

            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == self.video_stream)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("decode video packet")?,
                None => {
                    self.decoder.send_eof().context("flush video decoder")?;
                    self.flushed = true;
                }
            }
        }
    }
}

pub struct FfmpegSource {
    location: String,
    kind: SourceKind,
    decoding: Option<Decoding>,
    fps: Option<f64>,
    decoded: u64,
    last_progress: Option<Instant>,
    broken: bool,
}

impl FfmpegSource {
    /// `location` is a file path (`SourceKind::File`) or an `rtsp://` URL.
    pub fn new(location: &str, kind: SourceKind) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        Ok(Self {
            location: location.to_string(),
            kind,
            decoding: None,
            fps: None,
            decoded: 0,
            last_progress: None,
            broken: false,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn connect(&mut self) -> Result<()> {
        let (decoding, fps) = Decoding::open(&self.location)?;
        self.decoding = Some(decoding);
        self.fps = fps;
        self.last_progress = Some(Instant::now());
        self.broken = false;
        match fps {
            Some(fps) => log::info!("opened {} ({:?}, {:.2} fps)", self.location, self.kind, fps),
            None => log::info!("opened {} ({:?}, fps unknown)", self.location, self.kind),
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let decoding = self.decoding.as_mut().context("video source not connected")?;
        let rgb = match decoding.next_rgb() {
            Ok(Some(rgb)) => rgb,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.broken = true;
                return Err(err);
            }
        };
        let (pixels, width, height) = packed_rgb(&rgb)?;
        self.decoded += 1;
        self.last_progress = Some(Instant::now());
        Frame::from_rgb(pixels, width, height, self.decoded).map(Some)
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn nominal_fps(&self) -> Option<f64> {
        self.fps
    }

    fn is_healthy(&self) -> bool {
        !self.broken
            && self.decoding.is_some()
            && self
                .last_progress
                .is_some_and(|at| at.elapsed() <= STALL_AFTER)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.decoded,
            source: self.location.clone(),
        }
    }

    fn release(&mut self) {
        if self.decoding.take().is_some() {
            log::info!("closed {}", self.location);
        }
    }
}

/// Copy plane 0 of an RGB24 frame into a tightly packed buffer.
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let (width, height) = (frame.width(), frame.height());
    let row = width as usize * 3;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let line = plane
            .get(start..start + row)
            .context("decoded frame is smaller than its dimensions")?;
        pixels.extend_from_slice(line);
    }
    Ok((pixels, width, height))
}
