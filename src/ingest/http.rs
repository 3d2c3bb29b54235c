//! HTTP camera source.
//!
//! Phone "IP webcam" apps and ESP32-CAM firmware serve either a
//! `multipart/x-mixed-replace` MJPEG stream or a JPEG snapshot per request.
//! The response's content type decides which one is read.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

/// Largest single JPEG accepted from a camera.
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 16 * 1024;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub url: String,
    /// Connect and read timeout. Also the stall window for health checks.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/video".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

enum Feed {
    Multipart(MjpegSplitter),
    Snapshot,
}

pub struct HttpSource {
    config: HttpConfig,
    agent: ureq::Agent,
    feed: Option<Feed>,
    frames: u64,
    last_progress: Option<Instant>,
    broken: bool,
}

impl HttpSource {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.url)
            .with_context(|| format!("invalid camera url {}", config.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("camera url must be http or https: {}", config.url);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .build();
        Ok(Self {
            config,
            agent,
            feed: None,
            frames: 0,
            last_progress: None,
            broken: false,
        })
    }

    fn pull_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        match self.feed.as_mut() {
            None => Err(anyhow!("http source not connected")),
            Some(Feed::Multipart(splitter)) => splitter.next_jpeg(),
            Some(Feed::Snapshot) => snapshot(&self.agent, &self.config.url).map(Some),
        }
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("failed to open video source: {}", self.config.url))?;
        let multipart = response
            .header("Content-Type")
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/"));
        self.feed = Some(if multipart {
            Feed::Multipart(MjpegSplitter::new(response.into_reader()))
        } else {
            Feed::Snapshot
        });
        self.last_progress = Some(Instant::now());
        self.broken = false;
        log::info!(
            "http camera {} opened ({})",
            self.config.url,
            if multipart { "mjpeg stream" } else { "snapshot polling" }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let jpeg = match self.pull_jpeg() {
            Ok(Some(jpeg)) => jpeg,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.broken = true;
                return Err(err);
            }
        };
        let image = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .context("decode camera jpeg")?
            .to_rgb8();
        self.frames += 1;
        self.last_progress = Some(Instant::now());
        self.broken = false;
        Ok(Some(Frame::new(image, self.frames)))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn is_healthy(&self) -> bool {
        !self.broken
            && self.feed.is_some()
            && self
                .last_progress
                .is_some_and(|at| at.elapsed() <= self.config.timeout)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        if self.feed.take().is_some() {
            log::info!("http camera {} closed", self.config.url);
        }
    }
}

fn snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent.get(url).call().context("fetch camera snapshot")?;
    let mut jpeg = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut jpeg)
        .context("read camera snapshot")?;
    if jpeg.len() > MAX_JPEG_BYTES {
        bail!("camera snapshot larger than {} bytes", MAX_JPEG_BYTES);
    }
    Ok(jpeg)
}

/// Cuts JPEG images out of an MJPEG body by their SOI/EOI markers.
///
/// Part headers and boundaries between images are skipped, so the splitter
/// does not need the multipart boundary string.
pub(crate) struct MjpegSplitter {
    reader: Box<dyn Read + Send + Sync>,
    pending: Vec<u8>,
    /// Offset of the SOI marker of the image being assembled.
    image_start: Option<usize>,
    /// Bytes before this offset have already been searched for EOI.
    scanned: usize,
}

impl MjpegSplitter {
    pub(crate) fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            image_start: None,
            scanned: 0,
        }
    }

    /// Next complete image; `None` once the body ends.
    pub(crate) fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(jpeg) = self.take_complete() {
                return Ok(Some(jpeg));
            }
            let n = self.reader.read(&mut chunk).context("read mjpeg stream")?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_complete(&mut self) -> Option<Vec<u8>> {
        let start = match self.image_start {
            Some(start) => start,
            None => {
                let Some(start) = find_marker(&self.pending, 0, SOI) else {
                    let keep_from = self.pending.len().saturating_sub(1);
                    self.pending.drain(..keep_from);
                    return None;
                };
                self.image_start = Some(start);
                self.scanned = start + SOI.len();
                start
            }
        };

        match find_marker(&self.pending, self.scanned, EOI) {
            Some(eoi) => {
                let end = eoi + EOI.len();
                let jpeg = self.pending[start..end].to_vec();
                self.pending.drain(..end);
                self.image_start = None;
                self.scanned = 0;
                Some(jpeg)
            }
            None => {
                // Leave one byte so a marker split across reads is still found.
                self.scanned = self.pending.len().saturating_sub(1).max(start + SOI.len());
                if self.pending.len() - start > MAX_JPEG_BYTES {
                    log::warn!("mjpeg image exceeded {} bytes; resyncing", MAX_JPEG_BYTES);
                    self.pending.clear();
                    self.image_start = None;
                    self.scanned = 0;
                }
                None
            }
        }
    }
}

fn find_marker(data: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out its data a few bytes at a time.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn two_part_body() -> Vec<u8> {
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        body.extend_from_slice(b"\r\n--frame\r\n\r\n");
        body.extend_from_slice(&[0xFF, 0xD8, 0xBB, 0xCC, 0xFF, 0xD9]);
        body
    }

    #[test]
    fn finds_markers_from_offset() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9];
        assert_eq!(find_marker(&data, 0, SOI), Some(1));
        assert_eq!(find_marker(&data, 2, SOI), None);
        assert_eq!(find_marker(&data, 3, EOI), Some(4));
        assert_eq!(find_marker(&data, 10, EOI), None);
    }

    #[test]
    fn splits_images_and_ends() -> Result<()> {
        let mut splitter = MjpegSplitter::new(Box::new(Cursor::new(two_part_body())));
        assert_eq!(splitter.next_jpeg()?, Some(vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]));
        assert_eq!(splitter.next_jpeg()?, Some(vec![0xFF, 0xD8, 0xBB, 0xCC, 0xFF, 0xD9]));
        assert_eq!(splitter.next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn markers_split_across_reads() -> Result<()> {
        let mut splitter = MjpegSplitter::new(Box::new(Trickle {
            data: two_part_body(),
            pos: 0,
            step: 1,
        }));
        assert_eq!(splitter.next_jpeg()?, Some(vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]));
        assert_eq!(splitter.next_jpeg()?, Some(vec![0xFF, 0xD8, 0xBB, 0xCC, 0xFF, 0xD9]));
        assert_eq!(splitter.next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        for url in ["not a url", "rtsp://cam/live"] {
            let config = HttpConfig {
                url: url.to_string(),
                ..HttpConfig::default()
            };
            assert!(HttpSource::new(config).is_err(), "{url}");
        }
    }

    #[test]
    fn unconnected_source_is_unhealthy() -> Result<()> {
        let mut source = HttpSource::new(HttpConfig::default())?;
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
