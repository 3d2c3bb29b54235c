//! Captured frames and the pre-event ring buffer.
//!
//! - `Frame`: one decoded RGB frame plus capture metadata.
//! - `FrameBuffer`: bounded FIFO of recent frames, read when an alert fires so
//!   the lead-up to a fall can be attached as evidence.

use chrono::{DateTime, Utc};
use image::RgbImage;
use std::collections::VecDeque;
use std::time::Duration;

/// Lead-up window kept in front of every alert.
pub const DEFAULT_LEAD_UP: Duration = Duration::from_secs(2);

/// Buffer capacity for live or unknown-rate sources (~2 s at 30 fps).
pub const DEFAULT_LIVE_BUFFER_FRAMES: usize = 60;

/// A decoded frame. Pixel data is always packed RGB8.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Monotonic frame counter assigned by the source (1-based).
    pub index: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index,
            captured_at: Utc::now(),
        }
    }

    /// Build a frame from packed RGB bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> anyhow::Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            anyhow::bail!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            );
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image, index))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Capacity for the pre-event buffer.
///
/// Sources with a known, positive frame rate get `max(1, round(fps * lead_up))`;
/// everything else gets `fallback`.
pub fn buffer_capacity(fps: Option<f64>, lead_up: Duration, fallback: usize) -> usize {
    match fps {
        Some(fps) if fps.is_finite() && fps > 0.0 => {
            let frames = (fps * lead_up.as_secs_f64()).round();
            (frames as usize).max(1)
        }
        _ => fallback.max(1),
    }
}

/// Bounded FIFO of recent frames. Oldest frames are evicted first.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: VecDeque<Frame>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting from the head beyond capacity.
    pub fn push(&mut self, frame: Frame) {
        self.buffer.push_back(frame);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.buffer.back()
    }

    /// Every buffered frame except the most recently pushed one, oldest first.
    pub fn snapshot_excluding_last(&self) -> Vec<Frame> {
        let keep = self.buffer.len().saturating_sub(1);
        self.buffer.iter().take(keep).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Approximate pixel memory held by the buffer.
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(|f| f.image.as_raw().len()).sum()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
