//! Synthetic `stub://` frame source.
//!
//! Paints a white "person" rectangle on a dark background. In the `fall`
//! scenario the rectangle alternates between a tall (standing) and a wide
//! (lying) shape every `period` frames, which `BlobBackend` turns back into
//! person boxes. URL form:
//!
//! `stub://fall?fps=30&kind=file&frames=300&period=30&width=320&height=240`

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Standing and lying phases alternate.
    Fall,
    /// Person stays upright.
    Standing,
    /// No person in view.
    Empty,
}

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub scenario: Scenario,
    pub width: u32,
    pub height: u32,
    pub kind: SourceKind,
    pub fps: Option<f64>,
    /// End of stream after this many frames.
    pub max_frames: Option<u64>,
    /// Frames per posture phase in the `fall` scenario.
    pub period: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://fall".to_string(),
            scenario: Scenario::Fall,
            width: 320,
            height: 240,
            kind: SourceKind::Live,
            fps: None,
            max_frames: None,
            period: 30,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("parse synthetic source url {}", raw))?;
        let mut cfg = SyntheticConfig {
            url: raw.to_string(),
            ..SyntheticConfig::default()
        };
        cfg.scenario = match url.host_str().unwrap_or("fall") {
            "fall" => Scenario::Fall,
            "standing" => Scenario::Standing,
            "empty" => Scenario::Empty,
            other => return Err(anyhow!("unknown synthetic scenario '{}'", other)),
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fps" => cfg.fps = Some(parse_param(&key, &value)?),
                "frames" => cfg.max_frames = Some(parse_param(&key, &value)?),
                "period" => cfg.period = parse_param::<u64>(&key, &value)?.max(1),
                "width" => cfg.width = parse_param(&key, &value)?,
                "height" => cfg.height = parse_param(&key, &value)?,
                "kind" => {
                    cfg.kind = match value.as_ref() {
                        "file" => SourceKind::File,
                        "live" => SourceKind::Live,
                        other => return Err(anyhow!("unknown synthetic kind '{}'", other)),
                    }
                }
                other => log::warn!("SyntheticSource: ignoring unknown parameter '{}'", other),
            }
        }
        if cfg.width < 16 || cfg.height < 16 {
            return Err(anyhow!("synthetic frames must be at least 16x16"));
        }
        Ok(cfg)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid synthetic source parameter {}={}", key, value))
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    /// True when frame `index` (1-based) shows the person lying.
    fn lying_at(&self, index: u64) -> bool {
        match self.config.scenario {
            Scenario::Fall => ((index - 1) / self.config.period) % 2 == 1,
            Scenario::Standing | Scenario::Empty => false,
        }
    }

    fn render(&self, index: u64) -> RgbImage {
        let (w, h) = (self.config.width, self.config.height);
        let mut img = RgbImage::from_pixel(w, h, Rgb([24, 24, 32]));
        if self.config.scenario == Scenario::Empty {
            return img;
        }
        let (x1, y1, x2, y2) = if self.lying_at(index) {
            (w / 4, h * 3 / 4, w * 3 / 4, h * 7 / 8)
        } else {
            (w * 7 / 16, h / 4, w * 9 / 16, h * 7 / 8)
        };
        for y in y1..y2 {
            for x in x1..x2 {
                img.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        img
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        self.frame_count += 1;
        Ok(Some(Frame::new(self.render(self.frame_count), self.frame_count)))
    }

    fn kind(&self) -> SourceKind {
        self.config.kind
    }

    fn nominal_fps(&self) -> Option<f64> {
        self.config.fps
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        self.connected = false;
    }
}
