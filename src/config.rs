use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::dispatch::{DEFAULT_DESCRIPTION, DEFAULT_LOCATION};
use crate::fall::MissPolicy;
use crate::frame::DEFAULT_LIVE_BUFFER_FRAMES;
use crate::pipeline::PipelineSettings;
use crate::posture::DEFAULT_RATIO_THRESHOLD;
use crate::storage::DEFAULT_CAPTURE_DIR;
use crate::transport::DEFAULT_UPLOAD_URL;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_COOLDOWN_SECS: f64 = 10.0;
const DEFAULT_LEAD_UP_SECS: f64 = 2.0;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 10;
const DEFAULT_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct FallwatchConfigFile {
    source: Option<String>,
    detector: Option<DetectorConfigFile>,
    posture: Option<PostureConfigFile>,
    alert: Option<AlertConfigFile>,
    storage: Option<StorageConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PostureConfigFile {
    ratio_threshold: Option<f64>,
    miss_reset_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<f64>,
    lead_up_secs: Option<f64>,
    live_buffer_frames: Option<usize>,
    location: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    capture_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
    dispatch_mode: Option<String>,
    queue_depth: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Bright-blob stand-in detector, pairs with `stub://` sources.
    Stub,
    /// YOLOv8 ONNX model through tract.
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" | "yolo" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}' (expected stub or tract)", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Upload on the loop thread; the loop blocks for up to the timeout.
    Inline,
    /// Save on the loop thread, upload on a worker.
    Background,
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "background" => Ok(DispatchMode::Background),
            other => Err(anyhow!("unknown dispatch mode '{}' (expected inline or background)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallwatchConfig {
    pub source: String,
    pub detector: DetectorSettings,
    pub ratio_threshold: f64,
    /// Reset the previous posture after this many frames without a person.
    pub miss_reset_frames: Option<u32>,
    pub cooldown: Duration,
    pub lead_up: Duration,
    pub live_buffer_frames: usize,
    pub location: String,
    pub description: String,
    pub capture_dir: PathBuf,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub url: String,
    pub timeout: Duration,
    pub mode: DispatchMode,
    pub queue_depth: usize,
}

impl FallwatchConfig {
    /// Defaults, then `$FALLWATCH_CONFIG` (JSON), then `FALLWATCH_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FALLWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FallwatchConfigFile) -> Result<Self> {
        let detector = file.detector.unwrap_or_default();
        let posture = file.posture.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();

        Ok(Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            detector: DetectorSettings {
                kind: detector
                    .backend
                    .as_deref()
                    .map(DetectorKind::from_str)
                    .transpose()?
                    .unwrap_or(DetectorKind::Stub),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: detector.iou.unwrap_or(DEFAULT_IOU),
            },
            ratio_threshold: posture.ratio_threshold.unwrap_or(DEFAULT_RATIO_THRESHOLD),
            miss_reset_frames: posture.miss_reset_frames,
            cooldown: secs_f64(alert.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS), "cooldown_secs")?,
            lead_up: secs_f64(alert.lead_up_secs.unwrap_or(DEFAULT_LEAD_UP_SECS), "lead_up_secs")?,
            live_buffer_frames: alert.live_buffer_frames.unwrap_or(DEFAULT_LIVE_BUFFER_FRAMES),
            location: alert.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            description: alert
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            capture_dir: storage
                .capture_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
            upload: UploadSettings {
                url: upload.url.unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
                timeout: Duration::from_secs(upload.timeout_secs.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS)),
                mode: upload
                    .dispatch_mode
                    .as_deref()
                    .map(DispatchMode::from_str)
                    .transpose()?
                    .unwrap_or(DispatchMode::Inline),
                queue_depth: upload.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_nonempty("FALLWATCH_SOURCE") {
            self.source = source;
        }
        if let Some(url) = env_nonempty("FALLWATCH_SERVER_URL") {
            self.upload.url = url;
        }
        if let Some(dir) = env_nonempty("FALLWATCH_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(location) = env_nonempty("FALLWATCH_LOCATION") {
            self.location = location;
        }
        if let Some(cooldown) = env_nonempty("FALLWATCH_COOLDOWN_SECS") {
            let seconds: f64 = cooldown
                .parse()
                .map_err(|_| anyhow!("FALLWATCH_COOLDOWN_SECS must be a number of seconds"))?;
            self.cooldown = secs_f64(seconds, "FALLWATCH_COOLDOWN_SECS")?;
        }
        if let Some(threshold) = env_nonempty("FALLWATCH_RATIO_THRESHOLD") {
            self.ratio_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("FALLWATCH_RATIO_THRESHOLD must be a number"))?;
        }
        if let Some(detector) = env_nonempty("FALLWATCH_DETECTOR") {
            self.detector.kind = detector.parse()?;
        }
        if let Some(model) = env_nonempty("FALLWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(model);
        }
        if let Some(mode) = env_nonempty("FALLWATCH_DISPATCH_MODE") {
            self.upload.mode = mode.parse()?;
        }
        Ok(())
    }

    /// Check invariants and normalise the location to lowercase.
    pub fn validate(&mut self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if !self.ratio_threshold.is_finite() || self.ratio_threshold <= 0.0 {
            return Err(anyhow!("ratio_threshold must be a positive number"));
        }
        if self.lead_up.is_zero() {
            return Err(anyhow!("lead_up_secs must be greater than zero"));
        }
        if self.live_buffer_frames == 0 {
            return Err(anyhow!("live_buffer_frames must be at least 1"));
        }
        if self.miss_reset_frames == Some(0) {
            return Err(anyhow!("miss_reset_frames must be at least 1 when set"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) || !(0.0..=1.0).contains(&self.detector.iou) {
            return Err(anyhow!("detector confidence and iou must be within [0, 1]"));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector input_size must be a positive multiple of 32"));
        }
        validate_upload_url(&self.upload.url)?;
        if self.upload.timeout.is_zero() {
            return Err(anyhow!("upload timeout must be greater than zero"));
        }
        if self.upload.queue_depth == 0 {
            return Err(anyhow!("upload queue_depth must be at least 1"));
        }
        self.location = self.location.to_lowercase();
        validate_location(&self.location)?;
        Ok(())
    }

    pub fn miss_policy(&self) -> MissPolicy {
        match self.miss_reset_frames {
            Some(n) => MissPolicy::ResetAfter(n),
            None => MissPolicy::Freeze,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            ratio_threshold: self.ratio_threshold,
            cooldown: self.cooldown,
            lead_up: self.lead_up,
            live_buffer_frames: self.live_buffer_frames,
            miss_policy: self.miss_policy(),
            location: self.location.clone(),
            description: self.description.clone(),
        }
    }
}

/// A location is a short room identifier such as `living_room`.
pub fn validate_location(location: &str) -> Result<()> {
    static LOCATION_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LOCATION_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,100}$").unwrap());
    if !re.is_match(location) {
        return Err(anyhow!(
            "location must match ^[a-z0-9_-]{{1,100}}$ (got '{}')",
            location
        ));
    }
    Ok(())
}

pub fn validate_upload_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|e| anyhow!("invalid upload url {}: {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("upload url must be http or https: {}", raw));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("upload url has no host: {}", raw));
    }
    Ok(())
}

fn secs_f64(seconds: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", name))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<FallwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> FallwatchConfig {
        FallwatchConfig::from_file(FallwatchConfigFile::default()).unwrap()
    }

    #[test]
    fn defaults_validate() {
        let mut cfg = defaults();
        cfg.validate().unwrap();
        assert_eq!(cfg.source, "0");
        assert_eq!(cfg.detector.kind, DetectorKind::Stub);
        assert_eq!(cfg.cooldown, Duration::from_secs(10));
        assert_eq!(cfg.lead_up, Duration::from_secs(2));
        assert_eq!(cfg.location, "living_room");
        assert_eq!(cfg.upload.url, "http://localhost:8000/api/fall-events/");
        assert_eq!(cfg.upload.mode, DispatchMode::Inline);
        assert_eq!(cfg.miss_policy(), MissPolicy::Freeze);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = defaults();
        cfg.ratio_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.location = "living room/1".into();
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.upload.url = "ftp://example.com/".into();
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.miss_reset_frames = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn location_is_lowercased() {
        let mut cfg = defaults();
        cfg.location = "Bedroom_2".into();
        cfg.validate().unwrap();
        assert_eq!(cfg.location, "bedroom_2");
    }

    #[test]
    fn parses_enums() {
        assert_eq!("TRACT".parse::<DetectorKind>().unwrap(), DetectorKind::Tract);
        assert_eq!(" background ".parse::<DispatchMode>().unwrap(), DispatchMode::Background);
        assert!("gpu".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn negative_cooldown_is_rejected() {
        let file: FallwatchConfigFile =
            serde_json::from_str(r#"{"alert": {"cooldown_secs": -1}}"#).unwrap();
        assert!(FallwatchConfig::from_file(file).is_err());
    }
}
